use slab::Slab;

use crate::hooks::ProviderType;

/// 对象池句柄，`insert` 返回、`remove` 消费。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolHandle(usize);

/// 对象池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 当前存活对象数。
    pub live: usize,
    /// 历史峰值。
    pub peak: usize,
    /// 累计分配次数。
    pub allocated: u64,
    /// 累计释放次数。
    pub released: u64,
}

/// 按类型标签区分的对象池。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每条连接都会产生大量短命的写请求，按类型复用槽位可避免频繁的小块分配；
/// - 类型标签 [`ProviderType`] 与生命周期钩子共用，使池统计与钩子事件能按同一维度聚合。
///
/// ## 逻辑（How）
/// - 以 `slab::Slab` 为后端：空闲槽位组成链表，插入与删除都是 O(1)，
///   释放后的槽位会被下一次插入复用；
/// - `PoolStats` 在每次插入/删除时更新，峰值只增不减。
///
/// ## 契约（What）
/// - 句柄只在对应对象被移除前有效；对失效句柄调用 `get`/`remove` 返回 `None`；
/// - **后置条件**：`stats().allocated - stats().released == live`。
#[derive(Debug)]
pub struct Pool<T> {
    provider: ProviderType,
    slots: Slab<T>,
    stats: PoolStats,
}

impl<T> Pool<T> {
    /// 创建指定类型的对象池。
    pub fn new(provider: ProviderType) -> Self {
        Self {
            provider,
            slots: Slab::new(),
            stats: PoolStats::default(),
        }
    }

    /// 预留容量。
    pub fn with_capacity(provider: ProviderType, capacity: usize) -> Self {
        Self {
            provider,
            slots: Slab::with_capacity(capacity),
            stats: PoolStats::default(),
        }
    }

    /// 池的类型标签。
    pub fn provider(&self) -> ProviderType {
        self.provider
    }

    /// 放入对象。
    pub fn insert(&mut self, value: T) -> PoolHandle {
        let key = self.slots.insert(value);
        self.stats.allocated += 1;
        self.stats.live = self.slots.len();
        self.stats.peak = self.stats.peak.max(self.stats.live);
        PoolHandle(key)
    }

    /// 取出对象并释放槽位。
    pub fn remove(&mut self, handle: PoolHandle) -> Option<T> {
        let value = self.slots.try_remove(handle.0)?;
        self.stats.released += 1;
        self.stats.live = self.slots.len();
        Some(value)
    }

    /// 借用对象。
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.slots.get(handle.0)
    }

    /// 可变借用对象。
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.slots.get_mut(handle.0)
    }

    /// 存活对象数。
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 清空并返回所有存活对象，顺序不保证。
    pub fn drain(&mut self) -> Vec<T> {
        let drained: Vec<T> = self.slots.drain().collect();
        self.stats.released += drained.len() as u64;
        self.stats.live = 0;
        drained
    }

    /// 统计快照。
    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}
