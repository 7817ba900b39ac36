//! 异步生命周期钩子。
//!
//! ## 角色定位（Why）
//! - 观测子系统需要知道“哪个异步资源被创建、它的回调何时开始与结束、何时被销毁”，
//!   以便串联因果链（例如把一次写完成关联回发起它的连接）；
//! - 钩子与适配器状态机解耦：适配器只在固定位置通知观察者，观察者的实现细节
//!   （队列式或标志位式）对适配器不可见。
//!
//! ## 契约（What）
//! - `init` 在资源创建时触发一次，`destroy` 在资源释放时触发一次；
//! - 每次调用方回调都被 `before`/`after` 成对包裹，`after` 由 [`CallbackScope`] 的 `Drop` 保证，
//!   即使回调 panic 展开也会触发。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// 异步资源标识，进程内单调递增。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsyncId(u64);

static NEXT_ASYNC_ID: AtomicU64 = AtomicU64::new(1);

impl AsyncId {
    /// 分配新的标识。
    pub fn next() -> Self {
        AsyncId(NEXT_ASYNC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// 原始数值，供日志字段使用。
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AsyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 异步资源的类型标签，同时作为对象池的键。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ProviderType {
    /// TLS 流适配器连接。
    TlsWrap,
    /// 调用方写请求。
    WriteWrap,
    /// 调用方关闭写方向请求。
    ShutdownWrap,
    /// 管道（内存）传输。
    PipeWrap,
    /// TCP 传输。
    TcpWrap,
}

impl ProviderType {
    /// 稳定名称。
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::TlsWrap => "TLSWRAP",
            ProviderType::WriteWrap => "WRITEWRAP",
            ProviderType::ShutdownWrap => "SHUTDOWNWRAP",
            ProviderType::PipeWrap => "PIPEWRAP",
            ProviderType::TcpWrap => "TCPWRAP",
        }
    }
}

/// 生命周期观察者。
///
/// # 教案式说明
/// - **意图（Why）**：为追踪、审计或测试提供插拔点，观察者自行决定如何记录事件；
/// - **契约（What）**：实现必须快速返回且不得回调触发事件的连接，否则会打破单线程协作模型；
///   所有方法都有空默认实现，观察者只需覆盖关心的事件。
pub trait AsyncHooks: Send + Sync + 'static {
    /// 资源创建，`trigger` 为引发创建的父资源。
    fn init(&self, id: AsyncId, provider: ProviderType, trigger: Option<AsyncId>) {
        let _ = (id, provider, trigger);
    }

    /// 即将执行资源的回调。
    fn before(&self, id: AsyncId) {
        let _ = id;
    }

    /// 资源回调执行完毕。
    fn after(&self, id: AsyncId) {
        let _ = id;
    }

    /// 资源销毁。
    fn destroy(&self, id: AsyncId) {
        let _ = id;
    }
}

/// 观察者注册表，向所有已注册观察者扇出事件。
///
/// 克隆代价为一次 `Arc` 引用计数；空注册表上的通知是无操作。
#[derive(Clone, Default)]
pub struct HookRegistry {
    observers: Vec<Arc<dyn AsyncHooks>>,
}

impl HookRegistry {
    /// 创建空注册表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册观察者。
    pub fn with_observer(mut self, observer: Arc<dyn AsyncHooks>) -> Self {
        self.observers.push(observer);
        self
    }

    /// 是否没有任何观察者。
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// 通知资源创建。
    pub fn emit_init(&self, id: AsyncId, provider: ProviderType, trigger: Option<AsyncId>) {
        for observer in &self.observers {
            observer.init(id, provider, trigger);
        }
    }

    /// 通知资源销毁。
    pub fn emit_destroy(&self, id: AsyncId) {
        for observer in &self.observers {
            observer.destroy(id);
        }
    }

    /// 进入回调作用域，返回的守卫在 `Drop` 时触发 `after`。
    pub fn enter(&self, id: AsyncId) -> CallbackScope<'_> {
        for observer in &self.observers {
            observer.before(id);
        }
        CallbackScope { registry: self, id }
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// 回调作用域守卫。
pub struct CallbackScope<'a> {
    registry: &'a HookRegistry,
    id: AsyncId,
}

impl CallbackScope<'_> {
    /// 作用域对应的资源。
    pub fn id(&self) -> AsyncId {
        self.id
    }
}

impl Drop for CallbackScope<'_> {
    fn drop(&mut self) {
        for observer in &self.registry.observers {
            observer.after(self.id);
        }
    }
}
