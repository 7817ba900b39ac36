use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::{
    engine::{EngineConfig, EngineLimits, TlsEngine},
    error::EngineError,
    settings::EngineSettings,
};

/// 可热更新的引擎工厂。
///
/// # 设计动机（Why）
/// - 证书轮换不应中断现有连接：每条连接在创建时取一次配置快照，此后与工厂解耦；
/// - 以 `ArcSwap` 保存当前配置，读路径无锁，写路径常数时间，适合“读多写少”的证书分发。
///
/// # 核心契约（What）
/// - [`EngineFactory::create`] 每次读取最新快照构造一个新引擎；
/// - [`EngineFactory::replace`] / [`EngineFactory::reload`] 立即对后续 `create` 可见，
///   已创建的引擎继续持有旧配置的 `Arc`；
/// - 克隆工厂共享同一配置存储。
///
/// # 风险提示（Trade-offs）
/// - `reload` 在替换前完整装配新配置，装配失败时旧配置保持不变；
/// - 高频替换会暂存多份配置，内存峰值与存活连接数相关。
#[derive(Clone)]
pub struct EngineFactory {
    current: Arc<ArcSwap<EngineConfig>>,
    limits: EngineLimits,
}

impl EngineFactory {
    /// 以现成配置构造。
    pub fn new(config: EngineConfig, limits: EngineLimits) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            limits,
        }
    }

    /// 由声明式配置装配后构造。
    pub fn from_settings(settings: &EngineSettings, limits: EngineLimits) -> Result<Self, EngineError> {
        Ok(Self::new(settings.build()?, limits))
    }

    /// 当前配置快照。
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.current.load_full()
    }

    /// 替换配置并返回旧值。
    pub fn replace(&self, next: EngineConfig) -> Arc<EngineConfig> {
        let previous = self.current.swap(Arc::new(next));
        debug!(role = ?previous.role(), "tls engine config replaced");
        previous
    }

    /// 由声明式配置重新装配；失败时保留当前配置。
    pub fn reload(&self, settings: &EngineSettings) -> Result<Arc<EngineConfig>, EngineError> {
        let next = settings.build()?;
        Ok(self.replace(next))
    }

    /// 每条连接的缓冲上限。
    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    /// 使用当前快照构造新引擎。
    pub fn create(&self) -> Result<TlsEngine, EngineError> {
        let config = self.current.load();
        TlsEngine::new(&config, self.limits)
    }
}

impl fmt::Debug for EngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineFactory")
            .field("role", &self.current.load().role())
            .field("limits", &self.limits)
            .finish()
    }
}
