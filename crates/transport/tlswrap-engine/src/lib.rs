#![doc = r#"
# tlswrap-engine

## 设计动机（Why）
- **纯缓冲**：TLS 状态机只与内存通道交互，密文的收发由上层适配器对接任意传输；
- **可运维性**：协议失败按 `Security` / `ResourceExhausted` / `Retryable` 分类转换为
  [`tlswrap_core::CoreError`]，握手元数据（版本、套件、ALPN、SNI）可随时查询；
- **热更新**：[`EngineFactory`] 依托 `ArcSwap` 替换证书配置，只影响新建连接。

## 核心契约（What）
- [`TlsEngine`]：`feed_ciphertext` / `drive` / `pull_plaintext` / `push_plaintext` / `drain_outbound`；
- [`EngineSettings`]：TOML 声明的角色、PEM 材料、协议版本与 ALPN，`build` 产出 [`EngineConfig`]；
- [`EngineError`]：引擎层错误，经 `From` 转换进入统一错误域。

## 实现策略（How）
- 基于 `rustls::Connection` 的 `read_tls` / `process_new_packets` / `write_tls` 循环；
- 密码学实现固定为 `ring` provider。

## 风险与考量（Trade-offs）
- 引擎不做任何 I/O，也不持有定时器；握手超时等策略由调用方负责。
"#]

mod channel;
mod engine;
mod error;
mod factory;
mod settings;

pub use engine::{
    DriveReport, EngineConfig, EngineLimits, EngineStats, InboundState, Role, SessionInfo,
    TlsEngine,
};
pub use error::EngineError;
pub use factory::EngineFactory;
pub use settings::{EngineSettings, PemSource, TlsVersion};
