#![doc = r#"
# tlswrap-core

## 设计动机（Why）
- **共享契约**：TLS 引擎、流适配器与各类传输实现分属不同 crate，它们之间只通过本 crate 的类型交流；
- **统一错误域**：传输失败、协议失败与资源耗尽在回调中以同一个 [`CoreError`] 呈现，调用方按
  [`ErrorCategory`] 做决策；
- **可观测**：生命周期钩子与对象池统计以 [`ProviderType`] 为同一维度聚合。

## 核心契约（What）
- [`Transport`]：双工字节流能力接口，TLS 流本身也实现它，可以继续被叠加；
- [`EventLoop`]：单线程延迟任务队列，承担“回调永不同步触发”的保证；
- [`HookRegistry`] / [`AsyncHooks`]：资源创建、回调前后、销毁四类事件；
- [`Pool`]：按类型标签区分的槽位池；
- [`StreamConfig`] 与 [`WatermarkClassifier`]：缓冲上限与背压水位。

## 风险与考量（Trade-offs）
- 所有类型假设单线程协作调度（`Rc`/`RefCell`），跨线程使用需由外层隔离到各自的事件循环。
"#]

pub mod backpressure;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod hooks;
pub mod pool;
pub mod stream;

pub use backpressure::{
    BackpressureClassifier, BackpressureDecision, BackpressureMetrics, WatermarkClassifier,
};
pub use config::StreamConfig;
pub use error::{
    BudgetKind, CoreError, ErrorCategory, ErrorCause, Result, RetryAdvice, SecurityClass, codes,
};
pub use event_loop::EventLoop;
pub use hooks::{AsyncHooks, AsyncId, CallbackScope, HookRegistry, ProviderType};
pub use pool::{Pool, PoolHandle, PoolStats};
pub use stream::{
    CloseCallback, ReadCallback, ReadEvent, ShutdownCallback, Transport, TransportKind,
    WriteCallback,
};
