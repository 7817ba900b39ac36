#![doc = r#"
# tlswrap-transport-memory

## 设计动机（Why）
- 流适配器的正确性取决于传输事件的时序：写何时完成、数据以多大的块到达、何时出现 EOF；
- 内存传输让这些时序完全由测试控制，同时严格遵守 [`tlswrap_core::Transport`] 的异步回调契约。

## 核心契约（What）
- [`pair`]：创建一对相连端点，所有回调经共享的 [`tlswrap_core::EventLoop`] 延迟执行；
- [`MemoryTransport`]：实现 `Transport`，额外提供饱和、分块交付与故障注入控制面；
- [`MemoryStats`]：写请求与交付字节的累计计数。
"#]

mod error;
mod pipe;

pub use pipe::{MemoryStats, MemoryTransport, pair};
