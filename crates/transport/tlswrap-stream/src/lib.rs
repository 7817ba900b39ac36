#![doc = r#"
# tlswrap-stream

## 设计动机（Why）
- **透明加密**：把任意实现 [`tlswrap_core::Transport`] 的双工传输包装成明文双工流，
  调用方沿用 `read_start` / `write` / `shutdown` / `close` 契约，无需感知握手与记录边界；
- **端到端背压**：写请求只在其密文被传输确认后才完成，传输积压会一路传导回调用方；
- **可观测**：连接、写请求与关闭请求都以异步资源身份上报生命周期钩子，`tracing` 记录状态迁移。

## 核心契约（What）
- [`TlsStream`]：`start`、`on_handshake`、`read_start`、`read_stop`、`write`、`writev`、
  `shutdown`、`close`，以及 `session` / `state` / `stats` / `write_queue_size` 查询；
- 握手由首次 `read_start` / `write` / `shutdown` 隐式开始，`start` 只是提前触发；
- [`StreamState`]：NotStarted → Handshaking → Established → ShuttingDown → Closed，
  交付对端关闭的 EOF 后同样进入 Closed；
- [`StreamStats`]：明文、密文、传输写与背压暂停计数。

## 实现策略（How）
- 单线程协作调度：内部状态放在 `RefCell` 中，所有调用方回调在释放借用后由派发循环执行；
- 传输回调只持有 `Weak` 引用，调用方丢弃最后一个句柄即释放连接。

## 风险与考量（Trade-offs）
- 明文在握手完成前只排队不推送；需要 0-RTT 的场景不在本适配器的范围内。
"#]

mod error;
mod request;
mod state;
mod stream;

pub use state::{StreamState, StreamStats};
pub use stream::{HandshakeCallback, TlsStream};
