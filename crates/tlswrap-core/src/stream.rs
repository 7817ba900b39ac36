use std::fmt;

use bytes::Bytes;

use crate::error::{CoreError, Result};

/// 读事件：数据、EOF 或错误。
#[derive(Clone, Debug)]
pub enum ReadEvent {
    /// 一段按到达顺序交付的字节。
    Data(Bytes),
    /// 对端已关闭写方向，之后不会再有数据。
    Eof,
    /// 读路径失败，之后不会再有事件。
    Error(CoreError),
}

impl ReadEvent {
    /// 若为数据事件则返回其字节。
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            ReadEvent::Data(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// 读回调，可被多次调用。
pub type ReadCallback = Box<dyn FnMut(ReadEvent)>;
/// 写完成回调，恰好调用一次。
pub type WriteCallback = Box<dyn FnOnce(Result<()>)>;
/// 关闭写方向完成回调，恰好调用一次。
pub type ShutdownCallback = Box<dyn FnOnce(Result<()>)>;
/// 关闭完成回调。
pub type CloseCallback = Box<dyn FnOnce()>;

/// 传输种类，仅用于日志与统计；行为差异全部由 [`Transport`] 实现承担。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TransportKind {
    Pipe,
    Tcp,
    Tty,
    Udp,
    Tls,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportKind::Pipe => "pipe",
            TransportKind::Tcp => "tcp",
            TransportKind::Tty => "tty",
            TransportKind::Udp => "udp",
            TransportKind::Tls => "tls",
        };
        f.write_str(label)
    }
}

/// 双工字节流能力接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 管道、终端、TCP 等传输以同一组能力 `{read_start, read_stop, write, shutdown, close}` 被消费，
///   上层通过 trait object 动态分发，而不是对类型标签做 `match`；
/// - TLS 流适配器本身也实现该接口（携带明文），因此加密流可以继续叠加在其它加密流之上。
///
/// ## 契约（What）
/// - `read_start`：注册读回调并开始投递 [`ReadEvent`]；重复调用会替换回调；
/// - `read_stop`：停止投递，已经进入投递过程的那一段数据不会被撤回；
/// - `write`：写入整段字节，`on_complete` 在对端接收（或失败）后调用一次；
///   同一端点上的写按提交顺序完成；
/// - `shutdown`：在所有已提交写完成之后关闭写方向；
/// - `close`：立即释放，幂等；尚未完成的写与关闭请求以取消错误结束；
/// - `write_queue_size`：已提交但尚未完成的字节数，作为背压信号；
/// - **异步保证**：所有回调都不会在注册它们的调用内部同步触发。
///
/// ## 风险与权衡（Trade-offs）
/// - 接口以 `&mut self` 暴露，假设单线程协作调度；实现若需要跨线程共享，应在内部自行同步；
/// - 同步返回的 `Err` 表示请求未被受理，此时回调不会被调用。
pub trait Transport {
    /// 传输种类。
    fn kind(&self) -> TransportKind;

    /// 开始读取。
    fn read_start(&mut self, on_read: ReadCallback) -> Result<()>;

    /// 停止读取。
    fn read_stop(&mut self) -> Result<()>;

    /// 提交写请求。
    fn write(&mut self, data: Bytes, on_complete: WriteCallback) -> Result<()>;

    /// 关闭写方向。
    fn shutdown(&mut self, on_complete: ShutdownCallback) -> Result<()>;

    /// 立即关闭并释放传输。
    fn close(&mut self);

    /// 已提交未完成的写字节数。
    fn write_queue_size(&self) -> usize;

    /// 是否已经关闭。
    fn is_closed(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn read_start(&mut self, on_read: ReadCallback) -> Result<()> {
        (**self).read_start(on_read)
    }

    fn read_stop(&mut self) -> Result<()> {
        (**self).read_stop()
    }

    fn write(&mut self, data: Bytes, on_complete: WriteCallback) -> Result<()> {
        (**self).write(data, on_complete)
    }

    fn shutdown(&mut self, on_complete: ShutdownCallback) -> Result<()> {
        (**self).shutdown(on_complete)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn write_queue_size(&self) -> usize {
        (**self).write_queue_size()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}
