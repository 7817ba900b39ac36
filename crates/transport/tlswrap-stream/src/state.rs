use std::fmt;

use tlswrap_core::PoolStats;

/// 连接的握手与关闭阶段。
///
/// 状态由连接内部事实推导：是否已启动、握手是否完成、是否请求过关闭写方向、
/// 是否已关闭或失败。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// 握手尚未开始。
    NotStarted,
    /// 握手进行中。
    Handshaking,
    /// 握手完成，可以收发明文。
    Established,
    /// 已请求关闭写方向，读方向仍可用。
    ShuttingDown,
    /// 终态：调用方关闭、连接因致命错误终止，或已交付对端关闭的 EOF。
    Closed,
}

impl StreamState {
    /// 日志使用的稳定名称。
    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::NotStarted => "not_started",
            StreamState::Handshaking => "handshaking",
            StreamState::Established => "established",
            StreamState::ShuttingDown => "shutting_down",
            StreamState::Closed => "closed",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 连接累计计数快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// 引擎受理的明文字节数。
    pub plaintext_written: u64,
    /// 从引擎取出的明文字节数。
    pub plaintext_read: u64,
    /// 传输交付的密文字节数。
    pub ciphertext_received: u64,
    /// 交给传输的密文字节数。
    pub ciphertext_sent: u64,
    /// 发起的传输写次数。
    pub transport_writes: u64,
    /// 已完成的传输写次数。
    pub transport_writes_completed: u64,
    /// 因下游积压而暂停推送明文的次数。
    pub backpressure_stalls: u64,
    /// 写请求池统计。
    pub write_requests: PoolStats,
}
