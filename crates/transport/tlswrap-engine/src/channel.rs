use std::io;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::EngineError;

/// 引擎两侧的密文通道。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 引擎只与内存缓冲交互：入站通道承接传输交付的密文，出站通道承接引擎产出的密文；
/// - 两个通道彼此独立，入站侧可设置上限，使对端的洪泛最终表现为内存预算耗尽，而不是无界增长。
///
/// ## 逻辑（How）
/// - 以 `BytesMut` 为后端，追加写入尾部，消费从头部 `advance`；
/// - `take` 通过 `split_to` 零拷贝切出前缀并冻结为 `Bytes`，交给传输写入。
///
/// ## 契约（What）
/// - 写入通道的字节要么被消费，要么继续留在通道中，绝不会被静默丢弃；
/// - `limit` 只约束 `append`；引擎内部通过 [`CipherChannel::sink`] 写入的出站密文不受上限约束，
///   因为出站字节必须全部送达传输。
#[derive(Debug)]
pub(crate) struct CipherChannel {
    buf: BytesMut,
    limit: Option<usize>,
    total: u64,
}

impl CipherChannel {
    pub(crate) fn bounded(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit: Some(limit),
            total: 0,
        }
    }

    pub(crate) fn unbounded() -> Self {
        Self {
            buf: BytesMut::new(),
            limit: None,
            total: 0,
        }
    }

    /// 追加字节；超过上限时整体拒绝，通道保持原样。
    pub(crate) fn append(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if let Some(limit) = self.limit
            && self.buf.len().saturating_add(data.len()) > limit
        {
            return Err(EngineError::ChannelOverflow { limit });
        }
        self.buf.extend_from_slice(data);
        self.total += data.len() as u64;
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// 累计写入通道的字节数。
    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    /// 切出至多 `cap` 字节。
    pub(crate) fn take(&mut self, cap: usize) -> Bytes {
        let n = cap.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    /// 以 `io::Read` 形式消费通道头部。
    pub(crate) fn source(&mut self) -> impl io::Read + '_ {
        (&mut self.buf).reader()
    }

    /// 以 `io::Write` 形式追加到通道尾部，不检查上限。
    pub(crate) fn sink(&mut self) -> CountingSink<'_> {
        CountingSink { channel: self }
    }
}

/// 写入出站通道并累计总量的适配器。
pub(crate) struct CountingSink<'a> {
    channel: &'a mut CipherChannel,
}

impl io::Write for CountingSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.channel.buf.extend_from_slice(data);
        self.channel.total += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn bounded_append_rejects_whole_chunk() {
        let mut channel = CipherChannel::bounded(4);
        channel.append(b"abc").unwrap();
        let err = channel.append(b"de").unwrap_err();
        assert!(matches!(err, EngineError::ChannelOverflow { limit: 4 }));
        assert_eq!(channel.len(), 3);
        channel.append(b"d").unwrap();
        assert_eq!(channel.total(), 4);
    }

    #[test]
    fn source_consumes_and_take_splits_prefix() {
        let mut channel = CipherChannel::unbounded();
        channel.sink().write_all(b"hello world").unwrap();
        let mut head = [0u8; 6];
        channel.source().read_exact(&mut head).unwrap();
        assert_eq!(&head, b"hello ");
        assert_eq!(channel.take(3), Bytes::from_static(b"wor"));
        assert_eq!(channel.take(100), Bytes::from_static(b"ld"));
        assert!(channel.is_empty());
        assert_eq!(channel.total(), 11);
    }
}
