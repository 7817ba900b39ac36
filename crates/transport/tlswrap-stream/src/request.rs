use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use tlswrap_core::{AsyncId, ShutdownCallback, WriteCallback};

/// 调用方写请求。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 明文以 `Bytes` 持有，调用方交出所有权后缓冲在完成前一直有效；
/// - `next_slice`/`advance` 按引擎实际受理的字节数前移，部分受理不产生任何可见错误；
/// - `tx_seq` 记录承载本请求最后一段密文的传输写序号，该序号完成后请求才算完成。
pub(crate) struct PendingWrite {
    pub(crate) id: AsyncId,
    chunks: VecDeque<Bytes>,
    remaining: usize,
    pub(crate) tx_seq: u64,
    pub(crate) on_complete: WriteCallback,
}

impl PendingWrite {
    pub(crate) fn new(id: AsyncId, buffers: Vec<Bytes>, on_complete: WriteCallback) -> Self {
        let chunks: VecDeque<Bytes> = buffers.into_iter().filter(|b| !b.is_empty()).collect();
        let remaining = chunks.iter().map(Bytes::len).sum();
        Self {
            id,
            chunks,
            remaining,
            tx_seq: 0,
            on_complete,
        }
    }

    /// 尚未交给引擎的明文字节数。
    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    pub(crate) fn is_pushed(&self) -> bool {
        self.remaining == 0
    }

    /// 下一段待推送明文，至多 `cap` 字节。
    ///
    /// 首个缓冲足够时零拷贝切片；否则把后续缓冲拼接起来，避免每个小缓冲各成一条记录。
    pub(crate) fn next_slice(&self, cap: usize) -> Bytes {
        let Some(front) = self.chunks.front() else {
            return Bytes::new();
        };
        if front.len() >= cap || self.chunks.len() == 1 {
            return front.slice(..front.len().min(cap));
        }
        let mut gathered = BytesMut::with_capacity(cap.min(self.remaining));
        for chunk in &self.chunks {
            let take = chunk.len().min(cap - gathered.len());
            gathered.extend_from_slice(&chunk[..take]);
            if gathered.len() == cap {
                break;
            }
        }
        gathered.freeze()
    }

    pub(crate) fn advance(&mut self, mut n: usize) {
        self.remaining = self.remaining.saturating_sub(n);
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let step = n.min(front.len());
            front.advance(step);
            n -= step;
            if front.is_empty() {
                self.chunks.pop_front();
            }
        }
    }
}

/// 调用方关闭写方向的请求。
pub(crate) struct ShutdownRequest {
    pub(crate) id: AsyncId,
    pub(crate) on_complete: ShutdownCallback,
}
