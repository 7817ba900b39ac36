use std::{cell::RefCell, collections::VecDeque, fmt, mem, rc::Rc};

use bytes::Bytes;
use tlswrap_core::{
    CoreError, EventLoop, ReadCallback, ReadEvent, Result, ShutdownCallback, Transport,
    TransportKind, WriteCallback,
};
use tracing::trace;

use crate::error::{
    READ, SHUTDOWN, WRITE, cancelled_error, closed_error, peer_gone_error, write_after_shutdown,
};

/// 端点累计计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// 受理的写请求数。
    pub writes_submitted: u64,
    /// 成功完成的写请求数。
    pub writes_completed: u64,
    /// 送达对端收件箱的字节数。
    pub bytes_written: u64,
    /// 经读回调交付给本端的字节数。
    pub bytes_delivered: u64,
    /// 读回调被调用的次数。
    pub deliveries: u64,
}

enum Inbound {
    Data(Bytes),
    Eof,
    Error(CoreError),
}

struct QueuedWrite {
    data: Bytes,
    on_complete: WriteCallback,
}

#[derive(Default)]
struct Endpoint {
    inbox: VecDeque<Inbound>,
    reading: bool,
    on_read: Option<ReadCallback>,
    delivery_scheduled: bool,
    delivery_chunk: Option<usize>,
    outgoing: VecDeque<QueuedWrite>,
    queued_bytes: usize,
    flush_scheduled: bool,
    saturated: bool,
    write_failure: Option<CoreError>,
    pending_shutdown: Option<ShutdownCallback>,
    write_closed: bool,
    eof_sent: bool,
    closed: bool,
    stats: MemoryStats,
}

struct Shared {
    ends: [RefCell<Endpoint>; 2],
    event_loop: EventLoop,
}

/// 创建一对相连的内存传输端点。
///
/// 一端写入的字节按顺序出现在另一端的读回调中；所有回调都经 `event_loop` 延迟执行。
pub fn pair(event_loop: &EventLoop) -> (MemoryTransport, MemoryTransport) {
    let shared = Rc::new(Shared {
        ends: [RefCell::default(), RefCell::default()],
        event_loop: event_loop.clone(),
    });
    (
        MemoryTransport {
            shared: Rc::clone(&shared),
            side: 0,
        },
        MemoryTransport { shared, side: 1 },
    )
}

/// 内存双工传输端点。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 为流适配器提供一个完全确定的传输：没有套接字、没有线程，所有完成事件都在事件循环里按 FIFO 发生；
/// - 暴露饱和、分块交付、写失败与读错误注入等控制面，用来复现真实网络中难以稳定触发的时序。
///
/// ## 逻辑（How）
/// - 写请求先进入本端 `outgoing` 队列，由延迟任务 `flush` 逐个搬进对端收件箱后再完成回调，
///   因此写完成意味着“对端传输已经收到这些字节”；
/// - 饱和时 `flush` 不搬运任何字节，写请求一直排队，`write_queue_size` 随之增长；
/// - 收件箱每个延迟任务只交付一个块，`read_stop` 在下一块交付之前生效；
/// - 回调总是先从 `RefCell` 中取出再调用，回调内部可以安全地重入本端点。
///
/// ## 契约（What）
/// - 句柄可克隆，克隆共享同一端点；测试通常把一个克隆交给适配器、保留另一个作控制面；
/// - `shutdown` 在所有已受理写完成之后向对端投递 EOF；
/// - `close` 幂等：撤销未完成的写与关闭请求（以取消错误回调），并向对端投递 EOF。
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Rc<Shared>,
    side: usize,
}

impl MemoryTransport {
    fn end(&self) -> &RefCell<Endpoint> {
        &self.shared.ends[self.side]
    }

    fn peer(&self) -> &RefCell<Endpoint> {
        &self.shared.ends[1 - self.side]
    }

    fn handle(&self, side: usize) -> MemoryTransport {
        MemoryTransport {
            shared: Rc::clone(&self.shared),
            side,
        }
    }

    /// 饱和开关：饱和时写请求排队但不搬运、不完成。
    pub fn set_saturated(&self, saturated: bool) {
        self.end().borrow_mut().saturated = saturated;
        if !saturated {
            self.schedule_flush();
        }
    }

    /// 把交付给本端的数据切成至多 `chunk` 字节的块；`None` 表示按写入粒度交付。
    pub fn set_delivery_chunk(&self, chunk: Option<usize>) {
        self.end().borrow_mut().delivery_chunk = chunk.filter(|n| *n > 0);
    }

    /// 之后的写请求（含已排队的）以给定错误失败。
    pub fn fail_writes(&self, error: CoreError) {
        self.end().borrow_mut().write_failure = Some(error);
        self.schedule_flush();
    }

    /// 向本端读路径注入一个错误事件，排在已到达数据之后。
    pub fn inject_read_error(&self, error: CoreError) {
        self.end()
            .borrow_mut()
            .inbox
            .push_back(Inbound::Error(error));
        self.schedule_delivery();
    }

    /// 本端是否处于读取状态。
    pub fn is_reading(&self) -> bool {
        self.end().borrow().reading
    }

    /// 收件箱中尚未交付的字节数。
    pub fn pending_inbound(&self) -> usize {
        self.end()
            .borrow()
            .inbox
            .iter()
            .map(|item| match item {
                Inbound::Data(bytes) => bytes.len(),
                _ => 0,
            })
            .sum()
    }

    /// 本端写方向是否已经关闭。
    pub fn is_write_closed(&self) -> bool {
        self.end().borrow().write_closed
    }

    /// 累计计数快照。
    pub fn stats(&self) -> MemoryStats {
        self.end().borrow().stats
    }

    fn schedule_flush(&self) {
        let mut end = self.end().borrow_mut();
        if end.flush_scheduled || end.closed {
            return;
        }
        end.flush_scheduled = true;
        drop(end);
        let this = self.clone();
        self.shared.event_loop.defer(move || this.flush());
    }

    fn schedule_delivery(&self) {
        let mut end = self.end().borrow_mut();
        if end.delivery_scheduled || end.closed || !end.reading || end.inbox.is_empty() {
            return;
        }
        end.delivery_scheduled = true;
        drop(end);
        let this = self.clone();
        self.shared.event_loop.defer(move || this.deliver());
    }

    /// 把排队的写搬进对端收件箱并完成回调。
    fn flush(&self) {
        let mut completions: Vec<(WriteCallback, Result<()>)> = Vec::new();
        let mut shutdown_done: Option<(ShutdownCallback, Result<()>)> = None;
        {
            let mut end = self.end().borrow_mut();
            end.flush_scheduled = false;
            if end.closed {
                return;
            }
            if let Some(failure) = end.write_failure.clone() {
                for write in mem::take(&mut end.outgoing) {
                    completions.push((write.on_complete, Err(failure.clone())));
                }
                end.queued_bytes = 0;
                if let Some(cb) = end.pending_shutdown.take() {
                    shutdown_done = Some((cb, Err(failure)));
                }
            } else if !end.saturated {
                let mut peer = self.peer().borrow_mut();
                while let Some(write) = end.outgoing.pop_front() {
                    end.queued_bytes -= write.data.len();
                    if peer.closed {
                        completions.push((write.on_complete, Err(peer_gone_error(WRITE))));
                        continue;
                    }
                    end.stats.bytes_written += write.data.len() as u64;
                    end.stats.writes_completed += 1;
                    trace!(side = self.side, bytes = write.data.len(), "pipe write landed");
                    peer.inbox.push_back(Inbound::Data(write.data));
                    completions.push((write.on_complete, Ok(())));
                }
                if end.outgoing.is_empty()
                    && let Some(cb) = end.pending_shutdown.take()
                {
                    if !end.eof_sent && !peer.closed {
                        peer.inbox.push_back(Inbound::Eof);
                    }
                    end.eof_sent = true;
                    shutdown_done = Some((cb, Ok(())));
                }
            }
        }
        self.handle(1 - self.side).schedule_delivery();
        for (cb, result) in completions {
            cb(result);
        }
        if let Some((cb, result)) = shutdown_done {
            cb(result);
        }
    }

    /// 交付收件箱头部的一个块。
    fn deliver(&self) {
        let (event, mut on_read) = {
            let mut end = self.end().borrow_mut();
            end.delivery_scheduled = false;
            if end.closed || !end.reading {
                return;
            }
            let Some(on_read) = end.on_read.take() else {
                return;
            };
            let chunk = end.delivery_chunk;
            let event = match end.inbox.pop_front() {
                Some(Inbound::Data(mut data)) => {
                    if let Some(chunk) = chunk
                        && data.len() > chunk
                    {
                        let rest = data.split_off(chunk);
                        end.inbox.push_front(Inbound::Data(rest));
                    }
                    end.stats.bytes_delivered += data.len() as u64;
                    ReadEvent::Data(data)
                }
                Some(Inbound::Eof) => ReadEvent::Eof,
                Some(Inbound::Error(err)) => ReadEvent::Error(err),
                None => {
                    end.on_read = Some(on_read);
                    return;
                }
            };
            end.stats.deliveries += 1;
            (event, on_read)
        };

        on_read(event);

        {
            let mut end = self.end().borrow_mut();
            // 回调内部可能替换了读回调或关闭了端点。
            if end.on_read.is_none() && !end.closed {
                end.on_read = Some(on_read);
            }
        }
        self.schedule_delivery();
    }
}

impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }

    fn read_start(&mut self, on_read: ReadCallback) -> Result<()> {
        {
            let mut end = self.end().borrow_mut();
            if end.closed {
                return Err(closed_error(READ));
            }
            end.on_read = Some(on_read);
            end.reading = true;
        }
        self.schedule_delivery();
        Ok(())
    }

    fn read_stop(&mut self) -> Result<()> {
        let mut end = self.end().borrow_mut();
        if end.closed {
            return Err(closed_error(READ));
        }
        end.reading = false;
        Ok(())
    }

    fn write(&mut self, data: Bytes, on_complete: WriteCallback) -> Result<()> {
        {
            let mut end = self.end().borrow_mut();
            if end.closed {
                return Err(closed_error(WRITE));
            }
            if end.write_closed {
                return Err(write_after_shutdown(WRITE));
            }
            end.queued_bytes += data.len();
            end.stats.writes_submitted += 1;
            end.outgoing.push_back(QueuedWrite { data, on_complete });
        }
        self.schedule_flush();
        Ok(())
    }

    fn shutdown(&mut self, on_complete: ShutdownCallback) -> Result<()> {
        {
            let mut end = self.end().borrow_mut();
            if end.closed {
                return Err(closed_error(SHUTDOWN));
            }
            if end.write_closed {
                return Err(write_after_shutdown(SHUTDOWN));
            }
            end.write_closed = true;
            end.pending_shutdown = Some(on_complete);
        }
        self.schedule_flush();
        Ok(())
    }

    fn close(&mut self) {
        let (writes, shutdown) = {
            let mut end = self.end().borrow_mut();
            if end.closed {
                return;
            }
            end.closed = true;
            end.reading = false;
            end.on_read = None;
            end.inbox.clear();
            end.queued_bytes = 0;
            let writes = mem::take(&mut end.outgoing);
            let shutdown = end.pending_shutdown.take();
            if !end.eof_sent {
                end.eof_sent = true;
                let mut peer = self.peer().borrow_mut();
                if !peer.closed {
                    peer.inbox.push_back(Inbound::Eof);
                }
            }
            (writes, shutdown)
        };
        trace!(side = self.side, "pipe closed");
        self.handle(1 - self.side).schedule_delivery();
        if writes.is_empty() && shutdown.is_none() {
            return;
        }
        self.shared.event_loop.defer(move || {
            for write in writes {
                (write.on_complete)(Err(cancelled_error(WRITE)));
            }
            if let Some(cb) = shutdown {
                cb(Err(cancelled_error(SHUTDOWN)));
            }
        });
    }

    fn write_queue_size(&self) -> usize {
        self.end().borrow().queued_bytes
    }

    fn is_closed(&self) -> bool {
        self.end().borrow().closed
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.end().borrow();
        f.debug_struct("MemoryTransport")
            .field("side", &self.side)
            .field("reading", &end.reading)
            .field("queued_bytes", &end.queued_bytes)
            .field("saturated", &end.saturated)
            .field("closed", &end.closed)
            .finish()
    }
}
