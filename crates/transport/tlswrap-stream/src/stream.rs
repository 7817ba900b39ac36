use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
};

use bytes::Bytes;
use tlswrap_core::{
    AsyncId, BackpressureClassifier, BackpressureMetrics, CloseCallback, CoreError, EventLoop,
    HookRegistry, Pool, PoolHandle, ProviderType, ReadCallback, ReadEvent, Result,
    ShutdownCallback, StreamConfig, Transport, TransportKind, WatermarkClassifier, WriteCallback,
};
use tlswrap_engine::{
    DriveReport, EngineError, EngineFactory, EngineLimits, InboundState, SessionInfo, TlsEngine,
};
use tracing::{debug, trace};

use crate::{
    error::{HANDSHAKE, OperationKind, READ, SHUTDOWN, START, WRITE},
    error::{cancelled_error, closed_error, invalid_state},
    request::{PendingWrite, ShutdownRequest},
    state::{StreamState, StreamStats},
};

/// 握手完成（或失败）时的一次性通知。
pub type HandshakeCallback = Box<dyn FnOnce(Result<SessionInfo>)>;

/// 待派发给调用方的完成通知。
enum Notice {
    Write {
        id: AsyncId,
        on_complete: WriteCallback,
        result: Result<()>,
    },
    Shutdown {
        id: AsyncId,
        on_complete: ShutdownCallback,
        result: Result<()>,
    },
    Handshake {
        on_handshake: HandshakeCallback,
        result: Result<SessionInfo>,
    },
    Closed {
        on_close: CloseCallback,
    },
}

enum Delivery {
    Notice(Notice),
    Read(ReadEvent, ReadCallback),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ShutdownStage {
    Idle,
    Requested,
    /// close_notify 已交给传输，等待其写完成。
    Flushing,
    Forwarded,
    Done,
}

/// 把任意双工传输包装为明文双工流的 TLS 适配器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方看到的是一条普通的明文流：`read_start` / `write` / `shutdown` / `close`，
///   与底层 [`Transport`] 的契约一一对应，只是载荷从密文变成了明文；
/// - 三类相互独立的事件（传输读完成、传输写完成、调用方请求）都汇入同一个“泵”，
///   由泵把字节在引擎与传输之间搬运到静默为止。
///
/// ## 逻辑（How）
/// 1. **入站**：传输交付的密文喂进引擎，随后反复 `drive` → 刷出站 → 取明文，直到既无消费也无产出；
///    同一密文块里的多条记录、以及握手或密钥更新产生的回应密文都在这一轮内处理，
///    回应密文按产生顺序交给传输；
/// 2. **出站**：握手完成后，按提交顺序把写请求的明文推给引擎；每推一段立即把密文交给传输，
///    传输写按序号记账，写请求在承载其最后一段密文的传输写完成后才算完成；
/// 3. **背压**：推送前用 [`WatermarkClassifier`] 评估“传输队列 + 出站积压”，超过高水位即停止推送，
///    等传输写完成回调再次触发泵；
/// 4. **关闭写方向**：所有写请求推送完毕后排队 close_notify 并刷出，等承载它的传输写完成，
///    再把 `shutdown` 转交给传输；
/// 5. **对端关闭**：交付 [`ReadEvent::Eof`] 后连接进入 `Closed`，不再受理写与关闭请求；
///    干净关闭时按第 4 步回送 close_notify，已受理的写送达后释放引擎并关闭传输；
/// 6. **通知**：调用方回调一律先进入通知队列，在不持有任何内部借用时由派发循环执行，
///    并以生命周期钩子包裹。源自调用方 API 的通知经事件循环延迟派发，源自传输回调的通知就地派发。
///
/// ## 契约（What）
/// - 握手无需显式启动：首次 `read_start`、`write`/`writev` 或 `shutdown` 即开始握手，
///   `start` 只是提前触发；
/// - 写请求按提交顺序完成；明文按记录到达顺序交付；
/// - `read_stop` 在下一段明文交付前生效，已解密但未交付的明文留在连接内，下次 `read_start` 继续交付；
/// - 致命错误（传输错误、TLS 协议错误、截断、内存耗尽）立即关闭传输，不再写出任何字节，
///   所有未完成的写与关闭请求以该错误失败，读回调收到 [`ReadEvent::Error`]；
/// - 非法状态下的调用同步返回 `Err`，此时回调不会被调用；
/// - 引擎随连接终止被释放且只释放一次。
///
/// ## 风险与权衡（Trade-offs）
/// - 单线程模型：句柄是 `Rc`，只能在创建它的事件循环线程上使用；
/// - 读回调若捕获流句柄自身会形成引用环，调用方应在结束时 `close`。
#[derive(Clone)]
pub struct TlsStream {
    inner: Rc<StreamInner>,
}

struct StreamInner {
    id: AsyncId,
    event_loop: EventLoop,
    hooks: HookRegistry,
    core: RefCell<StreamCore>,
    pumping: Cell<bool>,
    pump_again: Cell<bool>,
    dispatching: Cell<bool>,
    dispatch_scheduled: Cell<bool>,
    destroyed: Cell<bool>,
}

struct StreamCore {
    id: AsyncId,
    this: Weak<StreamInner>,
    transport: Box<dyn Transport>,
    engine: Option<TlsEngine>,
    config: StreamConfig,
    classifier: WatermarkClassifier,
    started: bool,
    handshake_done: bool,
    on_handshake: Option<HandshakeCallback>,
    session: Option<SessionInfo>,
    caller_reading: bool,
    on_read: Option<ReadCallback>,
    inbox: VecDeque<ReadEvent>,
    transport_reading: bool,
    transport_eof: bool,
    eof_delivered: bool,
    writes: Pool<PendingWrite>,
    unpushed: VecDeque<PoolHandle>,
    in_flight: VecDeque<PoolHandle>,
    tx_submitted: u64,
    tx_completed: u64,
    shutdown: Option<ShutdownRequest>,
    shutdown_stage: ShutdownStage,
    failure: Option<CoreError>,
    closed: bool,
    /// 对端关闭后连接已收尾：引擎已释放，传输已关闭。
    released: bool,
    notices: VecDeque<Notice>,
    stats: StreamStats,
}

impl TlsStream {
    /// 用已构造的引擎包装传输。
    ///
    /// 传输由流独占；连接以 `ProviderType::TlsWrap` 向钩子报告创建。
    pub fn new(
        event_loop: &EventLoop,
        transport: Box<dyn Transport>,
        engine: TlsEngine,
        config: StreamConfig,
        hooks: HookRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let id = AsyncId::next();
        let role = engine.role();
        let kind = transport.kind();
        let classifier = config.classifier();
        let inner = Rc::new_cyclic(|this| StreamInner {
            id,
            event_loop: event_loop.clone(),
            hooks,
            core: RefCell::new(StreamCore {
                id,
                this: this.clone(),
                transport,
                engine: Some(engine),
                config,
                classifier,
                started: false,
                handshake_done: false,
                on_handshake: None,
                session: None,
                caller_reading: false,
                on_read: None,
                inbox: VecDeque::new(),
                transport_reading: false,
                transport_eof: false,
                eof_delivered: false,
                writes: Pool::new(ProviderType::WriteWrap),
                unpushed: VecDeque::new(),
                in_flight: VecDeque::new(),
                tx_submitted: 0,
                tx_completed: 0,
                shutdown: None,
                shutdown_stage: ShutdownStage::Idle,
                failure: None,
                closed: false,
                released: false,
                notices: VecDeque::new(),
                stats: StreamStats::default(),
            }),
            pumping: Cell::new(false),
            pump_again: Cell::new(false),
            dispatching: Cell::new(false),
            dispatch_scheduled: Cell::new(false),
            destroyed: Cell::new(false),
        });
        inner.hooks.emit_init(id, ProviderType::TlsWrap, None);
        debug!(conn = id.get(), ?role, transport = %kind, "tls stream created");
        Ok(Self { inner })
    }

    /// 以工厂当前的配置快照构造引擎，再包装传输。
    pub fn from_factory(
        event_loop: &EventLoop,
        transport: Box<dyn Transport>,
        factory: &EngineFactory,
        config: StreamConfig,
        hooks: HookRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let engine = TlsEngine::new(&factory.snapshot(), EngineLimits::from(&config))?;
        Self::new(event_loop, transport, engine, config, hooks)
    }

    /// 提前开始握手：发起方立即送出首段握手记录，握手期间始终保持传输读取。
    ///
    /// 握手已开始时不做任何事。
    pub fn start(&self) -> Result<()> {
        {
            let mut core = self.inner.core.borrow_mut();
            core.ensure_open(START)?;
            core.begin_handshake();
        }
        self.inner.pump();
        self.inner.schedule_dispatch();
        Ok(())
    }

    /// 注册握手完成通知；握手已结束时通知仍异步送达。
    pub fn on_handshake(&self, on_handshake: HandshakeCallback) -> Result<()> {
        {
            let mut core = self.inner.core.borrow_mut();
            core.ensure_open(HANDSHAKE)?;
            if let Some(failure) = core.failure.clone() {
                core.notices.push_back(Notice::Handshake {
                    on_handshake,
                    result: Err(failure),
                });
            } else if let Some(session) = core.session.clone() {
                core.notices.push_back(Notice::Handshake {
                    on_handshake,
                    result: Ok(session),
                });
            } else {
                core.on_handshake = Some(on_handshake);
            }
        }
        self.inner.schedule_dispatch();
        Ok(())
    }

    /// 开始向 `on_read` 交付明文；重复调用替换回调。
    pub fn read_start(&self, on_read: ReadCallback) -> Result<()> {
        {
            let mut core = self.inner.core.borrow_mut();
            core.ensure_open(READ)?;
            core.on_read = Some(on_read);
            core.caller_reading = true;
            core.begin_handshake();
        }
        self.inner.pump();
        self.inner.schedule_dispatch();
        Ok(())
    }

    /// 停止交付明文；握手完成后同时暂停传输读取。
    pub fn read_stop(&self) -> Result<()> {
        {
            let mut core = self.inner.core.borrow_mut();
            core.ensure_open(READ)?;
            core.caller_reading = false;
        }
        self.inner.pump();
        Ok(())
    }

    /// 提交一段明文。
    pub fn write(&self, data: Bytes, on_complete: WriteCallback) -> Result<()> {
        self.writev(vec![data], on_complete)
    }

    /// 提交一组明文，整组完成后回调一次。
    pub fn writev(&self, buffers: Vec<Bytes>, on_complete: WriteCallback) -> Result<()> {
        let id = AsyncId::next();
        {
            let mut core = self.inner.core.borrow_mut();
            core.ensure_writable(WRITE)?;
            core.begin_handshake();
            let request = PendingWrite::new(id, buffers, on_complete);
            trace!(
                conn = core.id.get(),
                write = id.get(),
                bytes = request.remaining(),
                "write queued"
            );
            let handle = core.writes.insert(request);
            core.unpushed.push_back(handle);
        }
        self.inner
            .hooks
            .emit_init(id, ProviderType::WriteWrap, Some(self.inner.id));
        self.inner.pump();
        self.inner.schedule_dispatch();
        Ok(())
    }

    /// 关闭写方向：已提交的写全部送出后发送 close_notify，再关闭传输写方向。
    ///
    /// 连接已因错误终止时，请求以该错误异步完成。
    pub fn shutdown(&self, on_complete: ShutdownCallback) -> Result<()> {
        let id = AsyncId::next();
        {
            let mut core = self.inner.core.borrow_mut();
            core.ensure_open(SHUTDOWN)?;
            if core.eof_delivered && core.failure.is_none() {
                return Err(closed_error(SHUTDOWN));
            }
            if core.shutdown_stage != ShutdownStage::Idle {
                return Err(invalid_state(SHUTDOWN, "shutdown already requested"));
            }
            if let Some(failure) = core.failure.clone() {
                core.shutdown_stage = ShutdownStage::Done;
                core.notices.push_back(Notice::Shutdown {
                    id,
                    on_complete,
                    result: Err(failure),
                });
            } else {
                core.shutdown_stage = ShutdownStage::Requested;
                core.shutdown = Some(ShutdownRequest { id, on_complete });
                core.begin_handshake();
                debug!(conn = core.id.get(), "tls shutdown requested");
            }
        }
        self.inner
            .hooks
            .emit_init(id, ProviderType::ShutdownWrap, Some(self.inner.id));
        self.inner.pump();
        self.inner.schedule_dispatch();
        Ok(())
    }

    /// 立即关闭连接，幂等。
    ///
    /// 未完成的写、关闭与握手通知以取消错误结束，随后异步调用 `on_close`。
    pub fn close(&self, on_close: CloseCallback) {
        {
            let mut core = self.inner.core.borrow_mut();
            core.close_now();
            core.notices.push_back(Notice::Closed { on_close });
        }
        self.inner.schedule_dispatch();
    }

    /// 握手结果；握手完成前为 `None`。
    pub fn session(&self) -> Option<SessionInfo> {
        self.inner.core.borrow().session.clone()
    }

    pub fn state(&self) -> StreamState {
        self.inner.core.borrow().state()
    }

    /// 连接的异步资源标识。
    pub fn id(&self) -> AsyncId {
        self.inner.id
    }

    /// 尚未送达的字节数：未推送的明文、出站积压与传输写队列之和。
    pub fn write_queue_size(&self) -> usize {
        self.inner.core.borrow().write_queue_size()
    }

    pub fn stats(&self) -> StreamStats {
        let core = self.inner.core.borrow();
        StreamStats {
            write_requests: core.writes.stats(),
            ..core.stats
        }
    }

    /// 连接终止时的错误。
    pub fn failure(&self) -> Option<CoreError> {
        self.inner.core.borrow().failure.clone()
    }
}

impl Transport for TlsStream {
    fn kind(&self) -> TransportKind {
        TransportKind::Tls
    }

    fn read_start(&mut self, on_read: ReadCallback) -> Result<()> {
        TlsStream::read_start(self, on_read)
    }

    fn read_stop(&mut self) -> Result<()> {
        TlsStream::read_stop(self)
    }

    fn write(&mut self, data: Bytes, on_complete: WriteCallback) -> Result<()> {
        TlsStream::write(self, data, on_complete)
    }

    fn shutdown(&mut self, on_complete: ShutdownCallback) -> Result<()> {
        TlsStream::shutdown(self, on_complete)
    }

    fn close(&mut self) {
        TlsStream::close(self, Box::new(|| {}))
    }

    fn write_queue_size(&self) -> usize {
        TlsStream::write_queue_size(self)
    }

    fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }
}

impl fmt::Debug for TlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.borrow();
        f.debug_struct("TlsStream")
            .field("id", &self.inner.id)
            .field("state", &core.state())
            .field("queued_writes", &core.unpushed.len())
            .field("in_flight", &core.in_flight.len())
            .finish()
    }
}

impl StreamInner {
    /// 泵入口；重入时只记下“需要再泵一轮”。
    fn pump(&self) {
        if self.pumping.replace(true) {
            self.pump_again.set(true);
            return;
        }
        loop {
            self.pump_again.set(false);
            self.core.borrow_mut().pump();
            if !self.pump_again.get() {
                break;
            }
        }
        self.pumping.set(false);
    }

    fn schedule_dispatch(self: &Rc<Self>) {
        if self.dispatch_scheduled.replace(true) {
            return;
        }
        let inner = Rc::clone(self);
        self.event_loop.defer(move || {
            inner.dispatch_scheduled.set(false);
            inner.dispatch();
        });
    }

    /// 在不持有内部借用的前提下逐个执行通知。
    fn dispatch(&self) {
        if self.dispatching.replace(true) {
            return;
        }
        loop {
            let next = self.core.borrow_mut().next_delivery();
            let Some(delivery) = next else {
                break;
            };
            match delivery {
                Delivery::Read(event, mut on_read) => {
                    {
                        let _scope = self.hooks.enter(self.id);
                        on_read(event);
                    }
                    self.core.borrow_mut().restore_reader(on_read);
                }
                Delivery::Notice(Notice::Write {
                    id,
                    on_complete,
                    result,
                }) => {
                    {
                        let _scope = self.hooks.enter(id);
                        on_complete(result);
                    }
                    self.hooks.emit_destroy(id);
                }
                Delivery::Notice(Notice::Shutdown {
                    id,
                    on_complete,
                    result,
                }) => {
                    {
                        let _scope = self.hooks.enter(id);
                        on_complete(result);
                    }
                    self.hooks.emit_destroy(id);
                }
                Delivery::Notice(Notice::Handshake {
                    on_handshake,
                    result,
                }) => {
                    let _scope = self.hooks.enter(self.id);
                    on_handshake(result);
                }
                Delivery::Notice(Notice::Closed { on_close }) => {
                    {
                        let _scope = self.hooks.enter(self.id);
                        on_close();
                    }
                    if !self.destroyed.replace(true) {
                        self.hooks.emit_destroy(self.id);
                        debug!(conn = self.id.get(), "tls stream destroyed");
                    }
                }
            }
        }
        self.dispatching.set(false);
    }

    fn on_transport_read(&self, event: ReadEvent) {
        self.core.borrow_mut().accept_read(event);
        self.pump();
        self.dispatch();
    }

    fn on_transport_written(&self, seq: u64, result: Result<()>) {
        {
            let mut core = self.core.borrow_mut();
            match result {
                Ok(()) => core.acknowledge(seq),
                Err(err) => core.fail(err),
            }
        }
        self.pump();
        self.dispatch();
    }

    fn on_transport_shutdown(&self, result: Result<()>) {
        self.core.borrow_mut().finish_shutdown(result);
        self.pump();
        self.dispatch();
    }
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if !core.closed {
            core.closed = true;
            core.engine = None;
            if !core.released {
                core.transport.close();
            }
        }
        if !self.destroyed.get() {
            self.hooks.emit_destroy(self.id);
        }
    }
}

impl StreamCore {
    fn state(&self) -> StreamState {
        if self.closed || self.released || self.eof_delivered || self.failure.is_some() {
            StreamState::Closed
        } else if self.shutdown_stage != ShutdownStage::Idle {
            StreamState::ShuttingDown
        } else if self.handshake_done {
            StreamState::Established
        } else if self.started {
            StreamState::Handshaking
        } else {
            StreamState::NotStarted
        }
    }

    /// 调用方关闭、致命错误或对端关闭收尾之后，不再处理任何传输事件。
    fn terminated(&self) -> bool {
        self.closed || self.released || self.failure.is_some()
    }

    fn begin_handshake(&mut self) {
        if !self.started {
            self.started = true;
            debug!(conn = self.id.get(), "tls handshake started");
        }
    }

    fn ensure_open(&self, kind: OperationKind) -> Result<()> {
        if self.closed {
            return Err(closed_error(kind));
        }
        Ok(())
    }

    fn ensure_writable(&self, kind: OperationKind) -> Result<()> {
        self.ensure_open(kind)?;
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.eof_delivered {
            return Err(closed_error(kind));
        }
        if self.shutdown_stage != ShutdownStage::Idle {
            return Err(invalid_state(kind, "write side already shut down"));
        }
        Ok(())
    }

    fn write_queue_size(&self) -> usize {
        let unpushed: usize = self
            .unpushed
            .iter()
            .filter_map(|handle| self.writes.get(*handle))
            .map(PendingWrite::remaining)
            .sum();
        let outbound = self.engine.as_ref().map_or(0, TlsEngine::pending_outbound);
        let transport = if self.closed || self.released {
            0
        } else {
            self.transport.write_queue_size()
        };
        unpushed + outbound + transport
    }

    fn metrics(&self) -> BackpressureMetrics {
        BackpressureMetrics {
            queued_writes: self.unpushed.len(),
            transport_queue_bytes: self.transport.write_queue_size(),
            outbound_bytes: self.engine.as_ref().map_or(0, TlsEngine::pending_outbound),
        }
    }

    fn pump(&mut self) {
        if let Err(err) = self.advance() {
            self.fail(err);
        }
    }

    fn advance(&mut self) -> Result<()> {
        if !self.started || self.engine.is_none() {
            return Ok(());
        }
        self.process_inbound()?;
        self.push_writes()?;
        self.complete_writes();
        self.advance_shutdown()?;
        self.release_after_eof();
        self.update_transport_reading()
    }

    fn accept_read(&mut self, event: ReadEvent) {
        if self.terminated() {
            return;
        }
        match event {
            ReadEvent::Data(chunk) => {
                self.stats.ciphertext_received += chunk.len() as u64;
                trace!(conn = self.id.get(), bytes = chunk.len(), "ciphertext received");
                let fed = match self.engine.as_mut() {
                    Some(engine) => engine.feed_ciphertext(&chunk),
                    None => return,
                };
                if let Err(err) = fed {
                    self.fail(err.into());
                }
            }
            ReadEvent::Eof => {
                debug!(conn = self.id.get(), "transport eof");
                self.transport_eof = true;
                // 传输已不会再交付数据，读取标志随之失效。
                self.transport_reading = false;
                if let Some(engine) = self.engine.as_mut() {
                    engine.feed_eof();
                }
            }
            ReadEvent::Error(err) => self.fail(err),
        }
    }

    /// 反复驱动引擎直到既无消费、无产出，也取不到明文。
    fn process_inbound(&mut self) -> Result<()> {
        loop {
            let report = match self.engine.as_mut() {
                Some(engine) => engine.drive()?,
                None => return Ok(()),
            };
            self.flush_outbound()?;
            self.observe_handshake();
            let pulled = self.pull_plaintext()?;
            if !report.made_progress() && pulled == 0 {
                return self.observe_eof(&report);
            }
        }
    }

    fn observe_handshake(&mut self) {
        if self.handshake_done {
            return;
        }
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        if engine.is_handshaking() {
            return;
        }
        let session = engine.session();
        self.handshake_done = true;
        debug!(
            conn = self.id.get(),
            version = ?session.protocol_version,
            suite = ?session.cipher_suite,
            "tls handshake complete"
        );
        if let Some(on_handshake) = self.on_handshake.take() {
            self.notices.push_back(Notice::Handshake {
                on_handshake,
                result: Ok(session.clone()),
            });
        }
        self.session = Some(session);
    }

    fn pull_plaintext(&mut self) -> Result<usize> {
        if !self.caller_reading {
            return Ok(0);
        }
        let Some(engine) = self.engine.as_mut() else {
            return Ok(0);
        };
        let mut pulled = 0;
        loop {
            let chunk = engine.pull_plaintext(self.config.read_chunk_size)?;
            if chunk.is_empty() {
                break;
            }
            pulled += chunk.len();
            self.inbox.push_back(ReadEvent::Data(chunk));
        }
        if pulled > 0 {
            self.stats.plaintext_read += pulled as u64;
            trace!(conn = self.id.get(), bytes = pulled, "plaintext decrypted");
        }
        Ok(pulled)
    }

    /// 明文取尽后判定读方向是否结束。
    fn observe_eof(&mut self, report: &DriveReport) -> Result<()> {
        if self.eof_delivered || report.plaintext_ready > 0 {
            return Ok(());
        }
        let Some(engine) = self.engine.as_ref() else {
            return Ok(());
        };
        let clean = match engine.inbound_state() {
            InboundState::Open => return Ok(()),
            InboundState::Closed => true,
            InboundState::Truncated => false,
        };
        if !clean && (!self.handshake_done || !self.config.allow_truncated_eof) {
            return Err(EngineError::Truncated.into());
        }
        self.eof_delivered = true;
        debug!(conn = self.id.get(), clean, "tls read side finished");
        self.inbox.push_back(ReadEvent::Eof);
        // 干净关闭时回送 close_notify；截断时对端传输已不可写。
        if clean && self.handshake_done && self.shutdown_stage == ShutdownStage::Idle {
            self.shutdown_stage = ShutdownStage::Requested;
        }
        Ok(())
    }

    /// 把出站通道中的全部密文作为一次传输写交出。
    fn flush_outbound(&mut self) -> Result<()> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(());
        };
        if engine.pending_outbound() == 0 {
            return Ok(());
        }
        let ciphertext = engine.drain_outbound(usize::MAX);
        let bytes = ciphertext.len();
        let seq = self.tx_submitted + 1;
        let this = self.this.clone();
        self.transport.write(
            ciphertext,
            Box::new(move |result| {
                if let Some(inner) = this.upgrade() {
                    inner.on_transport_written(seq, result);
                }
            }),
        )?;
        self.tx_submitted = seq;
        self.stats.transport_writes += 1;
        self.stats.ciphertext_sent += bytes as u64;
        trace!(conn = self.id.get(), seq, bytes, "ciphertext handed to transport");
        Ok(())
    }

    /// 按提交顺序推送明文，直到写队列为空、下游积压或引擎暂不受理。
    fn push_writes(&mut self) -> Result<()> {
        if !self.handshake_done {
            return Ok(());
        }
        while let Some(&handle) = self.unpushed.front() {
            let decision = self.classifier.classify(&self.metrics());
            if !decision.is_ready() {
                self.stats.backpressure_stalls += 1;
                trace!(
                    conn = self.id.get(),
                    ?decision,
                    queued = self.unpushed.len(),
                    "plaintext push deferred"
                );
                break;
            }
            let Some(engine) = self.engine.as_mut() else {
                break;
            };
            let Some(write) = self.writes.get_mut(handle) else {
                self.unpushed.pop_front();
                continue;
            };
            let accepted = if write.is_pushed() {
                0
            } else {
                engine.push_plaintext(&write.next_slice(self.config.max_write_chunk))?
            };
            write.advance(accepted);
            let pushed = write.is_pushed();
            self.stats.plaintext_written += accepted as u64;
            self.flush_outbound()?;
            if pushed {
                let seq = self.tx_submitted;
                if let Some(write) = self.writes.get_mut(handle) {
                    write.tx_seq = seq;
                }
                self.unpushed.pop_front();
                self.in_flight.push_back(handle);
            } else if accepted == 0 {
                break;
            }
        }
        Ok(())
    }

    fn acknowledge(&mut self, seq: u64) {
        if self.terminated() {
            return;
        }
        self.tx_completed = self.tx_completed.max(seq);
        self.stats.transport_writes_completed += 1;
    }

    /// 承载最后一段密文的传输写已完成的请求依次完成。
    fn complete_writes(&mut self) {
        while let Some(&handle) = self.in_flight.front() {
            let done = self
                .writes
                .get(handle)
                .is_none_or(|write| write.tx_seq <= self.tx_completed);
            if !done {
                break;
            }
            self.in_flight.pop_front();
            if let Some(write) = self.writes.remove(handle) {
                self.notices.push_back(Notice::Write {
                    id: write.id,
                    on_complete: write.on_complete,
                    result: Ok(()),
                });
            }
        }
    }

    fn advance_shutdown(&mut self) -> Result<()> {
        if self.shutdown_stage == ShutdownStage::Requested
            && self.handshake_done
            && self.unpushed.is_empty()
        {
            let Some(engine) = self.engine.as_mut() else {
                return Ok(());
            };
            engine.close_notify()?;
            self.flush_outbound()?;
            self.shutdown_stage = ShutdownStage::Flushing;
            debug!(conn = self.id.get(), "close_notify flushed");
        }
        if self.shutdown_stage != ShutdownStage::Flushing
            || self.tx_completed < self.tx_submitted
        {
            return Ok(());
        }
        let this = self.this.clone();
        self.transport.shutdown(Box::new(move |result| {
            if let Some(inner) = this.upgrade() {
                inner.on_transport_shutdown(result);
            }
        }))?;
        self.shutdown_stage = ShutdownStage::Forwarded;
        debug!(conn = self.id.get(), "transport shutdown requested");
        Ok(())
    }

    fn finish_shutdown(&mut self, result: Result<()>) {
        if self.shutdown_stage != ShutdownStage::Forwarded {
            return;
        }
        self.shutdown_stage = ShutdownStage::Done;
        if let Some(request) = self.shutdown.take() {
            self.notices.push_back(Notice::Shutdown {
                id: request.id,
                on_complete: request.on_complete,
                result: result.clone(),
            });
        }
        if let Err(err) = result {
            self.fail(err);
        }
    }

    /// 对端关闭后，已受理的写与关闭请求都完成时释放引擎并关闭传输。
    ///
    /// 握手未完成时写请求无法推进，直接以关闭错误结束。
    fn release_after_eof(&mut self) {
        if !self.eof_delivered || self.terminated() {
            return;
        }
        let writes_pending = !self.unpushed.is_empty()
            || !self.in_flight.is_empty()
            || self.tx_completed < self.tx_submitted;
        let shutdown_pending = matches!(
            self.shutdown_stage,
            ShutdownStage::Requested | ShutdownStage::Flushing | ShutdownStage::Forwarded
        );
        if self.handshake_done && (writes_pending || shutdown_pending) {
            return;
        }
        debug!(conn = self.id.get(), "tls stream released after peer close");
        self.released = true;
        self.engine = None;
        self.transport_reading = false;
        self.transport.close();
        self.abort_requests(
            closed_error(WRITE),
            closed_error(SHUTDOWN),
            closed_error(HANDSHAKE),
        );
    }

    /// 握手期间或调用方读取时保持传输读取。
    fn update_transport_reading(&mut self) -> Result<()> {
        let want = self.started
            && !self.terminated()
            && !self.transport_eof
            && (!self.handshake_done || self.caller_reading);
        if want == self.transport_reading {
            return Ok(());
        }
        if want {
            let this = self.this.clone();
            self.transport.read_start(Box::new(move |event| {
                if let Some(inner) = this.upgrade() {
                    inner.on_transport_read(event);
                }
            }))?;
        } else {
            self.transport.read_stop()?;
        }
        self.transport_reading = want;
        trace!(conn = self.id.get(), reading = want, "transport reading toggled");
        Ok(())
    }

    /// 致命错误：释放引擎、关闭传输，并把错误扇出给所有未完成的请求。
    fn fail(&mut self, error: CoreError) {
        if self.terminated() {
            return;
        }
        debug!(
            conn = self.id.get(),
            code = error.code(),
            error = %error,
            "tls stream failed"
        );
        self.failure = Some(error.clone());
        self.engine = None;
        self.transport_reading = false;
        self.transport.close();
        self.abort_requests(error.clone(), error.clone(), error.clone());
        self.inbox.push_back(ReadEvent::Error(error));
    }

    fn close_now(&mut self) {
        if self.closed {
            return;
        }
        debug!(conn = self.id.get(), state = %self.state(), "tls stream closing");
        self.closed = true;
        self.caller_reading = false;
        self.on_read = None;
        self.inbox.clear();
        self.engine = None;
        self.transport_reading = false;
        if !self.released {
            self.transport.close();
        }
        self.abort_requests(
            cancelled_error(WRITE),
            cancelled_error(SHUTDOWN),
            cancelled_error(HANDSHAKE),
        );
    }

    fn abort_requests(&mut self, write: CoreError, shutdown: CoreError, handshake: CoreError) {
        let handles: Vec<PoolHandle> = self
            .in_flight
            .drain(..)
            .chain(self.unpushed.drain(..))
            .collect();
        for handle in handles {
            if let Some(request) = self.writes.remove(handle) {
                self.notices.push_back(Notice::Write {
                    id: request.id,
                    on_complete: request.on_complete,
                    result: Err(write.clone()),
                });
            }
        }
        if let Some(request) = self.shutdown.take() {
            self.notices.push_back(Notice::Shutdown {
                id: request.id,
                on_complete: request.on_complete,
                result: Err(shutdown),
            });
        }
        if self.shutdown_stage != ShutdownStage::Idle {
            self.shutdown_stage = ShutdownStage::Done;
        }
        if let Some(on_handshake) = self.on_handshake.take() {
            self.notices.push_back(Notice::Handshake {
                on_handshake,
                result: Err(handshake),
            });
        }
    }

    fn next_delivery(&mut self) -> Option<Delivery> {
        if let Some(notice) = self.notices.pop_front() {
            return Some(Delivery::Notice(notice));
        }
        if !self.caller_reading || self.inbox.is_empty() {
            return None;
        }
        let on_read = self.on_read.take()?;
        match self.inbox.pop_front() {
            Some(event) => Some(Delivery::Read(event, on_read)),
            None => {
                self.on_read = Some(on_read);
                None
            }
        }
    }

    fn restore_reader(&mut self, on_read: ReadCallback) {
        // 回调内部可能替换了读回调或关闭了连接。
        if self.on_read.is_none() && !self.closed {
            self.on_read = Some(on_read);
        }
    }
}
