use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use bytes::{Bytes, BytesMut};
use rustls::{
    ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection,
    pki_types::ServerName,
};
use serde::Deserialize;
use tlswrap_core::StreamConfig;
use tracing::{debug, trace};

use crate::{channel::CipherChannel, error::EngineError};

/// 握手角色：发起方发送第一段握手记录，应答方等待对端先发。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

/// 构造引擎所需的 rustls 配置。
///
/// 对适配器而言这是不透明输入：它只负责“用这份配置构造引擎”。
#[derive(Clone)]
pub enum EngineConfig {
    Client {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
    Server {
        config: Arc<ServerConfig>,
    },
}

impl EngineConfig {
    /// 发起方配置。
    pub fn client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        EngineConfig::Client {
            config,
            server_name,
        }
    }

    /// 应答方配置。
    pub fn server(config: Arc<ServerConfig>) -> Self {
        EngineConfig::Server { config }
    }

    /// 该配置对应的握手角色。
    pub fn role(&self) -> Role {
        match self {
            EngineConfig::Client { .. } => Role::Initiator,
            EngineConfig::Server { .. } => Role::Responder,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

/// 引擎缓冲上限。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineLimits {
    /// 入站密文通道上限，超出即内存耗尽。
    pub max_inbound_buffer: usize,
    /// 待发送密文上限，决定 `push_plaintext` 的部分受理；`None` 表示不限制。
    pub buffer_limit: Option<usize>,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self::from(&StreamConfig::default())
    }
}

impl From<&StreamConfig> for EngineLimits {
    fn from(config: &StreamConfig) -> Self {
        Self {
            max_inbound_buffer: config.max_inbound_buffer,
            buffer_limit: config.engine_buffer_limit,
        }
    }
}

/// 一次 [`TlsEngine::drive`] 的结果。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriveReport {
    /// 本次从入站通道消费的密文字节数。
    pub consumed: usize,
    /// 本次写入出站通道的密文字节数。
    pub produced: usize,
    /// 驱动结束时引擎内可读取的明文字节数。
    pub plaintext_ready: usize,
    /// 握手是否已经完成。
    pub handshake_complete: bool,
    /// 是否已收到对端的 close_notify。
    pub peer_closed: bool,
}

impl DriveReport {
    /// 是否有字节被消费或产出。
    pub fn made_progress(&self) -> bool {
        self.consumed > 0 || self.produced > 0
    }
}

/// 入站方向的终结状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundState {
    /// 仍可能有数据到达。
    Open,
    /// 对端发送了 close_notify。
    Closed,
    /// 传输 EOF 先于 close_notify 到达。
    Truncated,
}

/// 引擎累计计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub ciphertext_in: u64,
    pub ciphertext_out: u64,
    pub plaintext_in: u64,
    pub plaintext_out: u64,
}

/// 协商结果快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub role: Role,
    /// 协议版本，例如 `TLSv1_3`。
    pub protocol_version: Option<String>,
    /// 密码套件，例如 `TLS13_AES_256_GCM_SHA384`。
    pub cipher_suite: Option<String>,
    pub alpn_protocol: Option<Vec<u8>>,
    /// 发起方为配置的目标名，应答方为客户端 SNI。
    pub server_name: Option<String>,
    /// 对端证书链长度。
    pub peer_certificates: usize,
}

/// 纯缓冲、非阻塞的 TLS 引擎绑定。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把 `rustls::Connection` 包装为只与内存交互的状态机：密文从入站通道进、从出站通道出，
///   明文经 `push_plaintext`/`pull_plaintext` 进出；适配器无需区分握手记录与应用记录；
/// - 引擎不接触任何 I/O 对象，因此可以在任意传输之上复用，也可以被模糊测试直接驱动。
///
/// ## 逻辑（How）
/// 1. `feed_ciphertext` 只追加入站通道；
/// 2. `drive` 循环执行“`read_tls` 消费入站 → `process_new_packets` → `write_tls` 刷出站”，
///    直到入站通道不再被消费；单个入站块中的多条记录在一次 `drive` 内全部处理；
/// 3. rustls 内部明文缓冲满时 `read_tls` 拒绝读入，剩余密文保留在入站通道，等待调用方取走明文后再次驱动；
/// 4. `push_plaintext` 按出站积压计算剩余额度，只接受额度内的前缀并立即加密进出站通道。
///
/// ## 契约（What）
/// - 入站字节要么被消费、要么留在通道中；出站字节只会通过 `drain_outbound` 离开；
/// - 任意致命错误之后引擎进入中毒态，后续 `drive`/`push_plaintext`/`pull_plaintext` 返回 [`EngineError::Poisoned`]；
///   中毒前 rustls 排队的 Alert 仍会留在出站通道中；
/// - **前置条件**：单线程独占使用，调用方保证同一时刻只有一个 `drive` 在执行。
///
/// ## 风险与权衡（Trade-offs）
/// - `pull_plaintext` 每次按容量分配缓冲，换来零拷贝交付给调用方的 `Bytes`；
/// - 部分受理的粒度取决于 `buffer_limit`，过小会让大写被切成许多短记录。
pub struct TlsEngine {
    conn: Connection,
    role: Role,
    sni: Option<String>,
    limits: EngineLimits,
    inbound: CipherChannel,
    outbound: CipherChannel,
    plaintext_ready: usize,
    eof_fed: bool,
    eof_processed: bool,
    peer_closed: bool,
    close_notify_sent: bool,
    poisoned: bool,
    plaintext_in: u64,
    plaintext_out: u64,
}

impl TlsEngine {
    /// 按配置构造引擎；发起方的首段握手记录会立即进入出站通道。
    pub fn new(config: &EngineConfig, limits: EngineLimits) -> Result<Self, EngineError> {
        let (mut conn, sni): (Connection, Option<String>) = match config {
            EngineConfig::Client {
                config,
                server_name,
            } => (
                ClientConnection::new(Arc::clone(config), server_name.clone())?.into(),
                Some(server_name.to_str().into_owned()),
            ),
            EngineConfig::Server { config } => {
                (ServerConnection::new(Arc::clone(config))?.into(), None)
            }
        };
        conn.set_buffer_limit(limits.buffer_limit);

        let mut engine = Self {
            conn,
            role: config.role(),
            sni,
            limits,
            inbound: CipherChannel::bounded(limits.max_inbound_buffer),
            outbound: CipherChannel::unbounded(),
            plaintext_ready: 0,
            eof_fed: false,
            eof_processed: false,
            peer_closed: false,
            close_notify_sent: false,
            poisoned: false,
            plaintext_in: 0,
            plaintext_out: 0,
        };
        engine.flush_outbound()?;
        Ok(engine)
    }

    /// 握手角色。
    pub fn role(&self) -> Role {
        self.role
    }

    /// 追加收到的密文。
    ///
    /// 超过入站上限时返回 [`EngineError::ChannelOverflow`]，通道内容保持不变。
    pub fn feed_ciphertext(&mut self, data: &[u8]) -> Result<(), EngineError> {
        if self.eof_fed {
            return Err(EngineError::AfterEof);
        }
        self.inbound.append(data)
    }

    /// 记录传输 EOF；入站通道排空后在下一次 `drive` 中交给 rustls。
    pub fn feed_eof(&mut self) {
        self.eof_fed = true;
    }

    /// 驱动记录层直到入站通道不再被消费。
    pub fn drive(&mut self) -> Result<DriveReport, EngineError> {
        if self.poisoned {
            return Err(EngineError::Poisoned);
        }
        let mut report = DriveReport::default();
        loop {
            let mut advanced = false;
            if !self.inbound.is_empty() {
                let read = self.conn.read_tls(&mut self.inbound.source());
                match read {
                    Ok(n) => {
                        report.consumed += n;
                        advanced = n > 0;
                    }
                    // 明文或消息缓冲已满：剩余密文留在通道，取走明文后再驱动。
                    Err(err) => trace!(error = %err, pending = self.inbound.len(), "tls read deferred"),
                }
            } else if self.eof_fed && !self.eof_processed {
                match self.conn.read_tls(&mut io::empty()) {
                    Ok(_) => {
                        self.eof_processed = true;
                        advanced = true;
                    }
                    Err(err) => trace!(error = %err, "tls eof deferred"),
                }
            }

            match self.conn.process_new_packets() {
                Ok(state) => {
                    self.plaintext_ready = state.plaintext_bytes_to_read();
                    if state.peer_has_closed() {
                        self.peer_closed = true;
                    }
                }
                Err(err) => return Err(self.fail(EngineError::Protocol(err))),
            }
            report.produced += self.flush_outbound()?;

            if !advanced {
                break;
            }
        }
        report.plaintext_ready = self.plaintext_ready;
        report.handshake_complete = !self.conn.is_handshaking();
        report.peer_closed = self.peer_closed;
        if report.made_progress() {
            trace!(
                consumed = report.consumed,
                produced = report.produced,
                plaintext = report.plaintext_ready,
                "tls engine driven"
            );
        }
        Ok(report)
    }

    /// 取出至多 `cap` 字节明文；没有明文时返回空。
    pub fn pull_plaintext(&mut self, cap: usize) -> Result<Bytes, EngineError> {
        if self.poisoned {
            return Err(EngineError::Poisoned);
        }
        if cap == 0 || self.plaintext_ready == 0 {
            return Ok(Bytes::new());
        }
        let mut buf = BytesMut::zeroed(cap.min(self.plaintext_ready));
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.conn.reader().read(&mut buf[filled..]);
            match read {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof
                    ) =>
                {
                    break;
                }
                Err(err) => return Err(self.fail(EngineError::Io(err))),
            }
        }
        buf.truncate(filled);
        self.plaintext_ready -= filled;
        self.plaintext_out += filled as u64;
        Ok(buf.freeze())
    }

    /// 提交明文加密，返回实际受理的字节数。
    ///
    /// 出站积压达到 `buffer_limit` 时只受理额度内的前缀，甚至为零；这不是错误，
    /// 调用方应在排空出站通道后重试剩余部分。
    pub fn push_plaintext(&mut self, data: &[u8]) -> Result<usize, EngineError> {
        if self.poisoned {
            return Err(EngineError::Poisoned);
        }
        if self.close_notify_sent {
            return Err(EngineError::AfterClose);
        }
        let room = match self.limits.buffer_limit {
            Some(limit) => limit.saturating_sub(self.outbound.len()),
            None => data.len(),
        };
        let offer = &data[..data.len().min(room)];
        if offer.is_empty() {
            return Ok(0);
        }
        let written = self.conn.writer().write(offer);
        let accepted = match written {
            Ok(n) => n,
            Err(err) => return Err(self.fail(EngineError::Io(err))),
        };
        self.plaintext_in += accepted as u64;
        self.flush_outbound()?;
        Ok(accepted)
    }

    /// 取出至多 `cap` 字节待发送密文。
    pub fn drain_outbound(&mut self, cap: usize) -> Bytes {
        self.outbound.take(cap)
    }

    /// 出站通道中待发送的密文字节数。
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// 入站通道中尚未被记录层消费的密文字节数。
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// 排队 close_notify；重复调用无效果。
    pub fn close_notify(&mut self) -> Result<(), EngineError> {
        if self.poisoned {
            return Err(EngineError::Poisoned);
        }
        if !self.close_notify_sent {
            self.conn.send_close_notify();
            self.close_notify_sent = true;
            self.flush_outbound()?;
            debug!(role = ?self.role, "tls close_notify queued");
        }
        Ok(())
    }

    /// 是否已经排队 close_notify。
    pub fn close_notify_sent(&self) -> bool {
        self.close_notify_sent
    }

    /// 入站方向状态；明文取尽之后才有判定意义。
    pub fn inbound_state(&self) -> InboundState {
        if self.peer_closed {
            InboundState::Closed
        } else if self.eof_processed {
            InboundState::Truncated
        } else {
            InboundState::Open
        }
    }

    /// 握手是否仍在进行。
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// 记录层是否还期待更多密文。
    pub fn wants_read(&self) -> bool {
        self.conn.wants_read()
    }

    /// 是否已报告过致命错误。
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// 协商结果。
    pub fn session(&self) -> SessionInfo {
        let server_name = match &self.conn {
            Connection::Server(server) => server.server_name().map(str::to_owned),
            Connection::Client(_) => self.sni.clone(),
        };
        SessionInfo {
            role: self.role,
            protocol_version: self.conn.protocol_version().map(|v| format!("{v:?}")),
            cipher_suite: self
                .conn
                .negotiated_cipher_suite()
                .map(|suite| format!("{:?}", suite.suite())),
            alpn_protocol: self.conn.alpn_protocol().map(<[u8]>::to_vec),
            server_name,
            peer_certificates: self.conn.peer_certificates().map_or(0, |chain| chain.len()),
        }
    }

    /// 累计计数。
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            ciphertext_in: self.inbound.total(),
            ciphertext_out: self.outbound.total(),
            plaintext_in: self.plaintext_in,
            plaintext_out: self.plaintext_out,
        }
    }

    fn flush_outbound(&mut self) -> Result<usize, EngineError> {
        let mut produced = 0;
        while self.conn.wants_write() {
            let written = self.conn.write_tls(&mut self.outbound.sink());
            match written {
                Ok(0) => break,
                Ok(n) => produced += n,
                Err(err) => return Err(self.fail(EngineError::Io(err))),
            }
        }
        Ok(produced)
    }

    fn fail(&mut self, error: EngineError) -> EngineError {
        if !self.poisoned {
            // rustls 在失败时会排队 Alert，先落到出站通道，是否发送由调用方决定。
            while self.conn.wants_write() {
                match self.conn.write_tls(&mut self.outbound.sink()) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            self.poisoned = true;
            debug!(role = ?self.role, error = %error, "tls engine failed");
        }
        error
    }
}

impl fmt::Debug for TlsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsEngine")
            .field("role", &self.role)
            .field("handshaking", &self.conn.is_handshaking())
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
