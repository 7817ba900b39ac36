//! 流适配器集成测试的公共装置。
//!
//! - 证书由 `rcgen` 现场签发；
//! - 两条 [`TlsStream`] 通过内存传输对接，测试保留传输句柄的克隆作为控制面
//!   （饱和、分块交付、故障注入）。

#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use anyhow::{Context, bail};
use rcgen::{CertificateParams, KeyPair};
use tlswrap_core::{
    CoreError, EventLoop, HookRegistry, ReadCallback, ReadEvent, StreamConfig, WriteCallback,
};
use tlswrap_engine::{
    EngineConfig, EngineLimits, EngineSettings, PemSource, Role, TlsEngine, TlsVersion,
};
use tlswrap_stream::{StreamState, TlsStream};
use tlswrap_transport_memory::{MemoryTransport, pair};

pub const SERVER_NAME: &str = "localhost";
pub const ALPN: &str = "tlswrap/1";

#[derive(Clone)]
pub struct Pki {
    pub cert_pem: String,
    pub key_pem: String,
}

impl Pki {
    pub fn generate(name: &str) -> anyhow::Result<Self> {
        let params = CertificateParams::new(vec![name.to_string()]).context("构造证书参数失败")?;
        let key_pair = KeyPair::generate().context("生成证书私钥失败")?;
        let certificate = params.self_signed(&key_pair).context("签发自签名证书失败")?;
        Ok(Self {
            cert_pem: certificate.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    pub fn responder(&self, versions: &[TlsVersion]) -> anyhow::Result<EngineConfig> {
        let settings = EngineSettings {
            role: Role::Responder,
            certificate_chain: Some(PemSource::Inline(self.cert_pem.clone())),
            private_key: Some(PemSource::Inline(self.key_pem.clone())),
            trust_roots: None,
            versions: versions.to_vec(),
            alpn: vec![ALPN.to_string()],
            server_name: None,
            require_client_auth: false,
        };
        Ok(settings.build()?)
    }

    pub fn initiator(&self, versions: &[TlsVersion]) -> anyhow::Result<EngineConfig> {
        let settings = EngineSettings {
            role: Role::Initiator,
            certificate_chain: None,
            private_key: None,
            trust_roots: Some(PemSource::Inline(self.cert_pem.clone())),
            versions: versions.to_vec(),
            alpn: vec![ALPN.to_string()],
            server_name: Some(SERVER_NAME.to_string()),
            require_client_auth: false,
        };
        Ok(settings.build()?)
    }
}

/// 一端：适配器与它底下传输的控制句柄。
pub struct Side {
    pub stream: TlsStream,
    pub wire: MemoryTransport,
}

/// 客户端与服务端各一条流，共享一个事件循环。
pub struct Harness {
    pub event_loop: EventLoop,
    pub client: Side,
    pub server: Side,
}

/// 构造参数。
pub struct Setup<'a> {
    pub client_pki: &'a Pki,
    pub server_pki: &'a Pki,
    pub client_config: StreamConfig,
    pub server_config: StreamConfig,
    pub client_hooks: HookRegistry,
    /// 服务端接受的协议版本；客户端总是同时提供 1.3 与 1.2。
    pub server_versions: Vec<TlsVersion>,
}

const ALL_VERSIONS: [TlsVersion; 2] = [TlsVersion::Tls13, TlsVersion::Tls12];

impl<'a> Setup<'a> {
    pub fn new(pki: &'a Pki) -> Self {
        Self {
            client_pki: pki,
            server_pki: pki,
            client_config: StreamConfig::default(),
            server_config: StreamConfig::default(),
            client_hooks: HookRegistry::new(),
            server_versions: ALL_VERSIONS.to_vec(),
        }
    }

    pub fn build(self) -> anyhow::Result<Harness> {
        let event_loop = EventLoop::new();
        let (client_wire, server_wire) = pair(&event_loop);
        let client_engine = TlsEngine::new(
            &self.client_pki.initiator(&ALL_VERSIONS)?,
            EngineLimits::from(&self.client_config),
        )?;
        let server_engine = TlsEngine::new(
            &self.server_pki.responder(&self.server_versions)?,
            EngineLimits::from(&self.server_config),
        )?;
        let client = TlsStream::new(
            &event_loop,
            Box::new(client_wire.clone()),
            client_engine,
            self.client_config,
            self.client_hooks,
        )?;
        let server = TlsStream::new(
            &event_loop,
            Box::new(server_wire.clone()),
            server_engine,
            self.server_config,
            HookRegistry::new(),
        )?;
        Ok(Harness {
            event_loop,
            client: Side {
                stream: client,
                wire: client_wire,
            },
            server: Side {
                stream: server,
                wire: server_wire,
            },
        })
    }

    /// 构造并完成握手。
    pub fn established(self) -> anyhow::Result<Harness> {
        let harness = self.build()?;
        harness.client.stream.start()?;
        harness.server.stream.start()?;
        harness.settle();
        if harness.client.stream.state() != StreamState::Established
            || harness.server.stream.state() != StreamState::Established
        {
            bail!(
                "handshake did not complete: client {:?}, server {:?}",
                harness.client.stream.state(),
                harness.server.stream.state()
            );
        }
        Ok(harness)
    }
}

impl Harness {
    pub fn established(pki: &Pki) -> anyhow::Result<Self> {
        Setup::new(pki).established()
    }

    /// 运行事件循环直到静默。
    pub fn settle(&self) -> usize {
        self.event_loop.run_until_idle()
    }
}

/// 读回调收到的内容。
#[derive(Default)]
pub struct Received {
    pub data: Vec<u8>,
    pub deliveries: usize,
    pub eof: bool,
    pub errors: Vec<CoreError>,
}

pub type Inbox = Rc<RefCell<Received>>;

/// 把读事件记入 `inbox` 的回调。
pub fn recorder(inbox: &Inbox) -> ReadCallback {
    let inbox = Rc::clone(inbox);
    Box::new(move |event| {
        let mut inbox = inbox.borrow_mut();
        match event {
            ReadEvent::Data(bytes) => {
                inbox.deliveries += 1;
                inbox.data.extend_from_slice(&bytes);
            }
            ReadEvent::Eof => inbox.eof = true,
            ReadEvent::Error(err) => inbox.errors.push(err),
        }
    })
}

/// 开始读取并返回收件记录。
pub fn read_all(stream: &TlsStream) -> anyhow::Result<Inbox> {
    let inbox = Inbox::default();
    stream.read_start(recorder(&inbox))?;
    Ok(inbox)
}

/// 事件日志，按发生顺序记录完成回调。
pub type Journal = Rc<RefCell<Vec<String>>>;

/// 把写或关闭的结果以 `"{tag} ok"` / `"{tag} err {code}"` 记入日志。
pub fn logged(journal: &Journal, tag: impl Into<String>) -> WriteCallback {
    let journal = Rc::clone(journal);
    let tag = tag.into();
    Box::new(move |result| {
        let line = match result {
            Ok(()) => format!("{tag} ok"),
            Err(err) => format!("{tag} err {}", err.code()),
        };
        journal.borrow_mut().push(line);
    })
}
