//! 演示程序：在内存传输上完成一次 TLS 握手、回显一条消息并双向关闭。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=tlswrap_stream=debug cargo run -p tlswrap-stream --features demo --bin tlswrap-demo -- "hello"
//! ```
//! - 第一个参数为客户端发送的消息，缺省为 `hello, tls`；
//! - 日志级别由 `RUST_LOG` 控制，缺省只输出 `info`。
//!
//! # 设计要点（Why）
//! - 证书由 `rcgen` 现场签发，不依赖任何磁盘文件；
//! - 服务端把收到的明文原样写回；客户端的 close_notify 到达后，服务端回送 close_notify，
//!   回显送达后连接自行关闭。
//! - 两端都不显式调用 `start`，首次读写即开始握手。

use std::{cell::RefCell, env, rc::Rc};

use bytes::Bytes;
use rcgen::{CertificateParams, KeyPair};
use tlswrap_core::{EventLoop, HookRegistry, ReadEvent, StreamConfig};
use tlswrap_engine::{EngineFactory, EngineLimits, EngineSettings, PemSource, Role, TlsVersion};
use tlswrap_stream::TlsStream;
use tlswrap_transport_memory::pair;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(error) = run() {
        eprintln!("演示失败: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let message = env::args()
        .nth(1)
        .unwrap_or_else(|| "hello, tls".to_string());

    let params = CertificateParams::new(vec!["localhost".to_string()])
        .map_err(|error| format!("构造证书参数失败: {error}"))?;
    let key_pair = KeyPair::generate().map_err(|error| format!("生成私钥失败: {error}"))?;
    let certificate = params
        .self_signed(&key_pair)
        .map_err(|error| format!("签发证书失败: {error}"))?;

    let responder = EngineFactory::from_settings(
        &EngineSettings {
            role: Role::Responder,
            certificate_chain: Some(PemSource::Inline(certificate.pem())),
            private_key: Some(PemSource::Inline(key_pair.serialize_pem())),
            trust_roots: None,
            versions: vec![TlsVersion::Tls13, TlsVersion::Tls12],
            alpn: vec!["tlswrap-demo".to_string()],
            server_name: None,
            require_client_auth: false,
        },
        EngineLimits::default(),
    )
    .map_err(|error| error.to_string())?;
    let initiator = EngineFactory::from_settings(
        &EngineSettings {
            role: Role::Initiator,
            certificate_chain: None,
            private_key: None,
            trust_roots: Some(PemSource::Inline(certificate.pem())),
            versions: vec![TlsVersion::Tls13, TlsVersion::Tls12],
            alpn: vec!["tlswrap-demo".to_string()],
            server_name: Some("localhost".to_string()),
            require_client_auth: false,
        },
        EngineLimits::default(),
    )
    .map_err(|error| error.to_string())?;

    let event_loop = EventLoop::new();
    let (client_wire, server_wire) = pair(&event_loop);
    let client = TlsStream::from_factory(
        &event_loop,
        Box::new(client_wire),
        &initiator,
        StreamConfig::default(),
        HookRegistry::new(),
    )
    .map_err(|error| error.to_string())?;
    let server = TlsStream::from_factory(
        &event_loop,
        Box::new(server_wire),
        &responder,
        StreamConfig::default(),
        HookRegistry::new(),
    )
    .map_err(|error| error.to_string())?;

    client
        .on_handshake(Box::new(|result| match result {
            Ok(session) => info!(
                version = ?session.protocol_version,
                suite = ?session.cipher_suite,
                alpn = ?session.alpn_protocol.as_deref().map(String::from_utf8_lossy),
                "client handshake complete"
            ),
            Err(error) => warn!(%error, "client handshake failed"),
        }))
        .map_err(|error| error.to_string())?;

    // 服务端：回显；EOF 之后连接自行收尾。
    let echo = server.clone();
    server
        .read_start(Box::new(move |event| match event {
            ReadEvent::Data(bytes) => {
                info!(bytes = bytes.len(), "server echoing");
                if let Err(error) = echo.write(bytes, Box::new(|_| {})) {
                    warn!(%error, "echo rejected");
                }
            }
            ReadEvent::Eof => info!(state = %echo.state(), "server saw client close_notify"),
            ReadEvent::Error(error) => warn!(%error, "server read failed"),
        }))
        .map_err(|error| error.to_string())?;

    let reply = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reply);
    client
        .read_start(Box::new(move |event| match event {
            ReadEvent::Data(bytes) => sink.borrow_mut().extend_from_slice(&bytes),
            ReadEvent::Eof => info!("client saw server close_notify"),
            ReadEvent::Error(error) => warn!(%error, "client read failed"),
        }))
        .map_err(|error| error.to_string())?;

    client
        .write(
            Bytes::from(message.clone().into_bytes()),
            Box::new(|result| {
                if let Err(error) = result {
                    warn!(%error, "client write failed");
                }
            }),
        )
        .map_err(|error| error.to_string())?;
    client
        .shutdown(Box::new(|result| {
            if let Err(error) = result {
                warn!(%error, "client shutdown failed");
            }
        }))
        .map_err(|error| error.to_string())?;

    let tasks = event_loop.run_until_idle();
    let echoed = String::from_utf8_lossy(&reply.borrow()).into_owned();
    info!(tasks, stats = ?client.stats(), "exchange finished");

    client.close(Box::new(|| {}));
    server.close(Box::new(|| {}));
    event_loop.run_until_idle();

    if echoed != message {
        return Err(format!("回显不一致: 发送 {message:?}，收到 {echoed:?}"));
    }
    println!("{echoed}");
    Ok(())
}
