#![no_main]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::OnceLock,
};

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rcgen::{CertificateParams, KeyPair};
use tlswrap_core::{EventLoop, HookRegistry, ReadEvent, StreamConfig, Transport};
use tlswrap_engine::{
    EngineConfig, EngineLimits, EngineSettings, PemSource, Role, TlsEngine, TlsVersion,
};
use tlswrap_stream::TlsStream;
use tlswrap_transport_memory::{MemoryTransport, pair};

/// Fuzz 指令：对一对已连接的 TLS 流施加任意调用序列。
///
/// - **Why**：适配器的缺陷多出现在调用交错处，例如写请求排队期间关闭、读回调里停读、饱和与解除饱和交替；
/// - **How**：每条指令作用于客户端或服务端一侧，`Run` 推进事件循环；结尾关闭两端并运行到静默；
/// - **What**：每个被受理的写与关闭请求恰好完成一次；服务端收到的明文是客户端已成功写出明文的前缀。
#[derive(Debug, Arbitrary)]
struct StreamCase {
    ops: Vec<StreamOp>,
}

#[derive(Debug, Arbitrary)]
enum StreamOp {
    Write { server: bool, len: u16 },
    ReadStart { server: bool },
    ReadStop { server: bool },
    Shutdown { server: bool },
    Close { server: bool },
    Saturate { server: bool, on: bool },
    DeliveryChunk { server: bool, chunk: u8 },
    Garbage { server: bool, bytes: Vec<u8> },
    Run,
}

struct Side {
    stream: TlsStream,
    wire: MemoryTransport,
    received: Rc<RefCell<Vec<u8>>>,
}

fn configs() -> &'static (EngineConfig, EngineConfig) {
    static CONFIGS: OnceLock<(EngineConfig, EngineConfig)> = OnceLock::new();
    CONFIGS.get_or_init(|| {
        let params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let key_pair = KeyPair::generate().unwrap();
        let certificate = params.self_signed(&key_pair).unwrap();
        let responder = EngineSettings {
            role: Role::Responder,
            certificate_chain: Some(PemSource::Inline(certificate.pem())),
            private_key: Some(PemSource::Inline(key_pair.serialize_pem())),
            trust_roots: None,
            versions: vec![TlsVersion::Tls13],
            alpn: Vec::new(),
            server_name: None,
            require_client_auth: false,
        };
        let initiator = EngineSettings {
            role: Role::Initiator,
            certificate_chain: None,
            private_key: None,
            trust_roots: Some(PemSource::Inline(certificate.pem())),
            versions: vec![TlsVersion::Tls13],
            alpn: Vec::new(),
            server_name: Some("localhost".to_string()),
            require_client_auth: false,
        };
        (initiator.build().unwrap(), responder.build().unwrap())
    })
}

fn side(event_loop: &EventLoop, wire: MemoryTransport, config: &EngineConfig) -> Side {
    let stream_config = StreamConfig {
        write_high_water_mark: 4 * 1024,
        max_write_hard_limit: 16 * 1024,
        ..StreamConfig::default()
    };
    let engine = TlsEngine::new(config, EngineLimits::from(&stream_config)).unwrap();
    let stream = TlsStream::new(
        event_loop,
        Box::new(wire.clone()),
        engine,
        stream_config,
        HookRegistry::new(),
    )
    .unwrap();
    Side {
        stream,
        wire,
        received: Rc::default(),
    }
}

fn reader(received: &Rc<RefCell<Vec<u8>>>) -> Box<dyn FnMut(ReadEvent)> {
    let received = Rc::clone(received);
    Box::new(move |event| {
        if let ReadEvent::Data(bytes) = event {
            received.borrow_mut().extend_from_slice(&bytes);
        }
    })
}

fuzz_target!(|case: StreamCase| {
    let (initiator, responder) = configs();
    let event_loop = EventLoop::new();
    let (client_wire, server_wire) = pair(&event_loop);
    let sides = [
        side(&event_loop, client_wire, initiator),
        side(&event_loop, server_wire, responder),
    ];
    for side in &sides {
        let _ = side.stream.start();
    }

    let accepted = Rc::new(Cell::new(0u64));
    let completed = Rc::new(Cell::new(0u64));
    let mut sent: [Vec<u8>; 2] = [Vec::new(), Vec::new()];
    let mut counter = 0u8;

    for op in case.ops.into_iter().take(256) {
        match op {
            StreamOp::Write { server, len } => {
                let index = usize::from(server);
                let payload: Vec<u8> = (0..len % 8192)
                    .map(|_| {
                        counter = counter.wrapping_add(1);
                        counter
                    })
                    .collect();
                let done = Rc::clone(&completed);
                let result = sides[index].stream.write(
                    Bytes::from(payload.clone()),
                    Box::new(move |_| done.set(done.get() + 1)),
                );
                if result.is_ok() {
                    accepted.set(accepted.get() + 1);
                    sent[index].extend_from_slice(&payload);
                }
            }
            StreamOp::ReadStart { server } => {
                let side = &sides[usize::from(server)];
                let _ = side.stream.read_start(reader(&side.received));
            }
            StreamOp::ReadStop { server } => {
                let _ = sides[usize::from(server)].stream.read_stop();
            }
            StreamOp::Shutdown { server } => {
                let done = Rc::clone(&completed);
                let result = sides[usize::from(server)]
                    .stream
                    .shutdown(Box::new(move |_| done.set(done.get() + 1)));
                if result.is_ok() {
                    accepted.set(accepted.get() + 1);
                }
            }
            StreamOp::Close { server } => {
                sides[usize::from(server)].stream.close(Box::new(|| {}));
            }
            StreamOp::Saturate { server, on } => {
                sides[usize::from(server)].wire.set_saturated(on);
            }
            StreamOp::DeliveryChunk { server, chunk } => {
                let chunk = (chunk > 0).then_some(usize::from(chunk));
                sides[usize::from(server)].wire.set_delivery_chunk(chunk);
            }
            StreamOp::Garbage { server, bytes } => {
                // 从对端传输直接写入，绕过对端引擎。
                let mut raw = sides[1 - usize::from(server)].wire.clone();
                let _ = raw.write(Bytes::from(bytes), Box::new(|_| {}));
            }
            StreamOp::Run => {
                event_loop.run_until_idle();
            }
        }
    }

    for side in &sides {
        side.wire.set_saturated(false);
        side.stream.close(Box::new(|| {}));
    }
    event_loop.run_until_idle();

    assert_eq!(completed.get(), accepted.get());
    for (index, side) in sides.iter().enumerate() {
        let received = side.received.borrow();
        let peer_sent = &sent[1 - index];
        assert!(received.len() <= peer_sent.len());
        assert_eq!(received.as_slice(), &peer_sent[..received.len()]);
    }
});
