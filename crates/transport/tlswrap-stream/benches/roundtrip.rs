use bytes::Bytes;
use criterion::{BatchSize, Criterion, Throughput, black_box};
use rcgen::{CertificateParams, KeyPair};
use std::{cell::Cell, env, rc::Rc, time::Duration};
use tlswrap_core::{EventLoop, HookRegistry, ReadEvent, StreamConfig};
use tlswrap_engine::{
    EngineConfig, EngineLimits, EngineSettings, PemSource, Role, TlsEngine, TlsVersion,
};
use tlswrap_stream::TlsStream;
use tlswrap_transport_memory::pair;

/// 基准：内存传输上的完整握手，以及已建立连接上的批量明文往返。
///
/// # 设计背景（Why）
/// - 适配器的成本集中在“喂密文 → 驱动 → 取明文”的泵循环与回调派发上，
///   用内存传输排除网络抖动后，回归主要来自这两处；
/// - 握手与批量传输分开计量，避免握手的公钥运算淹没记录层的开销。
///
/// # 逻辑解析（How）
/// - 证书在基准开始前签发一次，引擎配置按角色缓存；
/// - 每次迭代都新建事件循环与传输对，运行到静默为止。
struct Fixture {
    initiator: EngineConfig,
    responder: EngineConfig,
}

impl Fixture {
    fn new() -> Self {
        let params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let key_pair = KeyPair::generate().unwrap();
        let certificate = params.self_signed(&key_pair).unwrap();
        let cert_pem = certificate.pem();
        let responder = EngineSettings {
            role: Role::Responder,
            certificate_chain: Some(PemSource::Inline(cert_pem.clone())),
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
            trust_roots: Some(PemSource::Inline(cert_pem)),
            versions: vec![TlsVersion::Tls13],
            alpn: Vec::new(),
            server_name: Some("localhost".to_string()),
            require_client_auth: false,
        };
        Self {
            initiator: initiator.build().unwrap(),
            responder: responder.build().unwrap(),
        }
    }

    fn connect(&self) -> (EventLoop, TlsStream, TlsStream) {
        let event_loop = EventLoop::new();
        let (a, b) = pair(&event_loop);
        let config = StreamConfig::default();
        let limits = EngineLimits::from(&config);
        let client = TlsStream::new(
            &event_loop,
            Box::new(a),
            TlsEngine::new(&self.initiator, limits).unwrap(),
            config.clone(),
            HookRegistry::new(),
        )
        .unwrap();
        let server = TlsStream::new(
            &event_loop,
            Box::new(b),
            TlsEngine::new(&self.responder, limits).unwrap(),
            config,
            HookRegistry::new(),
        )
        .unwrap();
        client.start().unwrap();
        server.start().unwrap();
        event_loop.run_until_idle();
        (event_loop, client, server)
    }
}

fn bench_handshake(c: &mut Criterion, fixture: &Fixture) {
    c.bench_function("tls_handshake_memory", |b| {
        b.iter(|| black_box(fixture.connect()));
    });
}

fn bench_bulk_transfer(c: &mut Criterion, fixture: &Fixture) {
    const PAYLOAD: usize = 256 * 1024;
    let payload = Bytes::from(vec![0x5Au8; PAYLOAD]);
    let mut group = c.benchmark_group("tls_bulk_transfer");
    group.throughput(Throughput::Bytes(PAYLOAD as u64));
    group.bench_function("256KiB", |b| {
        b.iter_batched(
            || fixture.connect(),
            |(event_loop, client, server)| {
                let received = Rc::new(Cell::new(0usize));
                let sink = Rc::clone(&received);
                server
                    .read_start(Box::new(move |event| {
                        if let ReadEvent::Data(bytes) = event {
                            sink.set(sink.get() + bytes.len());
                        }
                    }))
                    .unwrap();
                client.write(payload.clone(), Box::new(|_| {})).unwrap();
                event_loop.run_until_idle();
                assert_eq!(received.get(), PAYLOAD);
                server.close(Box::new(|| {}));
                client.close(Box::new(|| {}));
                event_loop.run_until_idle();
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    let fixture = Fixture::new();
    bench_handshake(&mut criterion, &fixture);
    bench_bulk_transfer(&mut criterion, &fixture);
    criterion.final_summary();
}
