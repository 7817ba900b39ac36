#![no_main]

use std::sync::OnceLock;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rcgen::{CertificateParams, KeyPair};
use tlswrap_engine::{
    EngineConfig, EngineLimits, EngineSettings, PemSource, Role, TlsEngine, TlsVersion,
};

/// Fuzz 输入：一段任意密文及其切分方式。
///
/// - **Why**：引擎直接面对网络字节，任何输入都只能得到 `Ok` 或 `Err`，不允许 panic 或无界增长；
/// - **How**：按 `cuts` 把 `wire` 切块喂入，每块之后驱动并取尽明文，可选地在结尾追加 EOF；
/// - **What**：一旦中毒，后续驱动与取明文一律返回错误。
#[derive(Debug, Arbitrary)]
struct InboundCase {
    initiator: bool,
    wire: Vec<u8>,
    cuts: Vec<u16>,
    eof: bool,
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
            versions: vec![TlsVersion::Tls13, TlsVersion::Tls12],
            alpn: Vec::new(),
            server_name: None,
            require_client_auth: false,
        };
        let initiator = EngineSettings {
            role: Role::Initiator,
            certificate_chain: None,
            private_key: None,
            trust_roots: Some(PemSource::Inline(certificate.pem())),
            versions: vec![TlsVersion::Tls13, TlsVersion::Tls12],
            alpn: Vec::new(),
            server_name: Some("localhost".to_string()),
            require_client_auth: false,
        };
        (initiator.build().unwrap(), responder.build().unwrap())
    })
}

fuzz_target!(|case: InboundCase| {
    let (initiator, responder) = configs();
    let config = if case.initiator { initiator } else { responder };
    let limits = EngineLimits {
        max_inbound_buffer: 64 * 1024,
        buffer_limit: Some(64 * 1024),
    };
    let Ok(mut engine) = TlsEngine::new(config, limits) else {
        return;
    };

    let mut rest = case.wire.as_slice();
    let mut cuts = case.cuts.iter();
    let mut failed = false;
    while !rest.is_empty() && !failed {
        let take = cuts
            .next()
            .map_or(rest.len(), |cut| (*cut as usize).clamp(1, rest.len()));
        let (chunk, tail) = rest.split_at(take);
        rest = tail;
        if engine.feed_ciphertext(chunk).is_err() {
            failed = true;
            break;
        }
        failed = step(&mut engine);
    }
    if case.eof && !failed {
        engine.feed_eof();
        step(&mut engine);
    }

    if engine.is_poisoned() {
        assert!(engine.drive().is_err());
        assert!(engine.pull_plaintext(1).is_err());
    }
    let _ = engine.drain_outbound(usize::MAX);
});

/// 驱动一轮并取尽明文；返回是否出错。
fn step(engine: &mut TlsEngine) -> bool {
    if engine.drive().is_err() {
        return true;
    }
    loop {
        match engine.pull_plaintext(16 * 1024) {
            Ok(chunk) if chunk.is_empty() => return false,
            Ok(_) => continue,
            Err(_) => return true,
        }
    }
}
