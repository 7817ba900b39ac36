//! 引擎集成测试共享的 PKI 与搬运工具。
//!
//! - 证书由 `rcgen` 现场签发，以内联 PEM 交给 `EngineSettings`，顺带覆盖配置装配路径；
//! - `pump` 在两台引擎之间来回搬运出站密文，直到双方都不再产出。

#![allow(dead_code)]

use anyhow::{Context, bail};
use rcgen::{CertificateParams, KeyPair};
use tlswrap_engine::{
    EngineConfig, EngineLimits, EngineSettings, PemSource, Role, TlsEngine, TlsVersion,
};

pub const SERVER_NAME: &str = "localhost";
pub const ALPN: &str = "tlswrap/1";

/// 一套自签名证书材料。
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

    pub fn responder_settings(&self) -> EngineSettings {
        EngineSettings {
            role: Role::Responder,
            certificate_chain: Some(PemSource::Inline(self.cert_pem.clone())),
            private_key: Some(PemSource::Inline(self.key_pem.clone())),
            trust_roots: None,
            versions: vec![TlsVersion::Tls13],
            alpn: vec![ALPN.to_string()],
            server_name: None,
            require_client_auth: false,
        }
    }

    pub fn initiator_settings(&self) -> EngineSettings {
        EngineSettings {
            role: Role::Initiator,
            certificate_chain: None,
            private_key: None,
            trust_roots: Some(PemSource::Inline(self.cert_pem.clone())),
            versions: vec![TlsVersion::Tls13],
            alpn: vec![ALPN.to_string()],
            server_name: Some(SERVER_NAME.to_string()),
            require_client_auth: false,
        }
    }

    pub fn responder(&self) -> anyhow::Result<EngineConfig> {
        Ok(self.responder_settings().build()?)
    }

    pub fn initiator(&self) -> anyhow::Result<EngineConfig> {
        Ok(self.initiator_settings().build()?)
    }
}

/// 在两台引擎之间搬运密文直到静默。
pub fn pump(a: &mut TlsEngine, b: &mut TlsEngine) -> anyhow::Result<()> {
    for _ in 0..64 {
        let a_to_b = a.drain_outbound(usize::MAX);
        let b_to_a = b.drain_outbound(usize::MAX);
        if a_to_b.is_empty() && b_to_a.is_empty() {
            return Ok(());
        }
        if !a_to_b.is_empty() {
            b.feed_ciphertext(&a_to_b)?;
            b.drive()?;
        }
        if !b_to_a.is_empty() {
            a.feed_ciphertext(&b_to_a)?;
            a.drive()?;
        }
    }
    bail!("engines did not settle")
}

/// 构造一对完成握手的引擎。
pub fn established(pki: &Pki, limits: EngineLimits) -> anyhow::Result<(TlsEngine, TlsEngine)> {
    let mut client = TlsEngine::new(&pki.initiator()?, limits)?;
    let mut server = TlsEngine::new(&pki.responder()?, limits)?;
    pump(&mut client, &mut server)?;
    if client.is_handshaking() || server.is_handshaking() {
        bail!("handshake did not complete");
    }
    Ok((client, server))
}

/// 反复驱动并取出明文，直到既无明文也无进展。
pub fn drain_plaintext(engine: &mut TlsEngine) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let report = engine.drive()?;
        let chunk = engine.pull_plaintext(16 * 1024)?;
        if chunk.is_empty() && !report.made_progress() {
            return Ok(out);
        }
        out.extend_from_slice(&chunk);
    }
}
