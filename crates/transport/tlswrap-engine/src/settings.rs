//! 引擎配置的声明式描述与装配。
//!
//! ```toml
//! role = "responder"
//! versions = ["tls13"]
//! alpn = ["h2", "http/1.1"]
//! certificate_chain = { path = "/etc/tlswrap/server.pem" }
//! private_key = { path = "/etc/tlswrap/server.key" }
//! ```

use std::{path::PathBuf, sync::Arc};

use rustls::{
    ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion,
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, pem::PemObject},
    server::WebPkiClientVerifier,
};
use serde::Deserialize;

use crate::{
    engine::{EngineConfig, Role},
    error::EngineError,
};

/// PEM 材料来源：文件路径或内联文本。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PemSource {
    Path(PathBuf),
    Inline(String),
}

/// 可接受的协议版本。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn supported(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

fn default_versions() -> Vec<TlsVersion> {
    vec![TlsVersion::Tls12, TlsVersion::Tls13]
}

/// 引擎配置的声明式描述。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 证书、私钥、信任根与协议版本属于部署参数，应当来自配置文件而不是代码；
/// - 适配器对这些参数不透明，只消费 [`EngineSettings::build`] 产出的 [`EngineConfig`]。
///
/// ## 契约（What）
/// - `role = "responder"`：必须提供 `certificate_chain` 与 `private_key`；
///   `require_client_auth = true` 时还必须提供 `trust_roots` 用于校验客户端证书；
/// - `role = "initiator"`：必须提供 `trust_roots` 与 `server_name`；
///   同时给出证书链与私钥时启用客户端证书认证；
/// - `versions` 缺省为 TLS1.2 与 TLS1.3；空列表视为配置错误。
///
/// ## 风险与权衡（Trade-offs）
/// - 密码学实现固定为 ring provider，不读取进程级默认 provider，
///   使同一进程内不同连接的行为不受全局安装顺序影响。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    pub role: Role,
    #[serde(default)]
    pub certificate_chain: Option<PemSource>,
    #[serde(default)]
    pub private_key: Option<PemSource>,
    #[serde(default)]
    pub trust_roots: Option<PemSource>,
    #[serde(default = "default_versions")]
    pub versions: Vec<TlsVersion>,
    #[serde(default)]
    pub alpn: Vec<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub require_client_auth: bool,
}

impl EngineSettings {
    /// 从 TOML 文本解析。
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|err| EngineError::Config(err.to_string()))
    }

    /// 装配 rustls 配置。
    pub fn build(&self) -> Result<EngineConfig, EngineError> {
        if self.versions.is_empty() {
            return Err(EngineError::Config(
                "at least one protocol version is required".into(),
            ));
        }
        let versions: Vec<&'static SupportedProtocolVersion> =
            self.versions.iter().map(|v| v.supported()).collect();
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let alpn: Vec<Vec<u8>> = self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

        match self.role {
            Role::Responder => self.build_server(provider, &versions, alpn),
            Role::Initiator => self.build_client(provider, &versions, alpn),
        }
    }

    fn build_server(
        &self,
        provider: Arc<CryptoProvider>,
        versions: &[&'static SupportedProtocolVersion],
        alpn: Vec<Vec<u8>>,
    ) -> Result<EngineConfig, EngineError> {
        let chain = load_chain(required(&self.certificate_chain, "certificate_chain")?)?;
        let key = load_key(required(&self.private_key, "private_key")?)?;

        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(versions)?;
        let builder = if self.require_client_auth {
            let roots = load_roots(required(&self.trust_roots, "trust_roots")?)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|err| EngineError::Config(format!("client verifier: {err}")))?;
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };
        let mut config = builder.with_single_cert(chain, key)?;
        config.alpn_protocols = alpn;
        Ok(EngineConfig::server(Arc::new(config)))
    }

    fn build_client(
        &self,
        provider: Arc<CryptoProvider>,
        versions: &[&'static SupportedProtocolVersion],
        alpn: Vec<Vec<u8>>,
    ) -> Result<EngineConfig, EngineError> {
        let roots = load_roots(required(&self.trust_roots, "trust_roots")?)?;
        let name = self
            .server_name
            .clone()
            .ok_or_else(|| EngineError::Config("`server_name` is required for initiator".into()))?;
        let server_name = ServerName::try_from(name)
            .map_err(|err| EngineError::Config(format!("server_name: {err}")))?;

        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(versions)?
            .with_root_certificates(roots);
        let mut config = match (&self.certificate_chain, &self.private_key) {
            (Some(chain), Some(key)) => {
                builder.with_client_auth_cert(load_chain(chain)?, load_key(key)?)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(EngineError::Config(
                    "client certificate requires both `certificate_chain` and `private_key`".into(),
                ));
            }
        };
        config.alpn_protocols = alpn;
        Ok(EngineConfig::client(Arc::new(config), server_name))
    }
}

fn required<'a>(
    source: &'a Option<PemSource>,
    field: &'static str,
) -> Result<&'a PemSource, EngineError> {
    source
        .as_ref()
        .ok_or_else(|| EngineError::Config(format!("`{field}` is required")))
}

fn load_chain(source: &PemSource) -> Result<Vec<CertificateDer<'static>>, EngineError> {
    let pem = |source| EngineError::Pem {
        what: "certificate chain",
        source,
    };
    let chain = match source {
        PemSource::Path(path) => CertificateDer::pem_file_iter(path)
            .map_err(pem)?
            .collect::<Result<Vec<_>, _>>(),
        PemSource::Inline(text) => {
            CertificateDer::pem_slice_iter(text.as_bytes()).collect::<Result<Vec<_>, _>>()
        }
    }
    .map_err(pem)?;
    if chain.is_empty() {
        return Err(EngineError::Config(
            "certificate chain contains no certificates".into(),
        ));
    }
    Ok(chain)
}

fn load_key(source: &PemSource) -> Result<PrivateKeyDer<'static>, EngineError> {
    let key = match source {
        PemSource::Path(path) => PrivateKeyDer::from_pem_file(path),
        PemSource::Inline(text) => PrivateKeyDer::from_pem_slice(text.as_bytes()),
    };
    key.map_err(|source| EngineError::Pem {
        what: "private key",
        source,
    })
}

fn load_roots(source: &PemSource) -> Result<RootCertStore, EngineError> {
    let mut roots = RootCertStore::empty();
    for cert in load_chain(source)? {
        roots.add(cert)?;
    }
    Ok(roots)
}
