use std::{io, time::Duration};

use rustls::{AlertDescription, Error as RustlsError};
use thiserror::Error;
use tlswrap_core::{BudgetKind, CoreError, ErrorCategory, RetryAdvice, SecurityClass, codes};

/// 引擎绑定层错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 引擎内部只关心“协议失败 / 截断 / 通道溢出 / 配置无效”四类事实，
///   不负责决定连接如何收尾；收尾策略由流适配器根据 [`CoreError`] 的分类执行；
/// - 以 `thiserror` 枚举保留底层原因，转换到 [`CoreError`] 时再统一码值与分类。
///
/// ## 契约（What）
/// - `Protocol`：`process_new_packets` 或连接构造返回的 `rustls::Error`，对连接致命；
/// - `Truncated`：传输 EOF 之前没有收到 close_notify；
/// - `ChannelOverflow`：入站密文通道超过上限，对应内存耗尽；
/// - `Poisoned`：引擎此前已经报告过致命错误，不再接受任何驱动；
/// - `AfterEof` / `AfterClose`：EOF 之后仍喂入密文、close_notify 之后仍推送明文，属于调用方违约。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("tls protocol failure: {0}")]
    Protocol(#[from] RustlsError),
    #[error("transport closed without close_notify")]
    Truncated,
    #[error("inbound ciphertext channel exceeds {limit} bytes")]
    ChannelOverflow { limit: usize },
    #[error("engine channel i/o: {0}")]
    Io(#[from] io::Error),
    #[error("engine configuration: {0}")]
    Config(String),
    #[error("engine configuration: cannot load {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: rustls_pki_types::pem::Error,
    },
    #[error("engine already failed and cannot be driven")]
    Poisoned,
    #[error("ciphertext fed after transport eof")]
    AfterEof,
    #[error("plaintext pushed after close_notify")]
    AfterClose,
}

impl From<EngineError> for CoreError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Protocol(err) => {
                let category = categorize_rustls_error(&err);
                CoreError::new(codes::TLS_PROTOCOL, format!("tls protocol: {err}"))
                    .with_category(category)
                    .with_cause(err)
            }
            EngineError::Truncated => CoreError::new(
                codes::TLS_TRUNCATED,
                "tls read: transport closed without close_notify",
            ),
            EngineError::ChannelOverflow { limit } => CoreError::new(
                codes::OUT_OF_MEMORY,
                format!("tls read: inbound ciphertext exceeds {limit} bytes"),
            ),
            EngineError::Io(err) => {
                let category = categorize_io_error(&err);
                CoreError::new(codes::TLS_PROTOCOL, format!("tls channel: {err}"))
                    .with_category(category)
                    .with_cause(err)
            }
            err @ (EngineError::Config(_) | EngineError::Pem { .. }) => {
                CoreError::new(codes::TLS_CONFIG, err.to_string()).with_cause(err)
            }
            err @ (EngineError::Poisoned | EngineError::AfterEof | EngineError::AfterClose) => {
                CoreError::new(codes::INVALID_STATE, err.to_string())
            }
        }
    }
}

/// 将 `rustls::Error` 细分为框架分类。
///
/// 泛化错误（`General`、`Other`）按可重试处理，避免误报安全事件；
/// 证书相关错误归入认证，记录层与消息解码错误归入完整性。
pub(crate) fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidEncryptedClientHello(_)
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord => ErrorCategory::Security(SecurityClass::Integrity),
        NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType => ErrorCategory::Security(SecurityClass::Authentication),
        PeerIncompatible(_) => ErrorCategory::Security(SecurityClass::Integrity),
        HandshakeNotComplete | General(_) | Other(_) => retryable(Duration::from_millis(80)),
        FailedToGetCurrentTime
        | FailedToGetRandomBytes
        | BadMaxFragmentSize
        | InconsistentKeys(_) => ErrorCategory::ResourceExhausted(BudgetKind::Memory),
        AlertReceived(alert) => alert_to_category(alert),
        NoApplicationProtocol => ErrorCategory::Security(SecurityClass::Unknown),
        _ => retryable(Duration::from_millis(60)),
    }
}

/// 对端 Alert 的细分。
pub(crate) fn alert_to_category(alert: &AlertDescription) -> ErrorCategory {
    use AlertDescription::*;
    match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | NoCertificate
        | CertificateUnobtainable
        | CertificateRequired => ErrorCategory::Security(SecurityClass::Authentication),
        AccessDenied => ErrorCategory::Security(SecurityClass::Authorization),
        CloseNotify | UserCanceled | NoRenegotiation => retryable(Duration::from_millis(30)),
        DecodeError
        | DecryptError
        | DecryptionFailed
        | HandshakeFailure
        | IllegalParameter
        | RecordOverflow
        | BadRecordMac
        | UnexpectedMessage
        | InsufficientSecurity
        | InternalError
        | InappropriateFallback
        | MissingExtension
        | UnsupportedExtension
        | BadCertificateStatusResponse
        | BadCertificateHashValue
        | UnknownPSKIdentity
        | UnrecognisedName
        | NoApplicationProtocol
        | EncryptedClientHelloRequired
        | ExportRestriction
        | ProtocolVersion => ErrorCategory::Security(SecurityClass::Integrity),
        DecompressionFailure => ErrorCategory::ResourceExhausted(BudgetKind::Memory),
        _ => retryable(Duration::from_millis(40)),
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => retryable(Duration::from_millis(5)),
        ErrorKind::UnexpectedEof => ErrorCategory::Security(SecurityClass::Integrity),
        ErrorKind::WriteZero | ErrorKind::OutOfMemory => {
            ErrorCategory::ResourceExhausted(BudgetKind::Memory)
        }
        _ => retryable(Duration::from_millis(25)),
    }
}

fn retryable(wait: Duration) -> ErrorCategory {
    ErrorCategory::Retryable(RetryAdvice::after(wait))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_record_mac_alert_is_an_integrity_event() {
        let core: CoreError =
            EngineError::Protocol(RustlsError::AlertReceived(AlertDescription::BadRecordMac))
                .into();
        assert_eq!(core.code(), codes::TLS_PROTOCOL);
        assert_eq!(
            core.category(),
            ErrorCategory::Security(SecurityClass::Integrity)
        );
        assert!(core.cause().is_some());
    }

    #[test]
    fn certificate_alert_is_an_authentication_event() {
        assert_eq!(
            alert_to_category(&AlertDescription::UnknownCA),
            ErrorCategory::Security(SecurityClass::Authentication)
        );
    }

    #[test]
    fn overflow_and_truncation_keep_their_codes() {
        let oom: CoreError = EngineError::ChannelOverflow { limit: 8 }.into();
        assert_eq!(oom.code(), codes::OUT_OF_MEMORY);
        assert_eq!(
            oom.category(),
            ErrorCategory::ResourceExhausted(BudgetKind::Memory)
        );

        let truncated: CoreError = EngineError::Truncated.into();
        assert_eq!(truncated.code(), codes::TLS_TRUNCATED);
        assert!(truncated.is_fatal());

        let misuse: CoreError = EngineError::AfterEof.into();
        assert!(!misuse.is_fatal());
    }
}
