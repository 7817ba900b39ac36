use std::{borrow::Cow, error::Error, fmt, sync::Arc, time::Duration};

/// 稳定错误码集合。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接级故障需要被调用方、日志与告警脚本以统一的码值识别，而不是解析自然语言消息；
/// - 错误码按 `tlswrap.<域>.<语义>` 命名，域划分对应错误分类：传输层、TLS 协议层、资源层与调用契约层。
///
/// ## 契约（What）
/// - 码值一经发布不可改名；新增码值需同步补充 [`CoreError::category`] 的默认分类；
/// - `PartialAcceptance` 不是错误，因此不存在对应码值。
pub mod codes {
    /// 底层传输读失败。
    pub const TRANSPORT_READ: &str = "tlswrap.transport.read_failed";
    /// 底层传输写失败。
    pub const TRANSPORT_WRITE: &str = "tlswrap.transport.write_failed";
    /// 底层传输关闭写方向失败。
    pub const TRANSPORT_SHUTDOWN: &str = "tlswrap.transport.shutdown_failed";
    /// 底层传输已经关闭或被对端重置。
    pub const TRANSPORT_CLOSED: &str = "tlswrap.transport.closed";
    /// TLS 握手或记录层协议违规（证书、MAC、版本、解码错误等）。
    pub const TLS_PROTOCOL: &str = "tlswrap.tls.protocol";
    /// 对端在未发送 close_notify 的情况下关闭了传输。
    pub const TLS_TRUNCATED: &str = "tlswrap.tls.truncated";
    /// 引擎配置无效（证书、私钥、协议版本等）。
    pub const TLS_CONFIG: &str = "tlswrap.tls.config";
    /// 缓冲通道超出允许的容量。
    pub const OUT_OF_MEMORY: &str = "tlswrap.resource.out_of_memory";
    /// 操作因连接关闭而被取消。
    pub const CANCELLED: &str = "tlswrap.stream.cancelled";
    /// 在不允许的连接状态上发起了操作。
    pub const INVALID_STATE: &str = "tlswrap.stream.invalid_state";
    /// 配置文件解析或校验失败。
    pub const CONFIG_INVALID: &str = "tlswrap.config.invalid";
}

/// `CoreError` 表示 tlswrap 各层共享的稳定错误域，是调用方在回调中观察到的唯一错误形态。
///
/// # 设计背景（Why）
/// - 传输失败、TLS 协议失败与资源耗尽分别产生于不同 crate，需要合流为统一的错误码，
///   以便调用方按 [`ErrorCategory`] 做关闭、重试或告警决策；
/// - 同一个致命错误需要扇出给所有挂起的写请求与读回调，因此底层原因以 `Arc` 共享，
///   使 `CoreError` 可以廉价克隆。
///
/// # 契约说明（What）
/// - `code`：`'static` 稳定码值，参见 [`codes`]；
/// - `message`：面向排障人员的描述，不包含敏感数据；
/// - `cause`：可选底层原因（`rustls::Error`、`io::Error` 等），经 [`Error::source`] 暴露；
/// - **后置条件**：未显式设置分类时，[`CoreError::category`] 按码值返回默认分类。
#[derive(Clone, Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

/// 共享的底层错误原因。
pub type ErrorCause = Arc<dyn Error + Send + Sync + 'static>;

/// 工作区统一的 `Result` 别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

impl CoreError {
    /// 使用稳定码值与描述构造错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附带底层原因并返回新的错误。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// 为错误显式标记分类，覆盖码值对应的默认分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 获取结构化分类。
    ///
    /// # 执行逻辑（How）
    /// 1. 优先返回显式设置的分类；
    /// 2. 否则按码值前缀查默认表：传输错误可重试、协议错误属于完整性安全事件、
    ///    资源错误为预算耗尽、取消与非法状态各自对应确定性策略；
    /// 3. 未登记的码值回退为 `NonRetryable`。
    pub fn category(&self) -> ErrorCategory {
        if let Some(category) = &self.category {
            return category.clone();
        }
        default_category(self.code)
    }

    /// 是否为会终止连接的致命错误。
    ///
    /// 传输、协议与资源错误都会让连接进入 Closed；取消与非法状态只影响单次调用。
    pub fn is_fatal(&self) -> bool {
        !matches!(self.code, codes::CANCELLED | codes::INVALID_STATE)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

fn default_category(code: &'static str) -> ErrorCategory {
    match code {
        codes::TRANSPORT_READ | codes::TRANSPORT_WRITE | codes::TRANSPORT_SHUTDOWN => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(50)))
        }
        codes::TRANSPORT_CLOSED => ErrorCategory::NonRetryable,
        codes::TLS_PROTOCOL | codes::TLS_TRUNCATED => {
            ErrorCategory::Security(SecurityClass::Integrity)
        }
        codes::TLS_CONFIG | codes::CONFIG_INVALID => ErrorCategory::NonRetryable,
        codes::OUT_OF_MEMORY => ErrorCategory::ResourceExhausted(BudgetKind::Memory),
        codes::CANCELLED => ErrorCategory::Cancelled,
        codes::INVALID_STATE => ErrorCategory::ProtocolViolation,
        _ => ErrorCategory::NonRetryable,
    }
}

/// 错误分类枚举，驱动调用方的自动化容错策略。
///
/// # 契约说明（What）
/// - `Retryable`：携带退避建议 [`RetryAdvice`]，由调用方决定是否重建连接；
/// - `ResourceExhausted`：指出耗尽的 [`BudgetKind`]；
/// - `Security`：标记安全分类 [`SecurityClass`]；
/// - 其余分支对应确定性策略：`ProtocolViolation` 表示调用方违反了流契约，
///   `Cancelled` 表示请求因关闭被撤销。
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable(RetryAdvice),
    NonRetryable,
    Security(SecurityClass),
    ResourceExhausted(BudgetKind),
    ProtocolViolation,
    Cancelled,
    Timeout,
}

/// 退避建议。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryAdvice {
    /// 推荐的等待时长。
    pub wait: Duration,
    /// 可选的原因描述。
    pub reason: Option<Cow<'static, str>>,
}

impl RetryAdvice {
    /// 构造一个仅包含等待时间的建议。
    pub const fn after(wait: Duration) -> Self {
        Self { wait, reason: None }
    }

    /// 为建议附加原因描述。
    pub fn with_reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// 安全事件分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SecurityClass {
    /// 身份认证失败（证书缺失、过期、不受信任）。
    Authentication,
    /// 授权被拒绝。
    Authorization,
    /// 完整性被破坏（MAC 校验失败、解码错误、截断）。
    Integrity,
    /// 无法归类的安全事件。
    Unknown,
}

/// 被耗尽的资源预算类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BudgetKind {
    /// 缓冲内存。
    Memory,
    /// 流量窗口（写队列深度）。
    Flow,
}

impl BudgetKind {
    /// 面向日志的稳定标签。
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetKind::Memory => "memory",
            BudgetKind::Flow => "flow",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn default_category_follows_code_family() {
        let protocol = CoreError::new(codes::TLS_PROTOCOL, "bad record mac");
        assert_eq!(
            protocol.category(),
            ErrorCategory::Security(SecurityClass::Integrity)
        );

        let oom = CoreError::new(codes::OUT_OF_MEMORY, "inbound channel full");
        assert_eq!(
            oom.category(),
            ErrorCategory::ResourceExhausted(BudgetKind::Memory)
        );

        let cancelled = CoreError::new(codes::CANCELLED, "closed");
        assert_eq!(cancelled.category(), ErrorCategory::Cancelled);
        assert!(!cancelled.is_fatal());
        assert!(oom.is_fatal());
    }

    #[test]
    fn explicit_category_wins_and_cause_is_shared_between_clones() {
        let err = CoreError::new(codes::TRANSPORT_WRITE, "tcp write: broken pipe")
            .with_cause(io::Error::from(io::ErrorKind::BrokenPipe))
            .with_category(ErrorCategory::NonRetryable);
        let copy = err.clone();
        assert_eq!(copy.category(), ErrorCategory::NonRetryable);
        assert!(copy.source().is_some());
        assert_eq!(
            copy.to_string(),
            "[tlswrap.transport.write_failed] tcp write: broken pipe"
        );
        let (a, b) = (err.cause().unwrap(), copy.cause().unwrap());
        assert!(Arc::ptr_eq(a, b));
    }
}
