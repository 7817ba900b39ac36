use tlswrap_core::{CoreError, ErrorCategory, codes};

/// 一类流操作在错误文案中的名称。
#[derive(Clone, Copy)]
pub(crate) struct OperationKind {
    pub name: &'static str,
}

pub(crate) const START: OperationKind = OperationKind { name: "tls start" };
pub(crate) const READ: OperationKind = OperationKind { name: "tls read" };
pub(crate) const WRITE: OperationKind = OperationKind { name: "tls write" };
pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    name: "tls shutdown",
};
pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    name: "tls handshake",
};

/// 流已被调用方关闭。
pub(crate) fn closed_error(kind: OperationKind) -> CoreError {
    CoreError::new(
        codes::TRANSPORT_CLOSED,
        format!("{}: stream closed", kind.name),
    )
    .with_category(ErrorCategory::NonRetryable)
}

/// 调用违反流契约，例如关闭写方向后继续写入。
pub(crate) fn invalid_state(kind: OperationKind, detail: &str) -> CoreError {
    CoreError::new(codes::INVALID_STATE, format!("{}: {detail}", kind.name))
}

/// 因 `close` 而撤销的请求。
pub(crate) fn cancelled_error(kind: OperationKind) -> CoreError {
    CoreError::new(codes::CANCELLED, format!("{} cancelled", kind.name))
        .with_category(ErrorCategory::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_errors_are_not_fatal() {
        assert!(!invalid_state(WRITE, "after shutdown").is_fatal());
        assert!(!cancelled_error(SHUTDOWN).is_fatal());
        assert_eq!(cancelled_error(WRITE).category(), ErrorCategory::Cancelled);
        assert_eq!(
            closed_error(READ).message(),
            "tls read: stream closed"
        );
    }
}
