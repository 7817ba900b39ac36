use tlswrap_core::{CoreError, ErrorCategory, codes};

/// 一类内存传输操作的错误码与默认文案。
#[derive(Clone, Copy)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const READ: OperationKind = OperationKind {
    code: codes::TRANSPORT_READ,
    message: "pipe read",
};

pub(crate) const WRITE: OperationKind = OperationKind {
    code: codes::TRANSPORT_WRITE,
    message: "pipe write",
};

pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: codes::TRANSPORT_SHUTDOWN,
    message: "pipe shutdown",
};

/// 端点已关闭时的同步拒绝。
pub(crate) fn closed_error(kind: OperationKind) -> CoreError {
    CoreError::new(
        codes::TRANSPORT_CLOSED,
        format!("{}: endpoint closed", kind.message),
    )
}

/// 对端已关闭，写入无处可去。
pub(crate) fn peer_gone_error(kind: OperationKind) -> CoreError {
    CoreError::new(kind.code, format!("{}: peer closed", kind.message))
        .with_category(ErrorCategory::NonRetryable)
}

/// 写方向已经关闭之后的写请求。
pub(crate) fn write_after_shutdown(kind: OperationKind) -> CoreError {
    CoreError::new(
        codes::INVALID_STATE,
        format!("{}: write side already shut down", kind.message),
    )
}

/// 因本端 `close` 而撤销的请求。
pub(crate) fn cancelled_error(kind: OperationKind) -> CoreError {
    CoreError::new(codes::CANCELLED, format!("{} cancelled", kind.message))
}
