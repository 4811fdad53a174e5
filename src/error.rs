//! Error types for the interpretation runtime.
//!
//! Every fallible operation in the runtime reports through [`RuntimeError`];
//! the C-style process-wide last-error slot of other HVML implementations
//! maps here to plain `Result` returns threaded with `?`.
//!
//! Each variant exposes a stable kebab-case kind name via
//! [`RuntimeError::kind`]. Kind names are what `<except type="…">` and
//! `<error type="…">` handlers match against, with `"*"` matching any kind.

use thiserror::Error;

/// Errors raised by the runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Allocation failure surfaced by a container or buffer
    #[error("out of memory")]
    Oom,

    /// A value of the wrong kind, or an undefined required value
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// An attribute, key, or registration that already exists
    #[error("duplicated: {0}")]
    Duplicated(String),

    /// A required attribute was not provided
    #[error("argument missed: {0}")]
    ArgumentMissed(String),

    /// The operation exists but the receiver does not support it
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The operation is not implemented for this path
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Lookup of a key, variable, or iterator position found nothing
    #[error("not exists: {0}")]
    NotExists(String),

    /// A fetch or read produced no data
    #[error("no data: {0}")]
    NoData(String),

    /// A libc-level call failed underneath the runtime
    #[error("bad stdc call: {0}")]
    BadStdcCall(String),

    /// A caller-provided buffer was too small for the payload
    #[error("too small buffer: need {need}, got {got}")]
    TooSmallBuff { need: usize, got: usize },

    /// The renderer transport dropped mid-request
    #[error("connection aborted: {0}")]
    ConnectionAborted(String),

    /// The renderer answered with a non-OK return code
    #[error("server refused: ret-code {0}")]
    ServerRefused(u32),

    /// A malformed message arrived on the renderer connection
    #[error("bad message: {0}")]
    BadMessage(String),

    /// A message parsed but its payload was unusable
    #[error("bad message payload: {0}")]
    BadMsgPayload(String),

    /// The renderer rejected our credentials
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The server's protocol version is below our declared minimum
    #[error("wrong version: server {server}, minimal {minimal}")]
    WrongVersion { server: u32, minimal: u32 },

    /// Reading from a stream or file failed
    #[error("failed read: {0}")]
    FailedRead(String),

    /// Writing to a stream or file failed
    #[error("failed write: {0}")]
    FailedWrite(String),

    /// Allocation failure inside an iterate executor
    #[error("executor: out of memory")]
    ExecutorOom,

    /// An iterate executor received an unusable input or rule
    #[error("executor: bad argument: {0}")]
    ExecutorBadArg(String),

    /// An executor rule selected no keys
    #[error("executor: no keys selected")]
    ExecutorNoKeysSelected,

    /// An executor rule reached an unfinished code path
    #[error("executor: not implemented: {0}")]
    ExecutorNotImplemented(String),
}

/// Result alias used throughout the runtime.
pub type ExecResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    /// Stable kind name, as matched by `error`/`except` handler `type`
    /// attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Oom => "oom",
            Self::InvalidValue(_) => "invalid-value",
            Self::Duplicated(_) => "duplicated",
            Self::ArgumentMissed(_) => "argument-missed",
            Self::NotSupported(_) => "not-supported",
            Self::NotImplemented(_) => "not-implemented",
            Self::NotExists(_) => "not-exists",
            Self::NoData(_) => "no-data",
            Self::BadStdcCall(_) => "bad-stdc-call",
            Self::TooSmallBuff { .. } => "too-small-buff",
            Self::ConnectionAborted(_) => "connection-aborted",
            Self::ServerRefused(_) => "server-refused",
            Self::BadMessage(_) => "bad-message",
            Self::BadMsgPayload(_) => "bad-msg-payload",
            Self::AuthFailed(_) => "auth-failed",
            Self::WrongVersion { .. } => "wrong-version",
            Self::FailedRead(_) => "failed-read",
            Self::FailedWrite(_) => "failed-write",
            Self::ExecutorOom => "executor-oom",
            Self::ExecutorBadArg(_) => "executor-bad-arg",
            Self::ExecutorNoKeysSelected => "executor-no-keys-selected",
            Self::ExecutorNotImplemented(_) => "executor-not-implemented",
        }
    }

    /// Whether a handler `type` attribute matches this error.
    pub fn matches(&self, handler_type: &str) -> bool {
        handler_type == "*" || handler_type == self.kind()
    }

    /// Create an invalid-value error with a message.
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Create a not-implemented error with a message.
    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create an argument-missed error naming the attribute.
    pub fn argument_missed(attr: impl Into<String>) -> Self {
        Self::ArgumentMissed(attr.into())
    }

    /// Create a not-exists error with a message.
    pub fn not_exists(msg: impl Into<String>) -> Self {
        Self::NotExists(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::WrongVersion { server: 100, minimal: 120 };
        assert_eq!(err.to_string(), "wrong version: server 100, minimal 120");

        let err = RuntimeError::invalid_value("string expected");
        assert_eq!(err.to_string(), "invalid value: string expected");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RuntimeError::Oom.kind(), "oom");
        assert_eq!(RuntimeError::argument_missed("on").kind(), "argument-missed");
        assert_eq!(RuntimeError::ExecutorNoKeysSelected.kind(), "executor-no-keys-selected");
    }

    #[test]
    fn test_handler_matching() {
        let err = RuntimeError::invalid_value("x");
        assert!(err.matches("invalid-value"));
        assert!(err.matches("*"));
        assert!(!err.matches("no-data"));
    }

    static_assertions::assert_impl_all!(RuntimeError: Send, Sync, Clone);
}
