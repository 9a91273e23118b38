use eloquence_types::ErrorCode;
use thiserror::Error;

/// Canonical error type for the orchestrator core.
///
/// Internal modules may carry their own context but convert to `CoreError`
/// at module boundaries; the session maps each variant to the wire-level
/// [`ErrorCode`] when a frame must be surfaced.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("service pool exhausted: {0}")]
    Overloaded(String),

    #[error("upstream {service} failure: {message}")]
    Upstream { service: &'static str, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{service} timed out after {elapsed_ms}ms")]
    Timeout { service: &'static str, elapsed_ms: u64 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("speech segment too small ({duration_ms}ms, {bytes} bytes)")]
    SegmentTooSmall { duration_ms: u64, bytes: usize },

    #[error("client cannot keep up with outbound audio")]
    SlowConsumer,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        CoreError::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Wire-level code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Auth(_) => ErrorCode::Auth,
            CoreError::Validation(_) => ErrorCode::Validation,
            CoreError::Overloaded(_) => ErrorCode::Overloaded,
            CoreError::Upstream { .. } => ErrorCode::Upstream,
            CoreError::Cancelled => ErrorCode::Cancelled,
            CoreError::Timeout { .. } => ErrorCode::Timeout,
            CoreError::Transport(_) => ErrorCode::Transport,
            CoreError::SegmentTooSmall { .. } => ErrorCode::SegmentTooSmall,
            CoreError::SlowConsumer => ErrorCode::SlowConsumer,
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization: {e}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_is_total() {
        assert_eq!(CoreError::Cancelled.code(), ErrorCode::Cancelled);
        assert_eq!(
            CoreError::upstream("asr", "500").code(),
            ErrorCode::Upstream
        );
        assert_eq!(
            CoreError::SegmentTooSmall {
                duration_ms: 150,
                bytes: 300
            }
            .code(),
            ErrorCode::SegmentTooSmall
        );
        assert_eq!(CoreError::SlowConsumer.code(), ErrorCode::SlowConsumer);
    }

    #[test]
    fn test_display_carries_context() {
        let err = CoreError::Timeout {
            service: "llm",
            elapsed_ms: 30_000,
        };
        assert_eq!(err.to_string(), "llm timed out after 30000ms");
    }
}
