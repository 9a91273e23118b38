use serde::{Deserialize, Serialize};

/// Closed set of error kinds shared between the orchestrator and the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Auth,
    Validation,
    Overloaded,
    Upstream,
    Cancelled,
    Timeout,
    Transport,
    SegmentTooSmall,
    SlowConsumer,
    NotFound,
    Internal,
}

impl ErrorCode {
    /// Errors that terminate the session once surfaced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::SlowConsumer | ErrorCode::Transport | ErrorCode::Internal
        )
    }

    /// Errors that are never surfaced to the client.
    pub fn is_internal_only(&self) -> bool {
        matches!(self, ErrorCode::Cancelled | ErrorCode::SegmentTooSmall)
    }

    /// Errors for which the client may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Overloaded | ErrorCode::Timeout)
    }
}

/// Payload of an `error` control frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::SegmentTooSmall).unwrap();
        assert_eq!(json, r#""segment_too_small""#);

        let code: ErrorCode = serde_json::from_str(r#""slow_consumer""#).unwrap();
        assert_eq!(code, ErrorCode::SlowConsumer);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ErrorCode::Transport.is_fatal());
        assert!(ErrorCode::Internal.is_fatal());
        assert!(!ErrorCode::Upstream.is_fatal());
        assert!(!ErrorCode::Overloaded.is_fatal());
    }

    #[test]
    fn test_internal_only_never_retryable() {
        assert!(ErrorCode::Cancelled.is_internal_only());
        assert!(ErrorCode::SegmentTooSmall.is_internal_only());
        assert!(!ErrorCode::Cancelled.is_retryable());
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = ErrorPayload::new(ErrorCode::Overloaded, "try again").with_retry_after_ms(5000);
        let json = serde_json::to_string(&payload).unwrap();
        let back: ErrorPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code(), ErrorCode::Overloaded);
        assert_eq!(back.retry_after_ms(), Some(5000));
    }
}
