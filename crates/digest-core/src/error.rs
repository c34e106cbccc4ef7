//! Error types for the memo digest pipeline.
//!
//! Every variant projects onto a small, transport-neutral [`ErrorCode`]
//! taxonomy so the HTTP layer (and any future RPC layer) can map failures
//! without string matching.

use serde::Serialize;
use thiserror::Error;

/// Result type alias using the digest Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for digest operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Note not found
    #[error("Note not found: {0}")]
    NoteNotFound(uuid::Uuid),

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Required configuration or state is missing
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Quota exhausted, locally or at the provider
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A single call exceeded its deadline
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The provider returned an error response
    #[error("Inference error: {message}")]
    Inference {
        /// HTTP status of the provider response, when one was received.
        status: Option<u16>,
        message: String,
    },

    /// Operation aborted by its caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Caller is not authenticated
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-neutral failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    FailedPrecondition,
    ResourceExhausted,
    NotFound,
    DeadlineExceeded,
    Unauthenticated,
    PermissionDenied,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substrings that mark a provider failure as throttling.
const THROTTLING_MARKERS: &[&str] = &["429", "rate_limit", "rate limit", "too many requests"];

impl Error {
    /// Project this error onto the taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotFound(_) | Error::NoteNotFound(_) => ErrorCode::NotFound,
            Error::InvalidInput(_) => ErrorCode::InvalidArgument,
            Error::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Error::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            Error::DeadlineExceeded(_) => ErrorCode::DeadlineExceeded,
            Error::Cancelled(_) => ErrorCode::Cancelled,
            Error::Unauthorized(_) => ErrorCode::Unauthenticated,
            Error::Forbidden(_) => ErrorCode::PermissionDenied,
            Error::Database(_)
            | Error::Inference { .. }
            | Error::Serialization(_)
            | Error::Request(_)
            | Error::Internal(_)
            | Error::Io(_) => ErrorCode::Internal,
        }
    }

    /// Whether this failure carries the provider throttling signature.
    ///
    /// An explicit HTTP 429 always counts. Otherwise the rendered message is
    /// searched, because some providers tunnel throttling through 200/400
    /// bodies or transport errors.
    pub fn is_throttling(&self) -> bool {
        match self {
            Error::Inference {
                status: Some(429), ..
            } => true,
            Error::Inference { message, .. } | Error::Request(message) => {
                contains_throttling_marker(message)
            }
            _ => false,
        }
    }

    /// Build an inference error from a provider response.
    pub fn inference(status: Option<u16>, message: impl Into<String>) -> Self {
        Error::Inference {
            status,
            message: message.into(),
        }
    }
}

fn contains_throttling_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    THROTTLING_MARKERS.iter().any(|m| lower.contains(m))
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Error::DeadlineExceeded(e.to_string());
        }
        if let Some(status) = e.status() {
            return Error::inference(Some(status.as_u16()), e.to_string());
        }
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("no memos found in the specified time range".to_string());
        assert_eq!(
            err.to_string(),
            "Not found: no memos found in the specified time range"
        );
    }

    #[test]
    fn test_error_display_note_not_found() {
        let id = Uuid::nil();
        let err = Error::NoteNotFound(id);
        assert_eq!(err.to_string(), format!("Note not found: {}", id));
    }

    #[test]
    fn test_error_display_inference() {
        let err = Error::inference(Some(500), "upstream exploded");
        assert_eq!(err.to_string(), "Inference error: upstream exploded");
    }

    #[test]
    fn test_error_display_resource_exhausted() {
        let err = Error::ResourceExhausted("quota".to_string());
        assert_eq!(err.to_string(), "Resource exhausted: quota");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::InvalidInput("x".into()).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            Error::FailedPrecondition("x".into()).code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            Error::ResourceExhausted("x".into()).code(),
            ErrorCode::ResourceExhausted
        );
        assert_eq!(Error::NoteNotFound(Uuid::nil()).code(), ErrorCode::NotFound);
        assert_eq!(
            Error::DeadlineExceeded("x".into()).code(),
            ErrorCode::DeadlineExceeded
        );
        assert_eq!(Error::Unauthorized("x".into()).code(), ErrorCode::Unauthenticated);
        assert_eq!(Error::Forbidden("x".into()).code(), ErrorCode::PermissionDenied);
        assert_eq!(Error::Cancelled("x".into()).code(), ErrorCode::Cancelled);
        assert_eq!(Error::inference(None, "x").code(), ErrorCode::Internal);
        assert_eq!(Error::Internal("x".into()).code(), ErrorCode::Internal);
    }

    #[test]
    fn test_error_code_strings() {
        assert_eq!(ErrorCode::ResourceExhausted.to_string(), "RESOURCE_EXHAUSTED");
        assert_eq!(
            serde_json::to_string(&ErrorCode::FailedPrecondition).unwrap(),
            "\"FAILED_PRECONDITION\""
        );
    }

    #[test]
    fn test_throttling_by_status() {
        assert!(Error::inference(Some(429), "slow down").is_throttling());
        assert!(!Error::inference(Some(500), "boom").is_throttling());
    }

    #[test]
    fn test_throttling_by_message() {
        assert!(Error::inference(Some(400), "error code: rate_limit_exceeded").is_throttling());
        assert!(Error::inference(None, "HTTP 429 returned").is_throttling());
        assert!(Error::Request("Too Many Requests".into()).is_throttling());
        assert!(Error::inference(None, "Rate limit reached for model").is_throttling());
    }

    #[test]
    fn test_non_inference_errors_are_not_throttling() {
        assert!(!Error::DeadlineExceeded("429".into()).is_throttling());
        assert!(!Error::ResourceExhausted("rate limit".into()).is_throttling());
        assert!(!Error::Request("connection refused".into()).is_throttling());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
