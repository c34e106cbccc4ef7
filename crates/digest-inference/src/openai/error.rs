//! OpenAI-specific error handling.

use digest_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model or endpoint not found.
    NotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) | (403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (_, t) if t.contains("rate_limit") => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::NotFound,
            (400, t) if t.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether the pipeline should wait and try again.
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::RateLimitExceeded)
    }
}

/// Convert a provider error response into a digest Error.
///
/// The status code is kept so downstream classification (throttling,
/// connectivity diagnosis) does not have to parse messages.
pub fn to_digest_error(status: u16, code: OpenAIErrorCode, message: &str) -> Error {
    let detail = match code {
        OpenAIErrorCode::AuthenticationError => format!("Authentication failed: {}", message),
        OpenAIErrorCode::RateLimitExceeded => format!("Rate limit exceeded: {}", message),
        OpenAIErrorCode::NotFound => format!("Not found: {}", message),
        OpenAIErrorCode::ContextLengthExceeded => format!("Context too long: {}", message),
        OpenAIErrorCode::ServerError => format!("Server error: {}", message),
        OpenAIErrorCode::Unknown => message.to_string(),
    };
    // Throttling signalled only through the error type still needs to be
    // recognised by status.
    let status = if code.is_throttling() { 429 } else { status };
    Error::inference(Some(status), format!("AI provider returned {}: {}", status, detail))
}
