//! LLM error types.

use thiserror::Error;

/// Errors that can occur during language model operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The request never produced a response (DNS, TLS, reset, ...).
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// The provider could not be reached at all.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// Request timed out.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// The provider answered with a non-success status.
    #[error("LLM provider returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// LLM response was not valid JSON.
    #[error("Failed to parse LLM response as JSON: {0}")]
    ParseError(String),

    /// LLM response did not match the expected schema.
    #[error("LLM output schema validation failed: {0}")]
    SchemaValidation(String),

    /// All retry attempts exhausted.
    #[error("All LLM retry attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The final failure.
        last_error: String,
    },

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, and 5xx answers are transient.
    /// Rate-limit (429) and other 4xx answers are final.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Unavailable(_) | Self::RequestFailed(_) => true,
            Self::Http { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs can carry credentials.
        let err = err.without_url();
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else if err.is_decode() {
            LlmError::ParseError(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LlmError::Timeout(100).is_transient());
        assert!(LlmError::Unavailable("refused".into()).is_transient());
        assert!(LlmError::Http { status: 503, body: String::new() }.is_transient());

        assert!(!LlmError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!LlmError::Http { status: 400, body: String::new() }.is_transient());
        assert!(!LlmError::ParseError("bad".into()).is_transient());
        assert!(!LlmError::ConfigError("no key".into()).is_transient());
    }
}
