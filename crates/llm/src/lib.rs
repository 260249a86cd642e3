//! Generator backend
//!
//! Features:
//! - OpenAI-compatible chat completion client (OpenRouter, local gateways)
//! - Blocking and SSE streaming generation
//! - Retry with exponential backoff for transient failures
//! - Upstream status codes mapped onto the shared error taxonomy

pub mod backend;

pub use backend::OpenRouterBackend;

use thiserror::Error;

/// LLM transport errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited (429): {0}")]
    RateLimited(String),

    #[error("Unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Transient failures worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::Timeout | LlmError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for bookwise_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited(message) => bookwise_core::Error::RateLimited(message),
            LlmError::Unauthorized(message) => bookwise_core::Error::Unauthorized(message),
            LlmError::Server { status, message } => {
                bookwise_core::Error::Upstream { status, message }
            }
            other => bookwise_core::Error::Llm(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(LlmError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!LlmError::RateLimited("slow down".into()).is_retryable());
        assert!(!LlmError::Unauthorized("bad key".into()).is_retryable());
    }

    #[test]
    fn test_status_mapping_to_core() {
        let err: bookwise_core::Error = LlmError::RateLimited("quota".into()).into();
        assert!(err.is_rate_limited());

        let err: bookwise_core::Error = LlmError::Server {
            status: 502,
            message: "bad gateway".into(),
        }
        .into();
        assert!(matches!(
            err,
            bookwise_core::Error::Upstream { status: 502, .. }
        ));
    }
}
