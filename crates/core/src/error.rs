//! Shared error taxonomy
//!
//! Every crate in the workspace defines its own narrow error enum and
//! converts into this one at the boundary. Remote-call failures carry the
//! upstream status so callers can distinguish auth, throttling, and server
//! errors without string matching.

use thiserror::Error;

/// Workspace-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// The request was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// The upstream model endpoint throttled us (HTTP 429).
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    /// The upstream model endpoint rejected our credentials (HTTP 401).
    #[error("unauthorized by upstream: {0}")]
    Unauthorized(String),

    /// The upstream model endpoint failed (HTTP 5xx).
    #[error("upstream server error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// A public entry point was called with empty input.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Persisted chunk and embedding lists disagree in length.
    #[error("embedding mismatch: {chunks} chunks vs {embeddings} embeddings")]
    EmbeddingMismatch { chunks: usize, embeddings: usize },

    /// Model output could not be parsed (judge verdicts, test-set JSON).
    #[error("parse failed: {0}")]
    Parse(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors that should pause batched work instead of being
    /// retried or swallowed per-item.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::RateLimited(_) | Error::Unauthorized(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }
}

/// Convenience result alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_fatal_classification() {
        assert!(Error::Cancelled.is_fatal_for_batch());
        assert!(Error::RateLimited("slow down".into()).is_fatal_for_batch());
        assert!(Error::Unauthorized("bad key".into()).is_fatal_for_batch());
        assert!(!Error::Parse("not json".into()).is_fatal_for_batch());
        assert!(!Error::EmptyInput("prompt".into()).is_fatal_for_batch());
    }

    #[test]
    fn test_display_includes_status() {
        let err = Error::Upstream {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.to_string().contains("503"));
    }
}
