//! Retrieval pipeline with hybrid search
//!
//! Features:
//! - Query expansion: language normalisation, step-back abstraction, and
//!   hypothetical-answer (HyDE) generation, all degrading gracefully
//! - Dual hybrid search: dense vector + weighted keyword search fused with
//!   reciprocal rank fusion
//! - Feature-weighted reranking over the merged candidates
//! - Small-to-big promotion from matched children to their parents
//! - Deterministic reference embedder for tests and offline use

pub mod embeddings;
pub mod expansion;
pub mod fusion;
pub mod rerank;
pub mod retriever;

pub use embeddings::{EmbeddingConfig, SimpleEmbedder};
pub use expansion::{ExpandedQuery, QueryExpander};
pub use fusion::{reciprocal_rank_fusion, RRF_K};
pub use rerank::{rerank, STOPWORDS};
pub use retriever::{HybridRetriever, RetrieverConfig};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Expansion error: {0}")]
    Expansion(String),

    #[error("Join error: {0}")]
    Join(String),
}

impl From<RagError> for bookwise_core::Error {
    fn from(err: RagError) -> Self {
        bookwise_core::Error::Retrieval(err.to_string())
    }
}
