//! Document ingestion and the chunk index
//!
//! Features:
//! - Semantic chunking into a parent/child segment hierarchy
//! - Structural metadata detection (Item/Chapter/Section headers)
//! - In-memory index with cosine vector search and weighted lexical search
//! - Single-file JSON snapshot with atomic replace and corruption recovery

pub mod chunker;
pub mod store;

pub use chunker::{ChunkedDocument, ChunkerConfig, SemanticChunker};
pub use store::ChunkIndex;

use thiserror::Error;

/// Index errors
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error("Document is empty")]
    EmptyDocument,

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Chunk/embedding count mismatch: {chunks} chunks vs {embeddings} embeddings")]
    CountMismatch { chunks: usize, embeddings: usize },

    #[error("Unknown parent id: {0}")]
    UnknownParent(String),

    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<IndexError> for bookwise_core::Error {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::CountMismatch { chunks, embeddings } => {
                bookwise_core::Error::EmbeddingMismatch { chunks, embeddings }
            }
            IndexError::EmptyDocument => {
                bookwise_core::Error::EmptyInput("document".to_string())
            }
            other => bookwise_core::Error::Index(other.to_string()),
        }
    }
}

/// Cosine similarity between two vectors, 0.0 when either norm vanishes
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_count_mismatch_maps_to_core_taxonomy() {
        let err: bookwise_core::Error = IndexError::CountMismatch {
            chunks: 4,
            embeddings: 3,
        }
        .into();
        assert!(matches!(
            err,
            bookwise_core::Error::EmbeddingMismatch {
                chunks: 4,
                embeddings: 3
            }
        ));
    }
}
