//! Embedder trait

use crate::Result;

/// Maps a text string to a fixed-dimension dense float vector.
///
/// Implementations must be deterministic for identical input; the index
/// persists raw vectors and compares them across process restarts.
/// Embedding is a CPU-bound operation; async callers dispatch it through
/// `tokio::task::spawn_blocking`.
pub trait Embedder: Send + Sync + 'static {
    /// Embed a text into a vector of `dimension()` floats
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimensionality, fixed for the lifetime of the embedder
    fn dimension(&self) -> usize;

    /// Embedder name for logging
    fn name(&self) -> &str {
        "embedder"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnitEmbedder;

    impl Embedder for UnitEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_embedder_object_safety() {
        let embedder: Box<dyn Embedder> = Box::new(UnitEmbedder);
        assert_eq!(embedder.dimension(), 2);
        assert_eq!(embedder.embed("anything").unwrap(), vec![1.0, 0.0]);
    }
}
