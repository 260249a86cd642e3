//! Reference embedder
//!
//! A deterministic, dependency-free embedder: hashed word and character
//! trigram features accumulated into a fixed-dimension vector and
//! L2-normalised. Retrieval quality is far below a learned model, but the
//! output is stable across runs, which is what the index persistence layer
//! and the test suites require. Production deployments plug in a real model
//! behind the same `Embedder` trait.

use bookwise_core::{Embedder, Error, Result};

/// Embedder configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Output dimensionality
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 384 }
    }
}

/// Deterministic hashed-feature embedder
pub struct SimpleEmbedder {
    config: EmbeddingConfig,
}

impl SimpleEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let bucket = fnv1a(feature) as usize % vector.len();
        // Second hash decides the sign so features cancel instead of piling
        // onto the positive orthant.
        let sign = if fnv1a(feature).rotate_left(17) & 1 == 0 {
            1.0
        } else {
            -1.0
        };
        vector[bucket] += sign * weight;
    }
}

impl Default for SimpleEmbedder {
    fn default() -> Self {
        Self::new(EmbeddingConfig::default())
    }
}

impl Embedder for SimpleEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.config.dimension == 0 {
            return Err(Error::Config("embedding dimension must be non-zero".into()));
        }

        let mut vector = vec![0.0f32; self.config.dimension];
        let lowered = text.to_lowercase();

        for word in lowered.split_whitespace() {
            let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if word.is_empty() {
                continue;
            }
            self.accumulate(&mut vector, &word, 1.0);

            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                self.accumulate(&mut vector, &trigram, 0.5);
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        "simple-hash"
    }
}

fn fnv1a(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookwise_index::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = SimpleEmbedder::default();
        let a = embedder.embed("enforce the singleton property").unwrap();
        let b = embedder.embed("enforce the singleton property").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimension_and_norm() {
        let embedder = SimpleEmbedder::new(EmbeddingConfig { dimension: 64 });
        let v = embedder.embed("some text to embed").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_texts_score_higher() {
        let embedder = SimpleEmbedder::default();
        let base = embedder.embed("singleton pattern private constructor").unwrap();
        let near = embedder.embed("singleton pattern with a constructor").unwrap();
        let far = embedder.embed("garbage collection heap tuning").unwrap();

        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = SimpleEmbedder::default();
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
