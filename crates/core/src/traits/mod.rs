//! Traits for pluggable backends

pub mod embedder;
pub mod llm;

pub use embedder::Embedder;
pub use llm::{ChunkStream, LanguageModel};
