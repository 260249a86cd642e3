//! Core traits and types for the book assistant
//!
//! This crate provides foundational types used across all other crates:
//! - The shared error taxonomy
//! - LLM request/response and streaming types
//! - The document segment model (parent/child hierarchy)
//! - Traits for pluggable backends (language model, embedder)

pub mod error;
pub mod llm_types;
pub mod segment;
pub mod traits;

pub use error::{Error, Result};
pub use llm_types::{FinishReason, GenerateRequest, GenerateResponse, Message, Role, StreamChunk};
pub use segment::{ScoredSegment, Segment, SegmentKind, SegmentMetadata};
pub use traits::{ChunkStream, Embedder, LanguageModel};
