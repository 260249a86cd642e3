//! The answering agent
//!
//! Features:
//! - Retrieval-augmented prompt assembly with labelled source passages
//! - Bounded per-session dialogue memory with oldest-first eviction
//! - Streamed answers that commit to memory only on successful completion

pub mod answerer;
pub mod memory;
pub mod prompt;

pub use answerer::{Answerer, StreamedAnswer};
pub use memory::{DialogueMemory, MemoryConfig};
pub use prompt::{basic_system_role, build_context_prompt, build_system_prompt, source_label};
