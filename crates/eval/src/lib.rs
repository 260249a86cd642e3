//! Evaluation harness
//!
//! Features:
//! - Synthetic test-set generation from indexed segments (single- and
//!   paired-segment questions)
//! - Batch runs through the full retrieval and answering pipeline
//! - Generator-as-judge scoring plus two intrinsic metrics
//! - Markdown report and dated JSON history snapshots

pub mod evaluator;
pub mod judge;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod testset;
pub mod types;

pub use evaluator::Evaluator;
pub use judge::{JudgeScorer, JudgeVerdict};
pub use metrics::{answer_similarity, context_precision};
pub use report::{averages, render_markdown};
pub use runner::{BatchOutcome, BatchRunner};
pub use testset::TestSetGenerator;
pub use types::{AverageScores, EvaluationRecord, EvaluationSummary, TestQuestion};
