//! Evaluation data types

use serde::{Deserialize, Serialize};

/// A synthesised test question with its ground truth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestQuestion {
    pub question: String,
    pub ground_truth: String,
    /// The segment text(s) the question was synthesised from
    pub source_segment: String,
    pub segment_id: String,
}

/// One evaluated question with the system's answer and all scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub question: String,
    pub rag_answer: String,
    pub ground_truth: String,
    pub faithfulness_score: f64,
    pub relevance_score: f64,
    pub context_precision_score: f64,
    pub answer_similarity_score: f64,
    pub judge_reasoning: String,
    pub sources_used: Vec<String>,
}

/// Averages over a batch, serialised camelCase for the history file
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageScores {
    pub faithfulness: f64,
    pub relevance: f64,
    pub context_precision: f64,
    pub answer_similarity: f64,
}

/// Summary returned by the evaluation entry points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub num_questions: usize,
    pub average_scores: AverageScores,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_set_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_path: Option<String>,
}
