//! Batch evaluation runner
//!
//! Drives every test question through the full answering pipeline with
//! bounded concurrency. Rate limiting pauses the batch instead of retrying
//! blindly; cancellation stops dispatch and drops in-flight work. Whatever
//! completed stays available to the caller either way.

use std::sync::Arc;

use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bookwise_agent::Answerer;
use bookwise_core::{Error, Result};

use crate::judge::JudgeScorer;
use crate::metrics::{answer_similarity, context_precision};
use crate::types::{EvaluationRecord, TestQuestion};

/// Outcome of a batch run: the completed records plus the failure that
/// stopped the batch early, if any.
pub struct BatchOutcome {
    pub records: Vec<EvaluationRecord>,
    pub failure: Option<Error>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs test questions through answerer and judge
pub struct BatchRunner {
    answerer: Arc<Answerer>,
    judge: JudgeScorer,
    max_concurrency: usize,
}

impl BatchRunner {
    pub fn new(answerer: Arc<Answerer>, judge: JudgeScorer) -> Self {
        let max_concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            answerer,
            judge,
            max_concurrency,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Evaluate all questions with in-flight work capped to the worker-pool
    /// size. The first fatal error (rate limit, auth, cancellation) stops
    /// further dispatch; completed records are returned either way.
    pub async fn run(
        &self,
        questions: &[TestQuestion],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        info!(
            questions = questions.len(),
            concurrency = self.max_concurrency,
            "starting batch evaluation"
        );

        let mut records = Vec::with_capacity(questions.len());
        let mut failure = None;

        {
            let mut in_flight = stream::iter(questions.to_vec())
                .map(|question| async move { self.evaluate_one(&question, cancel).await })
                .buffer_unordered(self.max_concurrency);

            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        warn!("batch evaluation cancelled");
                        failure = Some(Error::Cancelled);
                        break;
                    }
                    item = in_flight.next() => item,
                };

                match item {
                    None => break,
                    Some(Ok(record)) => {
                        records.push(record);
                        if records.len() % 10 == 0 || records.len() == questions.len() {
                            info!(done = records.len(), total = questions.len(), "batch progress");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "batch evaluation paused by fatal error");
                        failure = Some(e);
                        break;
                    }
                }
            }
            // Dropping the stream here abandons any in-flight futures.
        }

        info!(
            completed = records.len(),
            complete = failure.is_none(),
            "batch evaluation finished"
        );
        BatchOutcome { records, failure }
    }

    /// Evaluate a single question. Fatal transport errors propagate; any
    /// other answering failure produces a zero-scored record so the batch
    /// keeps its shape.
    async fn evaluate_one(
        &self,
        question: &TestQuestion,
        cancel: &CancellationToken,
    ) -> Result<EvaluationRecord> {
        let (answer, sources) = match self.answerer.answer_collected(&question.question, cancel).await
        {
            Ok(result) => result,
            Err(e) if e.is_fatal_for_batch() => return Err(e),
            Err(e) => {
                warn!(question = %question.question, error = %e, "answering failed");
                return Ok(error_record(question, &e));
            }
        };

        let source_texts: Vec<String> = sources
            .iter()
            .map(|s| s.segment.text.clone())
            .collect();

        let verdict = self
            .judge
            .score(
                &question.question,
                &answer,
                &question.ground_truth,
                &question.source_segment,
            )
            .await?;

        let context_precision_score = context_precision(&source_texts, &question.source_segment);
        let answer_similarity_score = answer_similarity(&answer, &question.ground_truth);

        Ok(EvaluationRecord {
            question: question.question.clone(),
            rag_answer: answer,
            ground_truth: question.ground_truth.clone(),
            faithfulness_score: verdict.faithfulness,
            relevance_score: verdict.relevance,
            context_precision_score,
            answer_similarity_score,
            judge_reasoning: verdict.reasoning,
            sources_used: source_texts,
        })
    }
}

fn error_record(question: &TestQuestion, error: &Error) -> EvaluationRecord {
    EvaluationRecord {
        question: question.question.clone(),
        rag_answer: format!("Error: {error}"),
        ground_truth: question.ground_truth.clone(),
        faithfulness_score: 0.0,
        relevance_score: 0.0,
        context_precision_score: 0.0,
        answer_similarity_score: 0.0,
        judge_reasoning: "evaluation failed".to_string(),
        sources_used: Vec::new(),
    }
}
