//! Evaluation facade
//!
//! Ties generation, batch running, and reporting together behind the three
//! operations the HTTP surface exposes: generate a test set, run the batch,
//! or do both end to end. Report and history files are written only when a
//! batch ran to completion; a paused or cancelled batch keeps its partial
//! records in memory and leaves the filesystem untouched.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bookwise_agent::Answerer;
use bookwise_config::StorageSettings;
use bookwise_core::{Error, LanguageModel, Result};
use bookwise_index::ChunkIndex;

use crate::judge::JudgeScorer;
use crate::report;
use crate::runner::BatchRunner;
use crate::testset::{self, TestSetGenerator};
use crate::types::{EvaluationRecord, EvaluationSummary, TestQuestion};

/// Evaluation entry points over one configured pipeline
pub struct Evaluator {
    generator: TestSetGenerator,
    runner: BatchRunner,
    storage: StorageSettings,
    /// Records from the most recent run, kept even when the batch was
    /// paused before any file could be written.
    last_records: Mutex<Vec<EvaluationRecord>>,
}

impl Evaluator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        index: Arc<ChunkIndex>,
        answerer: Arc<Answerer>,
        storage: StorageSettings,
    ) -> Self {
        let generator =
            TestSetGenerator::new(Arc::clone(&llm), index, storage.book_title.clone());
        let runner = BatchRunner::new(answerer, JudgeScorer::new(llm));
        Self {
            generator,
            runner,
            storage,
            last_records: Mutex::new(Vec::new()),
        }
    }

    /// Generate and persist a test set (-1 questions = one per segment)
    pub async fn generate_test_set(
        &self,
        num_questions: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestQuestion>> {
        let questions = self.generator.generate(num_questions, cancel).await?;
        if questions.is_empty() {
            return Err(Error::Eval("test-set generation produced no questions".into()));
        }
        testset::save_test_set(self.storage.test_set_path(), &questions)?;
        Ok(questions)
    }

    /// Run the persisted test set through the pipeline and, on full
    /// completion, write the report and a dated history snapshot.
    pub async fn run_batch_test(&self, cancel: &CancellationToken) -> Result<EvaluationSummary> {
        let questions = testset::load_test_set(self.storage.test_set_path())?;
        if questions.is_empty() {
            return Err(Error::EmptyInput("test set".into()));
        }
        self.run_questions(&questions, cancel).await
    }

    /// Full flow: generate a fresh test set, evaluate it, write outputs
    pub async fn run_full_evaluation(
        &self,
        num_questions: i64,
        cancel: &CancellationToken,
    ) -> Result<EvaluationSummary> {
        let questions = self.generate_test_set(num_questions, cancel).await?;
        let mut summary = self.run_questions(&questions, cancel).await?;
        summary.test_set_path = Some(self.storage.test_set_path().display().to_string());
        Ok(summary)
    }

    async fn run_questions(
        &self,
        questions: &[TestQuestion],
        cancel: &CancellationToken,
    ) -> Result<EvaluationSummary> {
        let outcome = self.runner.run(questions, cancel).await;

        *self.last_records.lock() = outcome.records.clone();

        if let Some(failure) = outcome.failure {
            warn!(
                completed = outcome.records.len(),
                error = %failure,
                "batch stopped early; no report or history written"
            );
            return Err(failure);
        }

        let report_path = report::write_report(self.storage.report_path(), &outcome.records)?;
        let history_path =
            report::write_history(self.storage.history_dir_path(), &outcome.records)?;

        info!(questions = outcome.records.len(), "evaluation complete");
        Ok(EvaluationSummary {
            num_questions: outcome.records.len(),
            average_scores: report::averages(&outcome.records),
            test_set_path: None,
            report_path: Some(report_path.display().to_string()),
            history_path: Some(history_path.display().to_string()),
        })
    }

    /// Records from the most recent run (complete or partial)
    pub fn last_records(&self) -> Vec<EvaluationRecord> {
        self.last_records.lock().clone()
    }

    /// Read the persisted Markdown report
    pub fn read_report(&self) -> Result<String> {
        let path = self.storage.report_path();
        if !path.exists() {
            return Err(Error::Eval(
                "no evaluation report found; run an evaluation first".into(),
            ));
        }
        Ok(std::fs::read_to_string(path)?)
    }

    /// Tuning access for tests and callers that need a smaller fan-out
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.runner = self.runner.with_max_concurrency(max_concurrency);
        self
    }

    /// Override the probability of paired-segment questions
    pub fn with_pair_probability(mut self, probability: f64) -> Self {
        self.generator.pair_probability = probability;
        self
    }
}
