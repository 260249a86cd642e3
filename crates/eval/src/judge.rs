//! Generator-as-judge scoring

use std::sync::Arc;

use tracing::{debug, warn};

use bookwise_core::{GenerateRequest, LanguageModel, Result};

/// System prompt constraining the judge to a bare JSON verdict
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert evaluator for RAG (Retrieval-Augmented Generation) systems.
Your task is to objectively score answers based on two criteria:

1. **Faithfulness** (0-1): Does the answer accurately reflect the provided context?
   - 1.0: Answer is completely faithful to the context, no hallucinations
   - 0.5: Answer is partially faithful but contains some inaccuracies
   - 0.0: Answer contradicts or ignores the context

2. **Relevance** (0-1): Does the answer address the question?
   - 1.0: Answer directly and completely addresses the question
   - 0.5: Answer partially addresses the question
   - 0.0: Answer does not address the question

You must respond ONLY with a JSON object in this exact format:
{
  "faithfulness": 0.85,
  "relevance": 0.90,
  "reasoning": "Brief explanation of scores"
}

Do not include any other text, only the JSON object."#;

/// A judge verdict, clamped to [0, 1]
#[derive(Debug, Clone, serde::Deserialize)]
pub struct JudgeVerdict {
    #[serde(default)]
    pub faithfulness: f64,
    #[serde(default)]
    pub relevance: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl JudgeVerdict {
    fn clamped(mut self) -> Self {
        self.faithfulness = self.faithfulness.clamp(0.0, 1.0);
        self.relevance = self.relevance.clamp(0.0, 1.0);
        self
    }

    fn zero(reasoning: impl Into<String>) -> Self {
        Self {
            faithfulness: 0.0,
            relevance: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

/// Scores answers with a dedicated judge prompt
pub struct JudgeScorer {
    llm: Arc<dyn LanguageModel>,
}

impl JudgeScorer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Score an answer against its question, ground truth, and source
    /// context. Unparseable verdicts default to zero; rate limiting, auth
    /// failures, and cancellation propagate.
    pub async fn score(
        &self,
        question: &str,
        answer: &str,
        ground_truth: &str,
        source_context: &str,
    ) -> Result<JudgeVerdict> {
        let prompt = format!(
            "Question: {question}\n\nRAG Answer: {answer}\n\nGround Truth: {truth}\n\n\
             Source Context: {context}\n\nPlease evaluate the RAG Answer based on:\n\
             1. Faithfulness: Does the RAG Answer accurately reflect the Source Context?\n\
             2. Relevance: Does the RAG Answer address the Question?\n\n\
             Respond with ONLY a JSON object in this format:\n\
             {{\"faithfulness\": 0.85, \"relevance\": 0.90, \"reasoning\": \"Brief explanation\"}}",
            answer = truncate(answer, 500),
            truth = ground_truth,
            context = truncate(source_context, 500),
        );

        let request =
            GenerateRequest::new(JUDGE_SYSTEM_PROMPT).with_user_message(prompt);

        let response = match self.llm.generate(request).await {
            Ok(response) => response,
            Err(e) if e.is_fatal_for_batch() => return Err(e),
            Err(e) => {
                warn!(error = %e, "judge call failed, scoring zero");
                return Ok(JudgeVerdict::zero(format!("judging failed: {e}")));
            }
        };

        match parse_verdict(&response.text) {
            Some(verdict) => {
                debug!(
                    faithfulness = verdict.faithfulness,
                    relevance = verdict.relevance,
                    "judge verdict"
                );
                Ok(verdict)
            }
            None => {
                warn!("judge returned unparseable verdict, scoring zero");
                Ok(JudgeVerdict::zero("unparseable judge output"))
            }
        }
    }
}

fn parse_verdict(raw: &str) -> Option<JudgeVerdict> {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    serde_json::from_str::<JudgeVerdict>(text.trim())
        .ok()
        .map(JudgeVerdict::clamped)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}
