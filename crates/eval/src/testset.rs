//! Test-set generation
//!
//! Synthesises (question, ground truth) pairs from indexed child segments.
//! Most questions come from a single segment; with a configurable
//! probability a segment is paired with its successor to force multi-passage
//! questions, and the successor is then skipped. The generator must return a
//! bare JSON object; anything unparseable drops that sample and the run
//! continues.

use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bookwise_core::{Error, GenerateRequest, LanguageModel, Message, Result, Segment};
use bookwise_index::ChunkIndex;

use crate::types::TestQuestion;

/// Segments shorter than this are skipped as question material
const MIN_SEGMENT_CHARS: usize = 50;
/// Segment excerpts are truncated to keep prompts bounded
const MAX_EXCERPT_CHARS: usize = 1000;

/// Synthesises test questions from the index
pub struct TestSetGenerator {
    llm: Arc<dyn LanguageModel>,
    index: Arc<ChunkIndex>,
    book_title: String,
    /// Probability of pairing a segment with its successor
    pub pair_probability: f64,
}

impl TestSetGenerator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        index: Arc<ChunkIndex>,
        book_title: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            index,
            book_title: book_title.into(),
            pair_probability: 0.3,
        }
    }

    /// Generate up to `num_questions` questions (-1 for one per segment).
    ///
    /// Rate limiting, auth failures, and cancellation abort the run; any
    /// other per-sample failure drops that sample.
    pub async fn generate(
        &self,
        num_questions: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestQuestion>> {
        let segments = self.index.children();
        if segments.is_empty() {
            return Err(Error::EmptyInput("no indexed segments".into()));
        }

        let target = if num_questions < 0 {
            segments.len()
        } else {
            (num_questions as usize).min(segments.len())
        };
        info!(target, segments = segments.len(), "generating test set");

        let mut questions = Vec::new();
        let mut i = 0usize;
        while i < target {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let pair_next =
                i + 1 < segments.len() && rand::thread_rng().gen_bool(self.pair_probability);
            let (primary, paired) = if pair_next {
                (&segments[i], Some(&segments[i + 1]))
            } else {
                (&segments[i], None)
            };

            match self.question_from_segments(primary, paired.map(|p| p.as_ref())).await? {
                Some(question) => questions.push(question),
                None => {}
            }

            // A paired successor is consumed and never sampled on its own.
            i += if pair_next { 2 } else { 1 };
        }

        info!(generated = questions.len(), "test-set generation complete");
        Ok(questions)
    }

    /// Returns `Ok(None)` when the segment is unusable or the generator's
    /// output cannot be parsed; fatal transport errors propagate.
    async fn question_from_segments(
        &self,
        primary: &Segment,
        paired: Option<&Segment>,
    ) -> Result<Option<TestQuestion>> {
        if primary.text.trim().len() < MIN_SEGMENT_CHARS {
            return Ok(None);
        }

        let excerpt = truncate_chars(&primary.text, MAX_EXCERPT_CHARS);
        let (prompt, source_segment) = match paired {
            Some(second) => {
                let second_excerpt = truncate_chars(&second.text, MAX_EXCERPT_CHARS);
                let prompt = format!(
                    "Given the following two excerpts from '{title}', generate one test \
                     question that requires information from BOTH excerpts to answer, plus \
                     its ground truth answer.\n\nExcerpt 1:\n{excerpt}\n\nExcerpt 2:\n\
                     {second_excerpt}\n\nRespond ONLY with a JSON object in this exact \
                     format:\n{{\n  \"question\": \"Your question here\",\n  \
                     \"ground_truth\": \"The answer based on both excerpts\"\n}}\n\n\
                     Do not include any other text, only the JSON object.",
                    title = self.book_title
                );
                (prompt, format!("{excerpt}\n\n{second_excerpt}"))
            }
            None => {
                let prompt = format!(
                    "Given the following excerpt from '{title}', generate a test question \
                     and its ground truth answer.\n\nExcerpt:\n{excerpt}\n\nPlease \
                     generate:\n1. A clear, specific question that can be answered using \
                     this excerpt.\n2. A concise ground truth answer (2-3 sentences) based \
                     on the excerpt.\n\nRespond ONLY with a JSON object in this exact \
                     format:\n{{\n  \"question\": \"Your question here\",\n  \
                     \"ground_truth\": \"The answer based on the excerpt\"\n}}\n\n\
                     Do not include any other text, only the JSON object.",
                    title = self.book_title
                );
                (prompt, excerpt.clone())
            }
        };

        let request = GenerateRequest::from_messages(vec![Message::user(prompt)]);
        let response = match self.llm.generate(request).await {
            Ok(response) => response,
            Err(e) if e.is_fatal_for_batch() => return Err(e),
            Err(e) => {
                warn!(error = %e, "question generation failed, dropping sample");
                return Ok(None);
            }
        };

        let Some((question, ground_truth)) = parse_question_json(&response.text) else {
            warn!(raw = %truncate_chars(&response.text, 120), "unparseable question JSON, dropping sample");
            return Ok(None);
        };

        let segment_id = primary
            .metadata
            .item_id
            .clone()
            .unwrap_or_else(|| primary.id.clone());

        Ok(Some(TestQuestion {
            question,
            ground_truth,
            source_segment,
            segment_id,
        }))
    }
}

/// Persist the test set as pretty-printed JSON
pub fn save_test_set(path: impl AsRef<Path>, questions: &[TestQuestion]) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let serialized = serde_json::to_string_pretty(questions)
        .map_err(|e| Error::Eval(format!("serialising test set: {e}")))?;
    std::fs::write(path, serialized)?;
    info!(path = %path.display(), count = questions.len(), "test set saved");
    Ok(())
}

/// Load a previously generated test set
pub fn load_test_set(path: impl AsRef<Path>) -> Result<Vec<TestQuestion>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    serde_json::from_str(&raw).map_err(|e| Error::Parse(format!("test set file: {e}")))
}

/// Extract `question` and `ground_truth` from the generator's reply,
/// tolerating markdown code fences around the JSON object.
fn parse_question_json(raw: &str) -> Option<(String, String)> {
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
    let text = text.trim();

    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let question = value.get("question")?.as_str()?.trim().to_string();
    let ground_truth = value.get("ground_truth")?.as_str()?.trim().to_string();
    if question.is_empty() || ground_truth.is_empty() {
        return None;
    }
    Some((question, ground_truth))
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_question_json_plain() {
        let raw = r#"{"question": "What is a singleton?", "ground_truth": "A class instantiated once."}"#;
        let (q, gt) = parse_question_json(raw).unwrap();
        assert_eq!(q, "What is a singleton?");
        assert!(gt.contains("instantiated"));
    }

    #[test]
    fn test_parse_question_json_fenced() {
        let raw = "```json\n{\"question\": \"Q?\", \"ground_truth\": \"A.\"}\n```";
        assert!(parse_question_json(raw).is_some());
    }

    #[test]
    fn test_parse_question_json_garbage() {
        assert!(parse_question_json("I cannot answer that.").is_none());
        assert!(parse_question_json("{\"question\": \"Q?\"}").is_none());
        assert!(parse_question_json("").is_none());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "x".repeat(20);
        let truncated = truncate_chars(&long, 10);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), 13);
    }
}
