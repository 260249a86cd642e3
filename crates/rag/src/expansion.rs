//! Query expansion
//!
//! Derives up to four search inputs from one user query:
//! - a language-normalised query (non-English input is translated into
//!   English search keywords)
//! - a step-back question, one abstraction level above the original
//! - hypothetical book-style answers (HyDE) for both of the above
//!
//! Every generator call here is opportunistic: a failure logs a warning and
//! falls back to the previous form of the query, never aborting retrieval.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bookwise_config::RagFeatures;
use bookwise_core::{Error, GenerateRequest, LanguageModel, Result};

/// The derived queries for one retrieval request
#[derive(Debug, Clone)]
pub struct ExpandedQuery {
    /// Original user query, untouched
    pub original: String,
    /// Language-normalised query used for lexical search
    pub query_en: String,
    /// Whether a translation call was made
    pub translated: bool,
    /// Step-back conceptual question, when enabled and generated
    pub step_back: Option<String>,
    /// Hypothetical answer for `query_en`, when HyDE is enabled
    pub hyde: Option<String>,
    /// Hypothetical answer for the step-back question
    pub step_back_hyde: Option<String>,
}

impl ExpandedQuery {
    /// Text to embed for the primary vector-search branch
    pub fn primary_embed_text(&self) -> &str {
        self.hyde.as_deref().unwrap_or(&self.query_en)
    }

    /// Text to embed for the step-back branch, when it exists
    pub fn step_back_embed_text(&self) -> Option<&str> {
        self.step_back
            .as_deref()
            .map(|q| self.step_back_hyde.as_deref().unwrap_or(q))
    }
}

/// Expands user queries through the generator
pub struct QueryExpander {
    llm: Arc<dyn LanguageModel>,
    book_title: String,
}

impl QueryExpander {
    pub fn new(llm: Arc<dyn LanguageModel>, book_title: impl Into<String>) -> Self {
        Self {
            llm,
            book_title: book_title.into(),
        }
    }

    /// Detect whether the query is predominantly English: more than half of
    /// its letter characters are in the Latin a-z range. Queries with no
    /// letters at all count as English.
    pub fn is_english(text: &str) -> bool {
        let mut letters = 0usize;
        let mut latin = 0usize;
        for c in text.chars() {
            if c.is_alphabetic() {
                letters += 1;
                if c.is_ascii_alphabetic() {
                    latin += 1;
                }
            }
        }
        if letters == 0 {
            return true;
        }
        latin as f64 / letters as f64 > 0.5
    }

    /// Produce all derived queries for one request
    pub async fn expand(
        &self,
        query: &str,
        features: &RagFeatures,
        cancel: &CancellationToken,
    ) -> Result<ExpandedQuery> {
        let mut translated = false;
        let query_en = if Self::is_english(query) {
            debug!("query already English, skipping translation");
            query.to_string()
        } else {
            info!("non-English query detected, translating for search");
            match self.translate_to_keywords(query, cancel).await {
                Ok(english) => {
                    translated = true;
                    info!(translated = %english, "translation complete");
                    english
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "translation failed, searching with the original query");
                    query.to_string()
                }
            }
        };

        let step_back = if features.stepback {
            match self.step_back_question(&query_en, cancel).await {
                Ok(question) => {
                    info!(step_back = %question, "step-back question generated");
                    Some(question)
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "step-back generation failed, skipping dual branch");
                    None
                }
            }
        } else {
            None
        };

        let hyde = if features.hyde {
            match self.hypothetical_answer(&query_en, cancel).await {
                Ok(answer) => Some(answer),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "HyDE generation failed, embedding the query directly");
                    None
                }
            }
        } else {
            None
        };

        let step_back_hyde = match (&step_back, features.hyde) {
            (Some(question), true) => match self.hypothetical_answer(question, cancel).await {
                Ok(answer) => Some(answer),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "step-back HyDE failed, embedding the question directly");
                    None
                }
            },
            _ => None,
        };

        Ok(ExpandedQuery {
            original: query.to_string(),
            query_en,
            translated,
            step_back,
            hyde,
            step_back_hyde,
        })
    }

    async fn translate_to_keywords(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "Translate the following technical question into English search keywords \
             for an English technical book. Return ONLY the translated English keywords, \
             without any explanation or additional text: {query}"
        );
        self.single_line_completion(prompt, cancel).await
    }

    async fn step_back_question(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "Given the technical question: {query}\n\n\
             What is a higher-level, more fundamental conceptual question related to this? \
             The conceptual question should focus on the underlying principles, design \
             patterns, or core concepts from '{title}' that would help answer the original \
             question. Return ONLY the conceptual question, without any explanation or \
             additional text.",
            title = self.book_title
        );
        self.single_line_completion(prompt, cancel).await
    }

    async fn hypothetical_answer(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "Please write a brief, technical answer to the following question as if it \
             were an excerpt from a professional book like '{title}'. The answer should be \
             concise (2-3 sentences), technical, and written in the style of a programming \
             book. Do not include the question itself, only provide the answer. \
             Question: {query}",
            title = self.book_title
        );
        self.single_line_completion(prompt, cancel).await
    }

    async fn single_line_completion(
        &self,
        prompt: String,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = GenerateRequest::from_messages(vec![bookwise_core::Message::user(prompt)]);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.llm.generate(request) => result?,
        };

        let cleaned = strip_quotes(response.text.trim()).trim().to_string();
        if cleaned.is_empty() {
            return Err(Error::Parse("generator returned an empty expansion".into()));
        }
        Ok(cleaned)
    }
}

/// Remove one layer of surrounding single or double quotes
fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bookwise_core::{ChunkStream, GenerateResponse};
    use parking_lot::Mutex;

    struct ScriptedLlm {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl ScriptedLlm {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
            let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.calls.lock().push(prompt.clone());
            if self.fail {
                return Err(Error::Llm("down".into()));
            }
            if prompt.starts_with("Translate") {
                Ok(GenerateResponse::text("\"singleton pattern best implementation\""))
            } else if prompt.contains("higher-level") {
                Ok(GenerateResponse::text("What are creational design patterns?"))
            } else {
                Ok(GenerateResponse::text(
                    "A singleton is a class instantiated exactly once. Prefer an enum type.",
                ))
            }
        }

        fn generate_stream<'a>(&'a self, _request: GenerateRequest) -> ChunkStream<'a> {
            Box::pin(futures::stream::empty())
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_is_english() {
        assert!(QueryExpander::is_english("What is the singleton pattern?"));
        assert!(!QueryExpander::is_english("单例模式的最佳实现是什么?"));
        assert!(QueryExpander::is_english("12345 ?!"));
        // Mixed text tips on the letter majority.
        assert!(QueryExpander::is_english("singleton 模式"));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"hello\""), "hello");
        assert_eq!(strip_quotes("'hello'"), "hello");
        assert_eq!(strip_quotes("plain"), "plain");
        assert_eq!(strip_quotes("\"unbalanced"), "\"unbalanced");
    }

    #[tokio::test]
    async fn test_english_query_skips_translation() {
        let llm = Arc::new(ScriptedLlm::new(false));
        let expander = QueryExpander::new(llm.clone(), "Effective Java");

        let expanded = expander
            .expand(
                "How should singletons be created?",
                &RagFeatures::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!expanded.translated);
        assert_eq!(expanded.query_en, "How should singletons be created?");
        assert!(expanded.step_back.is_some());
        assert!(expanded.hyde.is_some());
        assert!(expanded.step_back_hyde.is_some());

        let calls = llm.calls.lock();
        assert!(!calls.iter().any(|c| c.starts_with("Translate")));
    }

    #[tokio::test]
    async fn test_non_english_query_translates_once() {
        let llm = Arc::new(ScriptedLlm::new(false));
        let expander = QueryExpander::new(llm.clone(), "Effective Java");

        let expanded = expander
            .expand(
                "单例模式的最佳实现是什么?",
                &RagFeatures::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(expanded.translated);
        assert_eq!(expanded.query_en, "singleton pattern best implementation");

        let translation_calls = llm
            .calls
            .lock()
            .iter()
            .filter(|c| c.starts_with("Translate"))
            .count();
        assert_eq!(translation_calls, 1);
    }

    #[tokio::test]
    async fn test_failures_degrade_gracefully() {
        let llm = Arc::new(ScriptedLlm::new(true));
        let expander = QueryExpander::new(llm, "Effective Java");

        let expanded = expander
            .expand(
                "单例模式的最佳实现是什么?",
                &RagFeatures::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // Everything falls back; the pipeline can still vector-search.
        assert!(!expanded.translated);
        assert_eq!(expanded.query_en, "单例模式的最佳实现是什么?");
        assert!(expanded.step_back.is_none());
        assert!(expanded.hyde.is_none());
        assert_eq!(expanded.primary_embed_text(), expanded.query_en);
    }

    #[tokio::test]
    async fn test_disabled_features_make_no_calls() {
        let llm = Arc::new(ScriptedLlm::new(false));
        let expander = QueryExpander::new(llm.clone(), "Effective Java");

        let features = RagFeatures {
            hyde: false,
            stepback: false,
            ..Default::default()
        };
        let expanded = expander
            .expand("plain english question", &features, &CancellationToken::new())
            .await
            .unwrap();

        assert!(expanded.step_back.is_none());
        assert!(expanded.hyde.is_none());
        assert!(llm.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let llm = Arc::new(ScriptedLlm::new(false));
        let expander = QueryExpander::new(llm, "Effective Java");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = expander
            .expand("单例模式?", &RagFeatures::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
