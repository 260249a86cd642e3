//! The answering contract
//!
//! Retrieves context passages, assembles the augmented message list
//! (system prompt, rolling dialogue memory, user turn), and streams the
//! generator's output. The exchange is committed to memory only once the
//! stream completes; errors and cancellation leave memory untouched.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bookwise_core::{
    Error, GenerateRequest, LanguageModel, Message, Result, ScoredSegment,
};
use bookwise_rag::HybridRetriever;

use crate::memory::{DialogueMemory, MemoryConfig};
use crate::prompt::{basic_system_role, build_context_prompt, build_system_prompt};

/// Passages fed to the generator on the basic streaming path
const CONTEXT_TOP_K: usize = 3;

/// Stream of answer fragments
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A started answer: the passages that ground it plus the fragment stream
pub struct StreamedAnswer {
    pub sources: Vec<ScoredSegment>,
    pub stream: AnswerStream,
}

impl std::fmt::Debug for StreamedAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedAnswer")
            .field("sources", &self.sources)
            .field("stream", &"<stream>")
            .finish()
    }
}

/// Retrieval-augmented answerer with per-session dialogue memory
pub struct Answerer {
    retriever: Arc<HybridRetriever>,
    llm: Arc<dyn LanguageModel>,
    memory: Arc<DialogueMemory>,
    book_title: String,
}

impl Answerer {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        llm: Arc<dyn LanguageModel>,
        memory_config: MemoryConfig,
        book_title: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            llm,
            memory: Arc::new(DialogueMemory::new(memory_config)),
            book_title: book_title.into(),
        }
    }

    pub fn memory(&self) -> &Arc<DialogueMemory> {
        &self.memory
    }

    /// Plain completion without retrieval or memory, for the synchronous
    /// chat endpoint.
    pub async fn respond(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(Error::EmptyInput("prompt".into()));
        }

        let request =
            GenerateRequest::from_messages(vec![Message::user(prompt)]);
        let response = self.llm.generate(request).await?;
        Ok(response.text)
    }

    /// Plain retrieval-augmented streaming for the basic REST endpoint: a
    /// direct vector search supplies context passages labelled `[Chunk k]`
    /// inside the user prompt. No query expansion, reranking, promotion, or
    /// dialogue memory is involved.
    pub async fn answer_basic(
        &self,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamedAnswer> {
        if user_message.trim().is_empty() {
            return Err(Error::EmptyInput("user message".into()));
        }

        let sources = self
            .retriever
            .basic_search(user_message, CONTEXT_TOP_K, cancel)
            .await?;
        info!(sources = sources.len(), "context retrieved for basic answer");

        let messages = vec![
            Message::system(basic_system_role(&self.book_title)),
            Message::user(build_context_prompt(user_message, &sources)),
        ];
        let request = GenerateRequest::from_messages(messages).with_streaming(true);

        let llm = Arc::clone(&self.llm);
        let cancel = cancel.clone();
        let fragment_stream = stream! {
            let mut inner = llm.generate_stream(request);

            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Some(Err(Error::Cancelled)),
                    item = inner.next() => item,
                };

                match item {
                    Some(Ok(chunk)) => {
                        if chunk.is_final {
                            break;
                        }
                        if !chunk.delta.is_empty() {
                            yield Ok(chunk.delta);
                        }
                    }
                    Some(Err(e)) => {
                        yield Err(e);
                        break;
                    }
                    None => break,
                }
            }
        };

        Ok(StreamedAnswer {
            sources,
            stream: Box::pin(fragment_stream),
        })
    }

    /// Start a retrieval-augmented streamed answer.
    ///
    /// Retrieval completes before this returns so callers can inspect the
    /// grounding passages while fragments arrive.
    pub async fn answer(
        &self,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<StreamedAnswer> {
        if user_message.trim().is_empty() {
            return Err(Error::EmptyInput("user message".into()));
        }

        let sources = self.retriever.retrieve(user_message, cancel).await?;
        info!(sources = sources.len(), "context retrieved for answer");

        let system_prompt = build_system_prompt(&self.book_title, &sources);
        let mut messages = vec![Message::system(system_prompt)];
        messages.extend(self.memory.history());
        messages.push(Message::user(user_message));
        debug!(messages = messages.len(), "augmented prompt assembled");

        let request = GenerateRequest::from_messages(messages).with_streaming(true);
        let llm = Arc::clone(&self.llm);
        let memory = Arc::clone(&self.memory);
        let user_message = user_message.to_string();
        let cancel = cancel.clone();

        let fragment_stream = stream! {
            let mut accumulated = String::new();
            let mut inner = llm.generate_stream(request);

            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Some(Err(Error::Cancelled)),
                    item = inner.next() => item,
                };

                match item {
                    Some(Ok(chunk)) => {
                        if chunk.is_final {
                            memory.record_exchange(&user_message, &accumulated);
                            debug!(chars = accumulated.len(), "answer committed to memory");
                            break;
                        }
                        if !chunk.delta.is_empty() {
                            accumulated.push_str(&chunk.delta);
                            yield Ok(chunk.delta);
                        }
                    }
                    Some(Err(e)) => {
                        // Surface the failure; memory stays untouched.
                        yield Err(e);
                        break;
                    }
                    None => {
                        // Stream drained without an explicit final marker.
                        memory.record_exchange(&user_message, &accumulated);
                        break;
                    }
                }
            }
        };

        Ok(StreamedAnswer {
            sources,
            stream: Box::pin(fragment_stream),
        })
    }

    /// Run a full answer to completion, returning the text and the parent
    /// passages that grounded it. Used by the evaluator.
    pub async fn answer_collected(
        &self,
        user_message: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<ScoredSegment>)> {
        let answer = self.answer(user_message, cancel).await?;
        let mut text = String::new();
        let mut stream = answer.stream;
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment?);
        }
        Ok((text, answer.sources))
    }
}
