//! Language model trait

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{GenerateRequest, GenerateResponse, Result, StreamChunk};

/// Stream of generated text chunks
pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>>;

/// Language model interface
///
/// Implementations:
/// - `OpenRouterBackend` - OpenAI-compatible HTTP endpoint
/// - test stubs with scripted responses
///
/// # Example
///
/// ```ignore
/// let llm: Arc<dyn LanguageModel> = Arc::new(OpenRouterBackend::new(config)?);
/// let request = GenerateRequest::new("You are a helpful assistant")
///     .with_user_message("What is an immutable class?");
/// let response = llm.generate(request).await?;
/// println!("{}", response.text);
/// ```
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    /// Generate a completion for the given messages
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Stream tokens as they are generated
    ///
    /// Lower latency than `generate()` as fragments are yielded
    /// incrementally. The stream terminates with a final chunk or an error.
    fn generate_stream<'a>(&'a self, request: GenerateRequest) -> ChunkStream<'a>;

    /// Check if the model endpoint is reachable
    async fn is_available(&self) -> bool;

    /// Model name for logging
    fn model_name(&self) -> &str;
}
