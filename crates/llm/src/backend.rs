//! OpenAI-compatible chat backend
//!
//! Speaks the `/chat/completions` dialect used by OpenRouter and most local
//! gateways. Blocking calls retry transient failures with exponential
//! backoff; streaming parses SSE `data:` lines into text fragments.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use bookwise_config::LlmSettings;
use bookwise_core::{
    ChunkStream, Error, FinishReason, GenerateRequest, GenerateResponse, LanguageModel, Message,
    Result, StreamChunk,
};

use crate::LlmError;

/// Chat backend for OpenRouter-style endpoints
#[derive(Clone)]
pub struct OpenRouterBackend {
    client: Client,
    settings: LlmSettings,
}

impl OpenRouterBackend {
    pub fn new(settings: LlmSettings) -> std::result::Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| {
                LlmError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, settings })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.settings.endpoint.trim_end_matches('/'))
    }

    fn build_request(&self, request: &GenerateRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.settings.model.clone()),
            messages: request.messages.iter().map(ChatMessage::from).collect(),
            stream,
            max_tokens: request.max_tokens.unwrap_or(self.settings.max_tokens),
            temperature: request.temperature.unwrap_or(self.settings.temperature),
            top_p: request.top_p,
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn execute_request(
        &self,
        request: &ChatRequest,
    ) -> std::result::Result<ChatResponse, LlmError> {
        let response = self
            .apply_auth(self.client.post(self.api_url("/chat/completions")))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LanguageModel for OpenRouterBackend {
    /// Generate with retry for transient failures
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let chat_request = self.build_request(&request, false);

        let mut last_error = None;
        let mut backoff = Duration::from_millis(self.settings.initial_backoff_ms);

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                warn!(
                    ?backoff,
                    attempt,
                    max = self.settings.max_retries,
                    "LLM request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_request(&chat_request).await {
                Ok(response) => {
                    let choice = response
                        .choices
                        .into_iter()
                        .next()
                        .ok_or_else(|| LlmError::InvalidResponse("no choices".into()))
                        .map_err(Error::from)?;
                    debug!(chars = choice.message.content.len(), "generation complete");
                    return Ok(GenerateResponse {
                        text: choice.message.content,
                        finish_reason: finish_reason(choice.finish_reason.as_deref()),
                    });
                }
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error
            .unwrap_or_else(|| LlmError::Network("max retries exceeded".into()))
            .into())
    }

    fn generate_stream<'a>(&'a self, request: GenerateRequest) -> ChunkStream<'a> {
        Box::pin(try_stream! {
            let chat_request = self.build_request(&request, true);

            let response = self
                .apply_auth(self.client.post(self.api_url("/chat/completions")))
                .json(&chat_request)
                .send()
                .await
                .map_err(LlmError::from)
                .map_err(Error::from)?;

            let status = response.status();
            let mut body = if status.is_success() {
                response.bytes_stream()
            } else {
                let body = response.text().await.unwrap_or_default();
                let failed: Result<()> = Err(status_error(status.as_u16(), body).into());
                failed?;
                unreachable!()
            };
            let mut buffer = String::new();
            let mut finished = false;

            'outer: while let Some(chunk) = body.next().await {
                let bytes = chunk.map_err(LlmError::from).map_err(Error::from)?;
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    // SSE comments and blank keep-alives
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();

                    if payload == "[DONE]" {
                        finished = true;
                        break 'outer;
                    }

                    let parsed: StreamResponse = serde_json::from_str(payload)
                        .map_err(|e| Error::Llm(format!("bad stream frame: {e}")))?;
                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                yield StreamChunk::text(content);
                            }
                        }
                        if choice.finish_reason.is_some() {
                            finished = true;
                        }
                    }
                }
            }

            if finished {
                yield StreamChunk::final_chunk(FinishReason::Stop);
            } else {
                let failed: Result<()> =
                    Err(Error::Llm("stream ended without completion".into()));
                failed?;
            }
        })
    }

    async fn is_available(&self) -> bool {
        self.apply_auth(self.client.get(self.api_url("/models")))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

fn status_error(status: u16, body: String) -> LlmError {
    match status {
        401 => LlmError::Unauthorized(body),
        429 => LlmError::RateLimited(body),
        500..=599 => LlmError::Server {
            status,
            message: body,
        },
        _ => LlmError::Api {
            status,
            message: body,
        },
    }
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") => FinishReason::Length,
        Some("error") => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

// Wire types for the OpenAI-compatible API

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
