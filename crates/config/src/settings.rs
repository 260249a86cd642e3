//! Application settings

use serde::{Deserialize, Serialize};

use crate::{ConfigError, RagFeatures};

/// Top-level settings, assembled from defaults, an optional `bookwise.*`
/// file, and `BOOKWISE_`-prefixed environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub rag: RagFeatures,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS is only intended for local development
    pub cors_permissive: bool,
    /// Deadline applied to each chat request; the request's cancellation
    /// token fires when it elapses
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_permissive: true,
            request_timeout_secs: 120,
        }
    }
}

/// Generator endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Model identifier sent with each request
    pub model: String,
    /// Base URL of the OpenAI-compatible endpoint
    pub endpoint: String,
    /// API key (read from `BOOKWISE_LLM__API_KEY` in deployments)
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Retry attempts for transient network failures
    pub max_retries: u32,
    /// Initial backoff in milliseconds, doubled each retry
    pub initial_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            endpoint: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            max_tokens: 1024,
            temperature: 0.7,
            timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 100,
        }
    }
}

/// Embedder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub dimension: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { dimension: 384 }
    }
}

/// File locations for the index, reference document, and evaluation outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory holding the reference document and all derived files
    pub data_dir: String,
    /// Plain-text export of the reference book
    pub document_file: String,
    pub snapshot_file: String,
    pub test_set_file: String,
    pub report_file: String,
    pub history_dir: String,
    /// Title used in prompts when citing the reference book
    pub book_title: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "external-docs".to_string(),
            document_file: "effective-java.txt".to_string(),
            snapshot_file: "vector-store.json".to_string(),
            test_set_file: "test-set.json".to_string(),
            report_file: "evaluation_report.md".to_string(),
            history_dir: "evaluation-history".to_string(),
            book_title: "Effective Java".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn document_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(&self.document_file)
    }

    pub fn snapshot_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(&self.snapshot_file)
    }

    pub fn test_set_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(&self.test_set_file)
    }

    pub fn report_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(&self.report_file)
    }

    pub fn history_dir_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join(&self.history_dir)
    }
}

/// Load settings from file and environment
///
/// Resolution order: defaults, then an optional `bookwise.{toml,yaml,json}`
/// file in the working directory, then `BOOKWISE_`-prefixed environment
/// variables (`__` as section separator, e.g. `BOOKWISE_SERVER__PORT=9000`).
pub fn load_settings() -> Result<Settings, ConfigError> {
    let raw = config::Config::builder()
        .add_source(config::File::with_name("bookwise").required(false))
        .add_source(config::Environment::with_prefix("BOOKWISE").separator("__"))
        .build()?;

    Ok(raw.try_deserialize()?)
}
