//! Configuration management for the book assistant
//!
//! Supports loading configuration from:
//! - TOML/YAML files (`bookwise.*` in the working directory)
//! - Environment variables (`BOOKWISE_` prefix)
//! - Built-in defaults

pub mod features;
pub mod settings;

pub use features::RagFeatures;
pub use settings::{
    load_settings, EmbeddingSettings, LlmSettings, ServerConfig, Settings, StorageSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
