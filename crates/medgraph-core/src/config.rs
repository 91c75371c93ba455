//! Pipeline configuration.
//!
//! Credentials come from environment variables; tunables (batch sizes,
//! pacing, retries) are explicit values passed into each stage's
//! constructor, never process-wide mutable state, so stages stay
//! independently testable.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default Gemini API endpoint
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Text-generation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API key for the Gemini API
    pub api_key: String,

    /// Model name to use
    pub model: String,

    /// API base URL (overridable for compatible endpoints and tests)
    pub base_url: String,
}

impl LlmConfig {
    /// Load from environment variables.
    ///
    /// `GEMINI_API_KEY` is required; `model` is supplied by the caller
    /// because it is an operator-level tunable, not a deployment secret.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingRequired("GEMINI_API_KEY".to_string()))?;

        Ok(Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Graph database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Neo4jConfig {
    /// Load from `NEO4J_URI`, `NEO4J_USER`, and `NEO4J_PASSWORD`
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |key: &str| {
            std::env::var(key).map_err(|_| ConfigError::MissingRequired(key.to_string()))
        };
        Ok(Self {
            uri: var("NEO4J_URI")?,
            user: var("NEO4J_USER")?,
            password: var("NEO4J_PASSWORD")?,
        })
    }
}

/// Batching, pacing, and retry tunables shared by all extraction stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Paragraphs per external call for the clean and entity stages
    pub batch_size: usize,

    /// Maximum entity pairs per external call in the relation stage
    pub pair_batch_size: usize,

    /// Entity terms per external call in the normalization stage
    pub term_batch_size: usize,

    /// Seconds to wait between batches (external rate-limit pacing)
    pub wait_secs: u64,

    /// Total attempts per external call (first try included)
    pub retries: u32,

    /// Seconds to wait between a failed attempt and its retry
    pub retry_backoff_secs: u64,

    /// Directory holding every stage's persisted output
    pub output_dir: PathBuf,

    /// Document name recorded in exported edge provenance
    pub document_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            pair_batch_size: 100,
            term_batch_size: 100,
            wait_secs: 60,
            retries: 3,
            retry_backoff_secs: 5,
            output_dir: PathBuf::from("output"),
            document_name: "document.pdf".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Pacing delay between batches
    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    /// Backoff between retry attempts
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
