//! Medgraph Core - Domain models, errors, and shared traits
//!
//! This crate defines the abstractions used throughout the medgraph pipeline:
//! - Domain models (pages, paragraphs, entities, relations, normalization map)
//! - Common error types
//! - The `LlmClient` trait for text-generation backends
//! - Configuration management
//! - Persisted intermediate stores (JSON and JSON Lines)

pub mod config;
pub mod model;
pub mod store;

pub use config::{ConfigError, LlmConfig, Neo4jConfig, PipelineConfig};
pub use model::{Entity, EntityCategory, NormalizationMap, Page, Paragraph, Relation};

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors produced by the extraction pipeline.
///
/// `Llm` is a transport fault and is the only variant the retry layer acts
/// on. `MalformedResponse` is a content fault: the call itself succeeded, so
/// retrying it would waste quota, and the batch is skipped instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Text-generation call failed (timeout, rate limit, HTTP error)
    #[error("LLM call failed: {0}")]
    Llm(String),

    /// The service returned text with no parseable structured payload
    #[error("malformed LLM response: {0}")]
    MalformedResponse(String),

    /// A prior stage's output store is absent
    #[error("required input file not found: {0}")]
    MissingInput(PathBuf),

    /// IO error on a persisted store
    #[error("IO error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization error on a persisted store
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV export error: {0}")]
    Csv(String),

    /// Graph database import error
    #[error("graph import error: {0}")]
    Graph(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// LLM Client Trait
// ============================================================================

/// A text-generation backend.
///
/// The pipeline treats generation as a black box: one prompt in, raw text
/// out, fallible. Stages are constructed against `&dyn LlmClient` so they
/// can be tested with a substitutable fake.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response for a single prompt
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_displays_path() {
        let err = PipelineError::MissingInput(PathBuf::from("output/entities.json"));
        assert!(err.to_string().contains("output/entities.json"));
    }

    #[test]
    fn malformed_response_is_distinct_from_llm_fault() {
        let malformed = PipelineError::MalformedResponse("no JSON found".into());
        let transport = PipelineError::Llm("timeout".into());
        assert!(malformed.to_string().starts_with("malformed"));
        assert!(transport.to_string().starts_with("LLM call failed"));
    }
}
