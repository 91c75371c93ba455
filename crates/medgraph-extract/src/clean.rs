//! Paragraph cleaning stage.
//!
//! Reconstructs provenance-tagged paragraphs from the page store, then
//! asks the service to strip layout noise from each batch of paragraph
//! texts. Cleaned text is re-attached to its originating record
//! positionally: entry `i` of the response maps to input record `i` of
//! the batch, and the original `source_pages` carry over unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use medgraph_core::store::{self, StagePaths};
use medgraph_core::{LlmClient, Page, Paragraph, PipelineConfig, Result};

use crate::batch::{BatchRunner, BatchTransform};
use crate::decode::decode_payload;
use crate::paragraph::reconstruct_paragraphs;
use crate::RetryingCaller;

const PROMPT_TEMPLATE: &str = include_str!("prompts/clean_paragraphs.md");

#[derive(Debug, Deserialize)]
struct CleanedResponse {
    #[serde(default)]
    cleaned_paragraphs: Vec<String>,
}

struct CleanBatch {
    client: Arc<dyn LlmClient>,
    retry: RetryingCaller,
}

#[async_trait]
impl BatchTransform<Paragraph, Paragraph> for CleanBatch {
    async fn apply(&self, _batch_index: usize, batch: &[Paragraph]) -> Result<Vec<Paragraph>> {
        let texts: Vec<&str> = batch.iter().map(|p| p.text.as_str()).collect();
        let payload = serde_json::to_string_pretty(&texts)?;
        let prompt = PROMPT_TEMPLATE.replace("{{JSON_INPUT}}", &payload);

        let raw = self.retry.generate(self.client.as_ref(), &prompt).await?;
        let response: CleanedResponse = decode_payload(&raw)?;

        if response.cleaned_paragraphs.len() < batch.len() {
            tracing::warn!(
                expected = batch.len(),
                returned = response.cleaned_paragraphs.len(),
                dropped = batch.len() - response.cleaned_paragraphs.len(),
                "Response contains fewer paragraphs than the batch, trailing paragraphs dropped"
            );
        }

        let mut cleaned = Vec::new();
        for (idx, text) in response.cleaned_paragraphs.into_iter().enumerate() {
            if text.trim().is_empty() {
                continue;
            }
            // Entries past the batch length have no originating record
            let Some(original) = batch.get(idx) else {
                tracing::warn!(idx, "Response contains more paragraphs than the batch, ignoring");
                break;
            };
            cleaned.push(Paragraph {
                text,
                source_pages: original.source_pages.clone(),
            });
        }
        Ok(cleaned)
    }
}

/// Clean-text extraction stage.
pub struct CleanStage {
    client: Arc<dyn LlmClient>,
    config: PipelineConfig,
}

impl CleanStage {
    pub fn new(client: Arc<dyn LlmClient>, config: PipelineConfig) -> Self {
        Self { client, config }
    }

    /// Reconstruct paragraphs from the page store, clean them in batches,
    /// and materialize the cleaned-paragraph store.
    pub async fn run(&self, paths: &StagePaths) -> Result<usize> {
        let pages: Vec<Page> = store::load_json(&paths.pages())?;
        let paragraphs = reconstruct_paragraphs(&pages);
        tracing::info!(
            pages = pages.len(),
            paragraphs = paragraphs.len(),
            "Reconstructed paragraphs from page text"
        );

        let transform = CleanBatch {
            client: self.client.clone(),
            retry: RetryingCaller::new(self.config.retries, self.config.retry_backoff()),
        };
        let runner = BatchRunner::new(self.config.batch_size, self.config.pacing());
        let outcome = runner.run(&paragraphs, &transform).await;

        store::save_json(&paths.cleaned_paragraphs(), &outcome.records)?;
        tracing::info!(
            cleaned = outcome.records.len(),
            batches = outcome.batches_run,
            failed_batches = outcome.batches_failed,
            "Clean stage complete"
        );
        Ok(outcome.records.len())
    }
}
