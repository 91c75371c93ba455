//! Entity extraction stage.
//!
//! Sends batches of cleaned paragraph text to the service and accumulates
//! `(term, category)`-keyed entities. Provenance re-attachment is a
//! best-effort containment match: an extracted term inherits the pages of
//! every paragraph in the batch whose text contains it, so a term that
//! overlaps several paragraphs receives provenance from all of them, and
//! a term whose surface form was altered by the service matches nothing
//! and is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use medgraph_core::store::{self, StagePaths};
use medgraph_core::{Entity, EntityCategory, LlmClient, Paragraph, PipelineConfig, Result};

use crate::batch::{BatchRunner, BatchTransform};
use crate::decode::decode_payload;
use crate::RetryingCaller;

const PROMPT_TEMPLATE: &str = include_str!("prompts/extract_entities.md");

#[derive(Debug, Deserialize)]
struct EntityResponse {
    #[serde(default)]
    entities: Vec<EntityItem>,
}

#[derive(Debug, Deserialize)]
struct EntityItem {
    term: String,
    category: EntityCategory,
}

struct EntityBatch {
    client: Arc<dyn LlmClient>,
    retry: RetryingCaller,
}

#[async_trait]
impl BatchTransform<Paragraph, Entity> for EntityBatch {
    async fn apply(&self, _batch_index: usize, batch: &[Paragraph]) -> Result<Vec<Entity>> {
        let combined = batch
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = PROMPT_TEMPLATE.replace("{{JSON_INPUT}}", &serde_json::to_string(&combined)?);

        let raw = self.retry.generate(self.client.as_ref(), &prompt).await?;
        let response: EntityResponse = decode_payload(&raw)?;

        let mut entities = Vec::new();
        for item in response.entities {
            if item.term.is_empty() {
                continue;
            }
            let mut entity = Entity {
                term: item.term,
                category: item.category,
                source_pages: Default::default(),
            };
            for paragraph in batch {
                if paragraph.text.contains(&entity.term) {
                    entity.source_pages.extend(paragraph.source_pages.iter().copied());
                }
            }
            if entity.source_pages.is_empty() {
                tracing::debug!(
                    term = %entity.term,
                    "Extracted term not found in any batch paragraph, dropping"
                );
                continue;
            }
            entities.push(entity);
        }
        Ok(entities)
    }
}

/// Merge per-batch entity records by `(term, category)`, unioning source
/// pages and preserving first-seen order.
pub fn merge_entities(records: Vec<Entity>) -> Vec<Entity> {
    let mut merged: Vec<Entity> = Vec::new();
    let mut index: HashMap<(String, EntityCategory), usize> = HashMap::new();

    for entity in records {
        let key = (entity.term.clone(), entity.category);
        match index.get(&key) {
            Some(&i) => merged[i].source_pages.extend(entity.source_pages),
            None => {
                index.insert(key, merged.len());
                merged.push(entity);
            }
        }
    }
    merged
}

/// Entity extraction stage.
pub struct EntityStage {
    client: Arc<dyn LlmClient>,
    config: PipelineConfig,
}

impl EntityStage {
    pub fn new(client: Arc<dyn LlmClient>, config: PipelineConfig) -> Self {
        Self { client, config }
    }

    /// Extract entities from the cleaned-paragraph store and materialize
    /// the entity store.
    pub async fn run(&self, paths: &StagePaths) -> Result<usize> {
        let paragraphs: Vec<Paragraph> = store::load_json(&paths.cleaned_paragraphs())?;

        let transform = EntityBatch {
            client: self.client.clone(),
            retry: RetryingCaller::new(self.config.retries, self.config.retry_backoff()),
        };
        let runner = BatchRunner::new(self.config.batch_size, self.config.pacing());
        let outcome = runner.run(&paragraphs, &transform).await;

        let entities = merge_entities(outcome.records);
        store::save_json(&paths.entities(), &entities)?;
        tracing::info!(
            entities = entities.len(),
            batches = outcome.batches_run,
            failed_batches = outcome.batches_failed,
            "Entity stage complete"
        );
        Ok(entities.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLlm {
        response: String,
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.response.clone())
        }
    }

    fn paragraph(text: &str, pages: &[u32]) -> Paragraph {
        Paragraph {
            text: text.to_string(),
            source_pages: pages.iter().copied().collect(),
        }
    }

    fn entity(term: &str, category: EntityCategory, pages: &[u32]) -> Entity {
        Entity {
            term: term.to_string(),
            category,
            source_pages: pages.iter().copied().collect(),
        }
    }

    #[tokio::test]
    async fn containment_match_unions_pages_across_paragraphs() {
        let batch = vec![
            paragraph("migraine causes nausea", &[1]),
            paragraph("chronic migraine is disabling", &[3]),
        ];
        let transform = EntityBatch {
            client: Arc::new(FakeLlm {
                response: r#"{"entities":[
                    {"term":"migraine","category":"Disease"},
                    {"term":"nausea","category":"Symptom"},
                    {"term":"sumatriptan","category":"Drug"}
                ]}"#
                .to_string(),
            }),
            retry: RetryingCaller::new(1, std::time::Duration::ZERO),
        };

        let entities = transform.apply(0, &batch).await.unwrap();

        // "migraine" appears in both paragraphs; "sumatriptan" in neither
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].term, "migraine");
        assert_eq!(entities[0].source_pages.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(entities[1].term, "nausea");
        assert_eq!(entities[1].source_pages.iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn merge_unions_pages_for_same_term_and_category() {
        let merged = merge_entities(vec![
            entity("aspirin", EntityCategory::Drug, &[1]),
            entity("fever", EntityCategory::Symptom, &[2]),
            entity("aspirin", EntityCategory::Drug, &[5]),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source_pages.iter().copied().collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn merge_keeps_same_term_in_different_categories_distinct() {
        let merged = merge_entities(vec![
            entity("radiotherapy", EntityCategory::Treatment, &[1]),
            entity("radiotherapy", EntityCategory::Unknown, &[2]),
        ]);
        assert_eq!(merged.len(), 2);
    }
}
