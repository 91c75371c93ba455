//! Relation extraction stage.
//!
//! For each cleaned paragraph, the candidate set is every entity whose
//! term appears in the paragraph text, and the candidates' unordered
//! 2-combinations are sent for labeling. Pair counts grow combinatorially
//! with the candidate set, so pairs are chunked into sub-batches bounded
//! by `pair_batch_size` per external call, independent of the outer
//! paragraph batching. Every extracted relation inherits the paragraph's
//! full page provenance, and each sub-batch is flushed to the append-only
//! relation store as soon as it completes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use medgraph_core::store::{self, JsonlStore, StagePaths};
use medgraph_core::{Entity, LlmClient, Paragraph, PipelineConfig, Relation, Result};

use crate::batch::{BatchRunner, BatchTransform};
use crate::decode::decode_payload;
use crate::RetryingCaller;

const PROMPT_TEMPLATE: &str = include_str!("prompts/extract_relations.md");

#[derive(Debug, Serialize)]
struct PairItem<'a> {
    source: &'a str,
    target: &'a str,
}

#[derive(Debug, Deserialize)]
struct RelationItem {
    source: String,
    target: String,
    relation: String,
}

/// All unordered 2-combinations of the candidate terms, in input order.
fn term_pairs(candidates: &[&Entity]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            pairs.push((candidates[i].term.clone(), candidates[j].term.clone()));
        }
    }
    pairs
}

struct RelationBatch {
    client: Arc<dyn LlmClient>,
    retry: RetryingCaller,
    entities: Vec<Entity>,
    pair_batch_size: usize,
    pacing: Duration,
    output: JsonlStore,
    calls_made: AtomicUsize,
}

impl RelationBatch {
    /// Label all candidate pairs of one paragraph, in pair sub-batches.
    ///
    /// Returns the extracted relations together with the number of
    /// external calls made; a sub-batch that fails after retries or
    /// returns a malformed payload is logged and skipped without
    /// affecting its siblings.
    async fn extract_for_paragraph(
        &self,
        paragraph: &Paragraph,
        candidates: &[&Entity],
    ) -> Result<(Vec<Relation>, usize)> {
        let pairs = term_pairs(candidates);
        let chunk_count = pairs.len().div_ceil(self.pair_batch_size);
        let mut relations = Vec::new();
        let mut calls = 0usize;

        for (chunk_index, chunk) in pairs.chunks(self.pair_batch_size).enumerate() {
            tracing::info!(
                chunk = chunk_index + 1,
                chunk_count,
                pairs = chunk.len(),
                "Labeling entity-pair sub-batch"
            );

            let pair_payload: Vec<PairItem> = chunk
                .iter()
                .map(|(s, t)| PairItem { source: s, target: t })
                .collect();
            let prompt = PROMPT_TEMPLATE
                .replace("{{CONTEXT_PARAGRAPH}}", &paragraph.text)
                .replace("{{ENTITY_PAIRS}}", &serde_json::to_string_pretty(&pair_payload)?);

            calls += 1;
            let chunk_relations = match self.label_chunk(&prompt).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(
                        chunk = chunk_index + 1,
                        chunk_count,
                        pairs = chunk.len(),
                        error = %e,
                        "Pair sub-batch failed, skipping"
                    );
                    Vec::new()
                }
            };

            let found = chunk_relations.len();
            let batch_records: Vec<Relation> = chunk_relations
                .into_iter()
                .map(|item| Relation {
                    source: item.source,
                    target: item.target,
                    relation: item.relation,
                    source_pages: paragraph.source_pages.clone(),
                })
                .collect();
            self.output.append(&batch_records)?;
            relations.extend(batch_records);
            tracing::info!(found, "Sub-batch relations flushed");

            if chunk_index + 1 < chunk_count {
                tokio::time::sleep(self.pacing).await;
            }
        }

        Ok((relations, calls))
    }

    async fn label_chunk(&self, prompt: &str) -> Result<Vec<RelationItem>> {
        let raw = self.retry.generate(self.client.as_ref(), prompt).await?;
        decode_payload(&raw)
    }
}

#[async_trait]
impl BatchTransform<Paragraph, Relation> for RelationBatch {
    async fn apply(&self, _batch_index: usize, batch: &[Paragraph]) -> Result<Vec<Relation>> {
        let mut out = Vec::new();
        for paragraph in batch {
            let candidates: Vec<&Entity> = self
                .entities
                .iter()
                .filter(|e| paragraph.text.contains(&e.term))
                .collect();
            if candidates.len() < 2 {
                continue;
            }

            let (relations, calls) = self.extract_for_paragraph(paragraph, &candidates).await?;
            self.calls_made.fetch_add(calls, Ordering::Relaxed);
            out.extend(relations);
        }
        Ok(out)
    }
}

/// Relation extraction stage.
pub struct RelationStage {
    client: Arc<dyn LlmClient>,
    config: PipelineConfig,
}

impl RelationStage {
    pub fn new(client: Arc<dyn LlmClient>, config: PipelineConfig) -> Self {
        Self { client, config }
    }

    /// Extract relations between co-occurring entities, appending to the
    /// relation store after every sub-batch.
    pub async fn run(&self, paths: &StagePaths) -> Result<usize> {
        let paragraphs: Vec<Paragraph> = store::load_json(&paths.cleaned_paragraphs())?;
        let entities: Vec<Entity> = store::load_json(&paths.entities())?;

        // The relation store is truncated exactly once, here, before any
        // batch runs; sub-batches append from then on.
        let output = JsonlStore::create(paths.relations())?;

        let transform = RelationBatch {
            client: self.client.clone(),
            retry: RetryingCaller::new(self.config.retries, self.config.retry_backoff()),
            entities,
            pair_batch_size: self.config.pair_batch_size.max(1),
            pacing: self.config.pacing(),
            output,
            calls_made: AtomicUsize::new(0),
        };
        let runner = BatchRunner::new(self.config.batch_size, self.config.pacing());
        let outcome = runner.run(&paragraphs, &transform).await;

        tracing::info!(
            relations = outcome.records.len(),
            calls = transform.calls_made.load(Ordering::Relaxed),
            batches = outcome.batches_run,
            failed_batches = outcome.batches_failed,
            "Relation stage complete"
        );
        Ok(outcome.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medgraph_core::EntityCategory;

    struct FakeLlm {
        response: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FakeLlm {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn entity(term: &str) -> Entity {
        Entity {
            term: term.to_string(),
            category: EntityCategory::Disease,
            source_pages: [1].into_iter().collect(),
        }
    }

    fn paragraph(text: &str, pages: &[u32]) -> Paragraph {
        Paragraph {
            text: text.to_string(),
            source_pages: pages.iter().copied().collect(),
        }
    }

    #[test]
    fn pairs_are_unordered_two_combinations() {
        let a = entity("a");
        let b = entity("b");
        let c = entity("c");
        let pairs = term_pairs(&[&a, &b, &c]);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], ("a".to_string(), "b".to_string()));
        assert_eq!(pairs[2], ("b".to_string(), "c".to_string()));
    }

    #[tokio::test]
    async fn pair_count_above_bound_splits_into_sub_batches() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeLlm {
            response: "[]".to_string(),
            calls: AtomicUsize::new(0),
        });
        let transform = RelationBatch {
            client: client.clone(),
            retry: RetryingCaller::new(1, Duration::ZERO),
            entities: Vec::new(),
            pair_batch_size: 2,
            pacing: Duration::ZERO,
            output: JsonlStore::create(dir.path().join("relations.jsonl")).unwrap(),
            calls_made: AtomicUsize::new(0),
        };

        // 4 candidates -> 6 pairs -> 3 sub-batches of 2
        let para = paragraph("a b c d", &[1]);
        let owned: Vec<Entity> = ["a", "b", "c", "d"].into_iter().map(entity).collect();
        let candidates: Vec<&Entity> = owned.iter().collect();
        let (relations, calls) = transform.extract_for_paragraph(&para, &candidates).await.unwrap();

        assert!(relations.is_empty());
        assert_eq!(calls, 3);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn relations_inherit_paragraph_provenance_and_are_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let relations_path = dir.path().join("relations.jsonl");
        let transform = RelationBatch {
            client: Arc::new(FakeLlm {
                response: r#"[{"source":"migraine","target":"nausea","relation":"causes"}]"#
                    .to_string(),
                calls: AtomicUsize::new(0),
            }),
            retry: RetryingCaller::new(1, Duration::ZERO),
            entities: vec![entity("migraine"), entity("nausea")],
            pair_batch_size: 100,
            pacing: Duration::ZERO,
            output: JsonlStore::create(&relations_path).unwrap(),
            calls_made: AtomicUsize::new(0),
        };

        let batch = vec![paragraph("migraine causes nausea", &[2, 4])];
        let relations = transform.apply(0, &batch).await.unwrap();

        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source_pages.iter().copied().collect::<Vec<_>>(), vec![2, 4]);

        let stored: Vec<Relation> = store::load_jsonl(&relations_path).unwrap();
        assert_eq!(stored, relations);
    }

    #[tokio::test]
    async fn paragraph_with_fewer_than_two_candidates_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeLlm {
            response: "[]".to_string(),
            calls: AtomicUsize::new(0),
        });
        let transform = RelationBatch {
            client: client.clone(),
            retry: RetryingCaller::new(1, Duration::ZERO),
            entities: vec![entity("migraine")],
            pair_batch_size: 100,
            pacing: Duration::ZERO,
            output: JsonlStore::create(dir.path().join("relations.jsonl")).unwrap(),
            calls_made: AtomicUsize::new(0),
        };

        let batch = vec![paragraph("only migraine appears here", &[1])];
        let relations = transform.apply(0, &batch).await.unwrap();
        assert!(relations.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
