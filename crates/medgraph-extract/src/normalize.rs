//! Entity-term normalization by majority vote.
//!
//! The service proposes alias -> canonical mappings per batch of distinct
//! terms. Proposals are noisy and can disagree across batches, so every
//! proposal is recorded as a vote and each alias resolves to its most
//! frequent canonical form; ties break to whichever canonical form was
//! recorded first among the tied set. Aliases whose batch failed have no
//! votes, stay absent from the map, and are treated as self-mapping by
//! downstream consumers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use medgraph_core::store::{self, StagePaths};
use medgraph_core::{Entity, LlmClient, NormalizationMap, PipelineConfig, Result};

use crate::batch::{BatchRunner, BatchTransform};
use crate::decode::decode_payload;
use crate::RetryingCaller;

const PROMPT_TEMPLATE: &str = include_str!("prompts/normalize_terms.md");

#[derive(Debug, Deserialize)]
struct NormalizeResponse {
    #[serde(default)]
    normalization_map: HashMap<String, String>,
}

struct NormalizeBatch {
    client: Arc<dyn LlmClient>,
    retry: RetryingCaller,
}

#[async_trait]
impl BatchTransform<String, (String, String)> for NormalizeBatch {
    async fn apply(&self, _batch_index: usize, batch: &[String]) -> Result<Vec<(String, String)>> {
        let prompt =
            PROMPT_TEMPLATE.replace("{{JSON_INPUT}}", &serde_json::to_string_pretty(batch)?);

        let raw = self.retry.generate(self.client.as_ref(), &prompt).await?;
        let response: NormalizeResponse = decode_payload(&raw)?;

        // Keep only proposals for terms we actually sent, in batch order
        // so vote recording stays deterministic.
        let mut proposals = Vec::new();
        for term in batch {
            if let Some(canonical) = response.normalization_map.get(term) {
                proposals.push((term.clone(), canonical.clone()));
            }
        }
        Ok(proposals)
    }
}

/// Distinct entity terms in first-seen order.
pub fn distinct_terms(entities: &[Entity]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut terms = Vec::new();
    for entity in entities {
        if seen.insert(entity.term.as_str()) {
            terms.push(entity.term.clone());
        }
    }
    terms
}

/// Resolve one alias's votes: most frequent wins, ties break to the
/// canonical form recorded first among the tied set.
pub fn resolve_votes(votes: &[String]) -> Option<&str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for vote in votes {
        match counts.iter_mut().find(|(v, _)| *v == vote) {
            Some((_, n)) => *n += 1,
            None => counts.push((vote, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (candidate, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((candidate, count));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Collapse recorded proposals into the final alias -> canonical map.
pub fn consolidate(proposals: &[(String, String)]) -> NormalizationMap {
    let mut alias_order: Vec<&str> = Vec::new();
    let mut votes: HashMap<&str, Vec<String>> = HashMap::new();
    for (alias, canonical) in proposals {
        votes
            .entry(alias.as_str())
            .or_insert_with(|| {
                alias_order.push(alias.as_str());
                Vec::new()
            })
            .push(canonical.clone());
    }

    let mut map = NormalizationMap::new();
    for alias in alias_order {
        if let Some(winner) = resolve_votes(&votes[alias]) {
            map.insert(alias.to_string(), winner.to_string());
        }
    }
    map
}

/// Normalization consolidation stage.
pub struct NormalizeStage {
    client: Arc<dyn LlmClient>,
    config: PipelineConfig,
}

impl NormalizeStage {
    pub fn new(client: Arc<dyn LlmClient>, config: PipelineConfig) -> Self {
        Self { client, config }
    }

    /// Build the normalization map from the entity store and persist it.
    pub async fn run(&self, paths: &StagePaths) -> Result<NormalizationMap> {
        let entities: Vec<Entity> = store::load_json(&paths.entities())?;
        let terms = distinct_terms(&entities);

        let transform = NormalizeBatch {
            client: self.client.clone(),
            retry: RetryingCaller::new(self.config.retries, self.config.retry_backoff()),
        };
        let runner = BatchRunner::new(self.config.term_batch_size, self.config.pacing());
        let outcome = runner.run(&terms, &transform).await;

        let map = consolidate(&outcome.records);
        store::save_json(&paths.normalization_map(), &map)?;
        tracing::info!(
            terms = terms.len(),
            mapped = map.len(),
            batches = outcome.batches_run,
            failed_batches = outcome.batches_failed,
            "Normalization stage complete"
        );
        Ok(map)
    }
}
