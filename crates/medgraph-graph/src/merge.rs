//! Provenance-merging normalization of entities and relations.
//!
//! Applies the majority-vote normalization map read-only: entities whose
//! terms rewrite to the same canonical form collapse into one record with
//! unioned source pages (first-seen category wins); relations rewrite
//! both endpoints and are discarded when they become self-relations.

use std::collections::HashMap;

use medgraph_core::store::{self, StagePaths};
use medgraph_core::{Entity, NormalizationMap, Relation, Result};

fn canonical<'a>(map: &'a NormalizationMap, term: &'a str) -> &'a str {
    // Absent aliases are self-mapping
    map.get(term).map(String::as_str).unwrap_or(term)
}

/// Rewrite entity terms through the map, merging duplicates in original
/// order and unioning their source pages.
pub fn normalize_entities(entities: Vec<Entity>, map: &NormalizationMap) -> Vec<Entity> {
    let mut merged: Vec<Entity> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entity in entities {
        let term = canonical(map, &entity.term).to_string();
        match index.get(&term) {
            Some(&i) => {
                // Duplicate after rewriting: union provenance, keep the
                // first-seen record's category.
                merged[i].source_pages.extend(entity.source_pages);
            }
            None => {
                index.insert(term.clone(), merged.len());
                merged.push(Entity { term, ..entity });
            }
        }
    }
    merged
}

/// Rewrite relation endpoints through the map, discarding relations whose
/// endpoints collapse to the same canonical term.
pub fn normalize_relations(relations: Vec<Relation>, map: &NormalizationMap) -> Vec<Relation> {
    let mut normalized = Vec::new();
    for relation in relations {
        let source = canonical(map, &relation.source).to_string();
        let target = canonical(map, &relation.target).to_string();
        if source == target {
            tracing::debug!(
                term = %source,
                relation = %relation.relation,
                "Discarding self-relation after normalization"
            );
            continue;
        }
        normalized.push(Relation {
            source,
            target,
            ..relation
        });
    }
    normalized
}

/// Apply the persisted normalization map to the entity and relation
/// stores, materializing the normalized stores.
pub fn run_merge(paths: &StagePaths) -> Result<(usize, usize)> {
    let map: NormalizationMap = store::load_json(&paths.normalization_map())?;
    let entities: Vec<Entity> = store::load_json(&paths.entities())?;
    let relations: Vec<Relation> = store::load_jsonl(&paths.relations())?;

    let entities = normalize_entities(entities, &map);
    let relations = normalize_relations(relations, &map);

    store::save_json(&paths.normalized_entities(), &entities)?;
    let out = store::JsonlStore::create(paths.normalized_relations())?;
    out.append(&relations)?;

    tracing::info!(
        entities = entities.len(),
        relations = relations.len(),
        "Normalized stores materialized"
    );
    Ok((entities.len(), relations.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use medgraph_core::EntityCategory;

    fn entity(term: &str, category: EntityCategory, pages: &[u32]) -> Entity {
        Entity {
            term: term.to_string(),
            category,
            source_pages: pages.iter().copied().collect(),
        }
    }

    fn relation(source: &str, target: &str) -> Relation {
        Relation {
            source: source.to_string(),
            target: target.to_string(),
            relation: "is_associated_with".to_string(),
            source_pages: [1].into_iter().collect(),
        }
    }

    fn map_of(pairs: &[(&str, &str)]) -> NormalizationMap {
        pairs
            .iter()
            .map(|(a, c)| (a.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn duplicate_entities_union_provenance() {
        let map = map_of(&[("HTN", "hypertension")]);
        let merged = normalize_entities(
            vec![
                entity("hypertension", EntityCategory::Disease, &[1]),
                entity("HTN", EntityCategory::Disease, &[2]),
            ],
            &map,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].term, "hypertension");
        assert_eq!(merged[0].source_pages.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn first_seen_category_wins_on_cross_category_merge() {
        let map = map_of(&[("chemo", "chemotherapy")]);
        let merged = normalize_entities(
            vec![
                entity("chemotherapy", EntityCategory::Treatment, &[1]),
                entity("chemo", EntityCategory::Drug, &[2]),
            ],
            &map,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].category, EntityCategory::Treatment);
    }

    #[test]
    fn absent_alias_is_self_mapping() {
        let merged = normalize_entities(
            vec![entity("migraine", EntityCategory::Disease, &[3])],
            &NormalizationMap::new(),
        );
        assert_eq!(merged[0].term, "migraine");
    }

    #[test]
    fn self_relations_are_discarded_after_rewrite() {
        let map = map_of(&[("HTN", "hypertension")]);
        let normalized = normalize_relations(
            vec![
                relation("HTN", "hypertension"),
                relation("HTN", "stroke"),
            ],
            &map,
        );
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].source, "hypertension");
        assert_eq!(normalized[0].target, "stroke");
    }

    #[test]
    fn endpoints_rewrite_through_the_map() {
        let map = map_of(&[("MI", "myocardial infarction")]);
        let normalized = normalize_relations(vec![relation("aspirin", "MI")], &map);
        assert_eq!(normalized[0].target, "myocardial infarction");
    }
}
