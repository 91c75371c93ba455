//! Graph assembly and CSV export.
//!
//! Assigns stable node identifiers (category prefix plus a zero-padded
//! per-prefix counter, in entity-processing order), maps relation labels
//! onto standard ontology terms where a mapping exists, deduplicates
//! exact edge tuples, and writes the node/edge row sets the graph
//! database importer consumes. A secondary graph records the
//! normalization map itself as `skos:exactMatch` edges between terms.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::Serialize;

use medgraph_core::store::{self, StagePaths};
use medgraph_core::{Entity, NormalizationMap, PipelineError, Relation, Result};

/// Knowledge-graph node row
#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "Category")]
    pub category: String,
}

/// Knowledge-graph edge row
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRecord {
    #[serde(rename = "SourceID")]
    pub source_id: String,
    #[serde(rename = "TargetID")]
    pub target_id: String,
    #[serde(rename = "Relation")]
    pub relation: String,
    #[serde(rename = "DataSource")]
    pub data_source: String,
}

/// Normalization-graph term node row
#[derive(Debug, Clone, Serialize)]
pub struct TermNodeRecord {
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "Label")]
    pub label: String,
}

/// Normalization-graph edge row
#[derive(Debug, Clone, Serialize)]
pub struct TermEdgeRecord {
    #[serde(rename = "SourceID")]
    pub source_id: String,
    #[serde(rename = "TargetID")]
    pub target_id: String,
    #[serde(rename = "Relation")]
    pub relation: String,
}

/// Map an extracted predicate label onto a standard ontology term.
/// Unmapped labels pass through unchanged.
pub fn ontology_label(raw: &str) -> &str {
    match raw {
        "is_a" => "rdfs:subClassOf",
        "causes" => "biolink:causes",
        "is_caused_by" => "biolink:caused_by",
        "is_symptom_of" => "biolink:is_symptom_of",
        "is_effective_for" => "biolink:treats",
        "is_not_effective_for" => "biolink:does_not_treat",
        "is_associated_with" => "skos:related",
        "is_diagnosed_by" => "biolink:diagnosed_by",
        other => other,
    }
}

/// Derives exportable node and edge rows from the normalized stores.
pub struct GraphAssembler {
    document_name: String,
}

impl GraphAssembler {
    pub fn new(document_name: impl Into<String>) -> Self {
        Self {
            document_name: document_name.into(),
        }
    }

    /// Assign node ids in entity-processing order and return the rows
    /// plus the term -> id lookup edges resolve against.
    pub fn assemble_nodes(&self, entities: &[Entity]) -> (Vec<NodeRecord>, HashMap<String, String>) {
        let mut nodes = Vec::with_capacity(entities.len());
        let mut term_to_id = HashMap::new();
        let mut counters: HashMap<&'static str, u32> = HashMap::new();

        for entity in entities {
            let prefix = entity.category.prefix();
            let counter = counters.entry(prefix).or_insert(0);
            *counter += 1;
            let node_id = format!("{prefix}_{counter:03}");

            term_to_id.insert(entity.term.clone(), node_id.clone());
            nodes.push(NodeRecord {
                node_id,
                label: entity.term.clone(),
                category: entity.category.as_str().to_string(),
            });
        }
        (nodes, term_to_id)
    }

    /// Resolve relation endpoints to node ids, map predicate labels, and
    /// drop exact-duplicate edge tuples. Relations naming an unknown
    /// endpoint are skipped.
    pub fn assemble_edges(
        &self,
        relations: &[Relation],
        term_to_id: &HashMap<String, String>,
    ) -> Vec<EdgeRecord> {
        let mut edges = Vec::new();
        let mut seen: HashSet<(String, String, String, String)> = HashSet::new();

        for relation in relations {
            if relation.relation.is_empty() {
                continue;
            }
            let (Some(source_id), Some(target_id)) = (
                term_to_id.get(&relation.source),
                term_to_id.get(&relation.target),
            ) else {
                tracing::warn!(
                    source = %relation.source,
                    target = %relation.target,
                    "Relation endpoint has no node, skipping edge"
                );
                continue;
            };

            let data_source = match relation.source_pages.iter().next() {
                Some(min_page) => format!("{}_p{}", self.document_name, min_page),
                None => self.document_name.clone(),
            };

            let key = (
                source_id.clone(),
                target_id.clone(),
                relation.relation.clone(),
                data_source.clone(),
            );
            if !seen.insert(key) {
                continue;
            }

            edges.push(EdgeRecord {
                source_id: source_id.clone(),
                target_id: target_id.clone(),
                relation: ontology_label(&relation.relation).to_string(),
                data_source,
            });
        }
        edges
    }

    /// Derive the secondary graph describing the normalization map:
    /// one node per term, one `skos:exactMatch` edge per non-identity
    /// alias. Deterministic because the map iterates sorted.
    pub fn assemble_normalization_graph(
        &self,
        map: &NormalizationMap,
    ) -> (Vec<TermNodeRecord>, Vec<TermEdgeRecord>) {
        let all_terms: BTreeSet<&str> = map
            .keys()
            .map(String::as_str)
            .chain(map.values().map(String::as_str))
            .collect();

        let mut nodes = Vec::with_capacity(all_terms.len());
        let mut term_to_id = HashMap::new();
        for (i, term) in all_terms.into_iter().enumerate() {
            let node_id = format!("TERM_{i:04}");
            term_to_id.insert(term, node_id.clone());
            nodes.push(TermNodeRecord {
                node_id,
                label: term.to_string(),
            });
        }

        let mut edges = Vec::new();
        for (alias, canonical) in map {
            if alias != canonical {
                edges.push(TermEdgeRecord {
                    source_id: term_to_id[alias.as_str()].clone(),
                    target_id: term_to_id[canonical.as_str()].clone(),
                    relation: "skos:exactMatch".to_string(),
                });
            }
        }
        (nodes, edges)
    }
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| PipelineError::Csv(format!("{}: {e}", path.display())))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| PipelineError::Csv(format!("{}: {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| PipelineError::Csv(format!("{}: {e}", path.display())))?;
    Ok(())
}

/// Export stage: materialize the four CSV row sets from the normalized
/// stores and the normalization map.
pub fn run_export(paths: &StagePaths, document_name: &str) -> Result<(usize, usize)> {
    let entities: Vec<Entity> = store::load_json(&paths.normalized_entities())?;
    let relations: Vec<Relation> = store::load_jsonl(&paths.normalized_relations())?;
    let map: NormalizationMap = store::load_json(&paths.normalization_map())?;

    let assembler = GraphAssembler::new(document_name);
    let (nodes, term_to_id) = assembler.assemble_nodes(&entities);
    let edges = assembler.assemble_edges(&relations, &term_to_id);
    let (term_nodes, term_edges) = assembler.assemble_normalization_graph(&map);

    write_csv(&paths.nodes_csv(), &nodes)?;
    write_csv(&paths.edges_csv(), &edges)?;
    write_csv(&paths.normalization_nodes_csv(), &term_nodes)?;
    write_csv(&paths.normalization_edges_csv(), &term_edges)?;

    tracing::info!(
        nodes = nodes.len(),
        edges = edges.len(),
        term_nodes = term_nodes.len(),
        term_edges = term_edges.len(),
        "Graph export complete"
    );
    Ok((nodes.len(), edges.len()))
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

    fn relation(source: &str, target: &str, label: &str, pages: &[u32]) -> Relation {
        Relation {
            source: source.to_string(),
            target: target.to_string(),
            relation: label.to_string(),
            source_pages: pages.iter().copied().collect(),
        }
    }

    fn assembler() -> GraphAssembler {
        GraphAssembler::new("c00543.pdf")
    }

    #[test]
    fn node_ids_are_prefixed_and_counted_in_processing_order() {
        let (nodes, _) = assembler().assemble_nodes(&[
            entity("migraine", EntityCategory::Disease, &[1]),
            entity("aspirin", EntityCategory::Drug, &[1]),
            entity("stroke", EntityCategory::Disease, &[2]),
        ]);
        assert_eq!(nodes[0].node_id, "DISEASE_001");
        assert_eq!(nodes[1].node_id, "DRUG_001");
        assert_eq!(nodes[2].node_id, "DISEASE_002");
    }

    #[test]
    fn edges_resolve_ids_and_map_ontology_labels() {
        let a = assembler();
        let (_, ids) = a.assemble_nodes(&[
            entity("aspirin", EntityCategory::Drug, &[1]),
            entity("migraine", EntityCategory::Disease, &[2]),
        ]);
        let edges = a.assemble_edges(
            &[relation("aspirin", "migraine", "is_effective_for", &[4, 9])],
            &ids,
        );
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_id, "DRUG_001");
        assert_eq!(edges[0].target_id, "DISEASE_001");
        assert_eq!(edges[0].relation, "biolink:treats");
        assert_eq!(edges[0].data_source, "c00543.pdf_p4");
    }

    #[test]
    fn unmapped_predicate_passes_through() {
        assert_eq!(ontology_label("worsens"), "worsens");
        assert_eq!(ontology_label("is_a"), "rdfs:subClassOf");
    }

    #[test]
    fn identical_edge_tuples_collapse_to_one_row() {
        let a = assembler();
        let (_, ids) = a.assemble_nodes(&[
            entity("aspirin", EntityCategory::Drug, &[1]),
            entity("migraine", EntityCategory::Disease, &[1]),
        ]);
        let duplicate = relation("aspirin", "migraine", "is_effective_for", &[1]);
        let edges = a.assemble_edges(&[duplicate.clone(), duplicate], &ids);
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn edge_with_unknown_endpoint_is_skipped() {
        let a = assembler();
        let (_, ids) = a.assemble_nodes(&[entity("aspirin", EntityCategory::Drug, &[1])]);
        let edges = a.assemble_edges(&[relation("aspirin", "ghost", "causes", &[1])], &ids);
        assert!(edges.is_empty());
    }

    #[test]
    fn normalization_graph_links_alias_to_canonical() {
        let map: NormalizationMap = [
            ("MI".to_string(), "myocardial infarction".to_string()),
            ("myocardial infarction".to_string(), "myocardial infarction".to_string()),
        ]
        .into_iter()
        .collect();

        let (nodes, edges) = assembler().assemble_normalization_graph(&map);
        assert_eq!(nodes.len(), 2);
        // Identity mapping produces no edge
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation, "skos:exactMatch");

        let source = nodes.iter().find(|n| n.node_id == edges[0].source_id).unwrap();
        let target = nodes.iter().find(|n| n.node_id == edges[0].target_id).unwrap();
        assert_eq!(source.label, "MI");
        assert_eq!(target.label, "myocardial infarction");
    }

    #[test]
    fn export_writes_all_four_row_sets() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StagePaths::new(dir.path());

        store::save_json(
            &paths.normalized_entities(),
            &vec![
                entity("aspirin", EntityCategory::Drug, &[1]),
                entity("migraine", EntityCategory::Disease, &[2]),
            ],
        )
        .unwrap();
        let rel_store = store::JsonlStore::create(paths.normalized_relations()).unwrap();
        rel_store
            .append(&[relation("aspirin", "migraine", "is_effective_for", &[2])])
            .unwrap();
        store::save_json(
            &paths.normalization_map(),
            &NormalizationMap::from([("ASA".to_string(), "aspirin".to_string())]),
        )
        .unwrap();

        let (nodes, edges) = run_export(&paths, "c00543.pdf").unwrap();
        assert_eq!(nodes, 2);
        assert_eq!(edges, 1);

        let csv = std::fs::read_to_string(paths.nodes_csv()).unwrap();
        assert!(csv.starts_with("NodeID,Label,Category"));
        assert!(std::fs::read_to_string(paths.normalization_edges_csv())
            .unwrap()
            .contains("skos:exactMatch"));
    }
}
