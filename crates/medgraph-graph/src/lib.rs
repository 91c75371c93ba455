//! Medgraph Graph - Consolidation, export, and database import
//!
//! Consumes the extraction stages' stores and produces the exportable
//! knowledge graph: entities deduplicated by canonical term with unioned
//! provenance, relations rewritten through the normalization map with
//! self-relations discarded, and stable node/edge records for CSV export
//! and Neo4j import.

pub mod export;
pub mod merge;
pub mod neo4j;

pub use export::{run_export, EdgeRecord, GraphAssembler, NodeRecord, TermEdgeRecord, TermNodeRecord};
pub use merge::{normalize_entities, normalize_relations, run_merge};
pub use neo4j::Neo4jImporter;
