//! Neo4j import of the exported graph row sets.
//!
//! Nodes go in before edges so every relationship MERGE can match both
//! endpoints. Knowledge-graph rows import under the `Node` label keyed
//! by `node_id`; normalization rows import under `Term`. Relationship
//! types carry ontology prefixes (`biolink:treats`), so the type name is
//! backtick-quoted in the generated Cypher.

use neo4rs::{query, Graph};

use medgraph_core::{Neo4jConfig, PipelineError, Result};

use crate::export::{EdgeRecord, NodeRecord, TermEdgeRecord, TermNodeRecord};

pub struct Neo4jImporter {
    graph: Graph,
}

impl Neo4jImporter {
    pub async fn connect(config: &Neo4jConfig) -> Result<Self> {
        let graph = Graph::new(&config.uri, &config.user, &config.password)
            .await
            .map_err(|e| PipelineError::Graph(format!("Failed to connect to Neo4j: {e}")))?;
        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Import the knowledge graph: nodes first, then edges.
    pub async fn import_graph(&self, nodes: &[NodeRecord], edges: &[EdgeRecord]) -> Result<()> {
        for node in nodes {
            let q = query(
                "MERGE (n:Node {node_id: $node_id}) \
                 SET n.label = $label, n.category = $category",
            )
            .param("node_id", node.node_id.clone())
            .param("label", node.label.clone())
            .param("category", node.category.clone());

            self.graph.run(q).await.map_err(|e| {
                PipelineError::Graph(format!("Failed to import node {}: {e}", node.node_id))
            })?;
        }

        for edge in edges {
            // Relationship type is interpolated because Cypher has no
            // parameterized types; ids are still parameterized.
            let cypher = format!(
                "MATCH (a:Node {{node_id: $source_id}}) \
                 MATCH (b:Node {{node_id: $target_id}}) \
                 MERGE (a)-[r:`{}`]->(b) \
                 SET r.data_source = $data_source",
                edge.relation
            );
            let q = query(&cypher)
                .param("source_id", edge.source_id.clone())
                .param("target_id", edge.target_id.clone())
                .param("data_source", edge.data_source.clone());

            self.graph.run(q).await.map_err(|e| {
                PipelineError::Graph(format!(
                    "Failed to import edge {} -> {}: {e}",
                    edge.source_id, edge.target_id
                ))
            })?;
        }

        tracing::info!(
            nodes = nodes.len(),
            edges = edges.len(),
            "Knowledge graph imported"
        );
        Ok(())
    }

    /// Import the normalization graph under its own `Term` label.
    pub async fn import_normalization_graph(
        &self,
        nodes: &[TermNodeRecord],
        edges: &[TermEdgeRecord],
    ) -> Result<()> {
        for node in nodes {
            let q = query("MERGE (t:Term {node_id: $node_id}) SET t.label = $label")
                .param("node_id", node.node_id.clone())
                .param("label", node.label.clone());

            self.graph.run(q).await.map_err(|e| {
                PipelineError::Graph(format!("Failed to import term {}: {e}", node.node_id))
            })?;
        }

        for edge in edges {
            let cypher = format!(
                "MATCH (a:Term {{node_id: $source_id}}) \
                 MATCH (b:Term {{node_id: $target_id}}) \
                 MERGE (a)-[:`{}`]->(b)",
                edge.relation
            );
            let q = query(&cypher)
                .param("source_id", edge.source_id.clone())
                .param("target_id", edge.target_id.clone());

            self.graph.run(q).await.map_err(|e| {
                PipelineError::Graph(format!(
                    "Failed to import term edge {} -> {}: {e}",
                    edge.source_id, edge.target_id
                ))
            })?;
        }

        tracing::info!(
            terms = nodes.len(),
            edges = edges.len(),
            "Normalization graph imported"
        );
        Ok(())
    }
}
