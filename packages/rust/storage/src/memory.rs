//! In-memory graph store for tests.
//!
//! Mirrors the libSQL implementation's semantics exactly: kind-checked
//! upserts, embedding preservation, edge dedup by triple, staleness as a
//! flag. Not suitable for persistence, perfect for pipeline tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use regraph_shared::{EdgeKind, GraphEdge, GraphNode, NodeId, NodeKind, RegraphError, Result};

use crate::GraphStore;

/// In-memory graph store.
#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: Arc<RwLock<HashMap<NodeId, GraphNode>>>,
    edges: Arc<RwLock<Vec<GraphEdge>>>,
}

impl MemoryGraphStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all nodes, for assertions.
    pub async fn all_nodes(&self) -> Vec<GraphNode> {
        self.nodes.read().await.values().cloned().collect()
    }

    /// Snapshot of all edges, for assertions.
    pub async fn all_edges(&self) -> Vec<GraphEdge> {
        self.edges.read().await.clone()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        if let Some(existing) = nodes.get(&node.id) {
            if existing.kind != node.kind {
                return Err(RegraphError::integrity(format!(
                    "node {} exists with kind {:?}, refusing upsert as {:?}",
                    node.id, existing.kind, node.kind
                )));
            }
            let mut updated = node.clone();
            if updated.embedding.is_none() {
                updated.embedding = existing.embedding.clone();
            }
            nodes.insert(node.id, updated);
        } else {
            nodes.insert(node.id, node.clone());
        }
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<GraphNode>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn get_node_by_url(&self, url: &str) -> Result<Option<GraphNode>> {
        Ok(self
            .nodes
            .read()
            .await
            .values()
            .find(|n| n.url.as_deref() == Some(url))
            .cloned())
    }

    async fn touch_node(&self, id: &NodeId, last_seen: DateTime<Utc>) -> Result<()> {
        if let Some(node) = self.nodes.write().await.get_mut(id) {
            node.last_seen = last_seen;
            node.stale = false;
        }
        Ok(())
    }

    async fn mark_stale(&self, id: &NodeId) -> Result<()> {
        if let Some(node) = self.nodes.write().await.get_mut(id) {
            node.stale = true;
        }
        Ok(())
    }

    async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()> {
        let mut edges = self.edges.write().await;
        if !edges.contains(edge) {
            edges.push(edge.clone());
        }
        Ok(())
    }

    async fn detach_edges(&self, from_id: &NodeId, kind: EdgeKind) -> Result<()> {
        self.edges
            .write()
            .await
            .retain(|e| !(e.from_id == *from_id && e.kind == kind));
        Ok(())
    }

    async fn edges_from(&self, from_id: &NodeId) -> Result<Vec<GraphEdge>> {
        Ok(self
            .edges
            .read()
            .await
            .iter()
            .filter(|e| e.from_id == *from_id)
            .cloned()
            .collect())
    }

    async fn edges_to(&self, to_id: &NodeId) -> Result<Vec<GraphEdge>> {
        Ok(self
            .edges
            .read()
            .await
            .iter()
            .filter(|e| e.to_id == *to_id)
            .cloned()
            .collect())
    }

    async fn set_embedding(&self, id: &NodeId, embedding: &[f32]) -> Result<()> {
        if let Some(node) = self.nodes.write().await.get_mut(id) {
            node.embedding = Some(embedding.to_vec());
        }
        Ok(())
    }

    async fn nodes_missing_embedding(&self, limit: u32) -> Result<Vec<GraphNode>> {
        let nodes = self.nodes.read().await;
        let mut missing: Vec<GraphNode> = nodes
            .values()
            .filter(|n| n.kind == NodeKind::Chunk && !n.stale && n.embedding.is_none())
            .cloned()
            .collect();
        missing.sort_by_key(|n| n.last_seen);
        missing.truncate(limit as usize);
        Ok(missing)
    }

    async fn count_nodes(&self, kind: Option<NodeKind>) -> Result<u64> {
        let nodes = self.nodes.read().await;
        Ok(match kind {
            Some(kind) => nodes.values().filter(|n| n.kind == kind).count() as u64,
            None => nodes.len() as u64,
        })
    }

    async fn count_edges(&self) -> Result<u64> {
        Ok(self.edges.read().await.len() as u64)
    }

    async fn count_stale(&self) -> Result<u64> {
        Ok(self.nodes.read().await.values().filter(|n| n.stale).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regraph_shared::Fingerprint;

    #[tokio::test]
    async fn matches_libsql_upsert_semantics() {
        let store = MemoryGraphStore::new();
        let fp = Fingerprint::of_text("content");
        let parent = NodeId::document(&fp);
        let mut chunk = GraphNode::chunk(parent, 0, "text".into(), Utc::now());

        store.upsert_node(&chunk).await.unwrap();
        store.set_embedding(&chunk.id, &[1.0]).await.unwrap();

        chunk.embedding = None;
        store.upsert_node(&chunk).await.unwrap();
        let found = store.get_node(&chunk.id).await.unwrap().unwrap();
        assert_eq!(found.embedding, Some(vec![1.0]));

        let mut impostor = chunk.clone();
        impostor.kind = NodeKind::Entity;
        assert!(matches!(
            store.upsert_node(&impostor).await.unwrap_err(),
            RegraphError::Integrity { .. }
        ));
    }

    #[tokio::test]
    async fn edge_dedup_and_detach() {
        let store = MemoryGraphStore::new();
        let a = NodeId::page("https://agency.example/a");
        let b = NodeId::page("https://agency.example/b");
        let edge = GraphEdge::new(a, b, EdgeKind::LinksTo);

        store.upsert_edge(&edge).await.unwrap();
        store.upsert_edge(&edge).await.unwrap();
        assert_eq!(store.count_edges().await.unwrap(), 1);

        store.detach_edges(&a, EdgeKind::LinksTo).await.unwrap();
        assert_eq!(store.count_edges().await.unwrap(), 0);
    }
}
