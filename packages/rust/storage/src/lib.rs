//! Graph store: narrow repository interface over the node/edge tables.
//!
//! The pipeline only ever upserts by deterministic id, looks nodes up by id
//! or URL, flags staleness, and queries for chunks awaiting embeddings —
//! that surface is the [`GraphStore`] trait, isolating the pipeline from
//! the storage engine.
//!
//! Implementations:
//! - [`LibsqlGraphStore`] — local libSQL database with versioned migrations
//! - [`MemoryGraphStore`] — in-memory store for tests
//!
//! **Invariants enforced here:** upserting a node id that exists with a
//! different kind is an integrity error; a node upsert never clears an
//! existing embedding; nodes are never deleted.

mod memory;
mod migrations;

pub use memory::MemoryGraphStore;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};

use regraph_shared::{EdgeKind, GraphEdge, GraphNode, NodeId, NodeKind, RegraphError, Result};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Repository interface for graph mutations and lookups.
///
/// Every mutation is an idempotent upsert keyed by deterministic id, so
/// concurrent applications of the same logical change converge instead of
/// conflicting.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or update a node. Never clears an existing embedding; clears
    /// the stale flag (an upsert means the node was seen live).
    async fn upsert_node(&self, node: &GraphNode) -> Result<()>;

    /// Fetch a node by id.
    async fn get_node(&self, id: &NodeId) -> Result<Option<GraphNode>>;

    /// Fetch a node by canonical URL.
    async fn get_node_by_url(&self, url: &str) -> Result<Option<GraphNode>>;

    /// Update only `last_seen` (and liveness) for an unchanged node.
    async fn touch_node(&self, id: &NodeId, last_seen: DateTime<Utc>) -> Result<()>;

    /// Flag a node stale. Nodes are never deleted.
    async fn mark_stale(&self, id: &NodeId) -> Result<()>;

    /// Insert an edge if the (from, to, kind) triple is new. `to_id` may be
    /// a forward reference to a node not yet upserted.
    async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()>;

    /// Remove all edges of one kind leaving `from_id` (edge reconciliation
    /// on content updates; node rows are untouched).
    async fn detach_edges(&self, from_id: &NodeId, kind: EdgeKind) -> Result<()>;

    /// All edges leaving a node.
    async fn edges_from(&self, from_id: &NodeId) -> Result<Vec<GraphEdge>>;

    /// All edges arriving at a node.
    async fn edges_to(&self, to_id: &NodeId) -> Result<Vec<GraphEdge>>;

    /// Attach an embedding to a chunk node.
    async fn set_embedding(&self, id: &NodeId, embedding: &[f32]) -> Result<()>;

    /// Live chunk nodes with no embedding yet (repair-pass work list).
    async fn nodes_missing_embedding(&self, limit: u32) -> Result<Vec<GraphNode>>;

    /// Node count, optionally restricted to a kind.
    async fn count_nodes(&self, kind: Option<NodeKind>) -> Result<u64>;

    /// Edge count.
    async fn count_edges(&self) -> Result<u64>;

    /// Stale node count.
    async fn count_stale(&self) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Embedding blob codec
// ---------------------------------------------------------------------------

/// Encode an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode little-endian f32 bytes back into an embedding.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ---------------------------------------------------------------------------
// LibsqlGraphStore
// ---------------------------------------------------------------------------

/// Graph store backed by a local libSQL database.
pub struct LibsqlGraphStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl LibsqlGraphStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RegraphError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RegraphError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RegraphError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    async fn stored_kind(&self, id: &NodeId) -> Result<Option<NodeKind>> {
        let mut rows = self
            .conn
            .query("SELECT kind FROM nodes WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let kind: String = row
                    .get(0)
                    .map_err(|e| RegraphError::Storage(e.to_string()))?;
                let kind = kind
                    .parse::<NodeKind>()
                    .map_err(RegraphError::Storage)?;
                Ok(Some(kind))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RegraphError::Storage(e.to_string())),
        }
    }
}

#[async_trait]
impl GraphStore for LibsqlGraphStore {
    async fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        // An id resolving to a different kind means the deterministic id
        // scheme was violated somewhere; quarantine rather than overwrite.
        if let Some(existing) = self.stored_kind(&node.id).await? {
            if existing != node.kind {
                return Err(RegraphError::integrity(format!(
                    "node {} exists with kind {existing:?}, refusing upsert as {:?}",
                    node.id, node.kind
                )));
            }
        }

        let last_seen = node.last_seen.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO nodes (id, kind, url, title, fingerprint, payload, chunk_index,
                                    parent_id, embedding, stale, first_seen, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                   url = excluded.url,
                   title = excluded.title,
                   fingerprint = excluded.fingerprint,
                   payload = excluded.payload,
                   chunk_index = excluded.chunk_index,
                   parent_id = excluded.parent_id,
                   embedding = COALESCE(excluded.embedding, nodes.embedding),
                   stale = excluded.stale,
                   last_seen = excluded.last_seen",
                params![
                    node.id.to_string(),
                    node.kind.as_str(),
                    node.url.as_deref(),
                    node.title.as_deref(),
                    node.fingerprint.as_ref().map(|f| f.as_str().to_string()),
                    node.payload.as_deref(),
                    node.chunk_index.map(i64::from),
                    node.parent_id.map(|p| p.to_string()),
                    node.embedding.as_deref().map(embedding_to_blob),
                    node.stale as i64,
                    last_seen.as_str(),
                ],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<GraphNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, url, title, fingerprint, payload, chunk_index, parent_id,
                        embedding, stale, last_seen
                 FROM nodes WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_node(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RegraphError::Storage(e.to_string())),
        }
    }

    async fn get_node_by_url(&self, url: &str) -> Result<Option<GraphNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, url, title, fingerprint, payload, chunk_index, parent_id,
                        embedding, stale, last_seen
                 FROM nodes WHERE url = ?1 LIMIT 1",
                params![url],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_node(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RegraphError::Storage(e.to_string())),
        }
    }

    async fn touch_node(&self, id: &NodeId, last_seen: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE nodes SET last_seen = ?1, stale = 0 WHERE id = ?2",
                params![last_seen.to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn mark_stale(&self, id: &NodeId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE nodes SET stale = 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn upsert_edge(&self, edge: &GraphEdge) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO edges (from_id, to_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(from_id, to_id, kind) DO NOTHING",
                params![
                    edge.from_id.to_string(),
                    edge.to_id.to_string(),
                    edge.kind.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn detach_edges(&self, from_id: &NodeId, kind: EdgeKind) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM edges WHERE from_id = ?1 AND kind = ?2",
                params![from_id.to_string(), kind.as_str()],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn edges_from(&self, from_id: &NodeId) -> Result<Vec<GraphEdge>> {
        self.query_edges(
            "SELECT from_id, to_id, kind FROM edges WHERE from_id = ?1",
            from_id,
        )
        .await
    }

    async fn edges_to(&self, to_id: &NodeId) -> Result<Vec<GraphEdge>> {
        self.query_edges(
            "SELECT from_id, to_id, kind FROM edges WHERE to_id = ?1",
            to_id,
        )
        .await
    }

    async fn set_embedding(&self, id: &NodeId, embedding: &[f32]) -> Result<()> {
        self.conn
            .execute(
                "UPDATE nodes SET embedding = ?1 WHERE id = ?2",
                params![embedding_to_blob(embedding), id.to_string()],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn nodes_missing_embedding(&self, limit: u32) -> Result<Vec<GraphNode>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, url, title, fingerprint, payload, chunk_index, parent_id,
                        embedding, stale, last_seen
                 FROM nodes
                 WHERE kind = 'chunk' AND stale = 0 AND embedding IS NULL
                 ORDER BY last_seen
                 LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_node(&row)?);
        }
        Ok(results)
    }

    async fn count_nodes(&self, kind: Option<NodeKind>) -> Result<u64> {
        let mut rows = match kind {
            Some(kind) => self
                .conn
                .query(
                    "SELECT COUNT(*) FROM nodes WHERE kind = ?1",
                    params![kind.as_str()],
                )
                .await ,
            None => self.conn.query("SELECT COUNT(*) FROM nodes", params![]).await,
        }
        .map_err(|e| RegraphError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    async fn count_edges(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM edges", params![])
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }

    async fn count_stale(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM nodes WHERE stale = 1", params![])
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            _ => Ok(0),
        }
    }
}

impl LibsqlGraphStore {
    async fn query_edges(&self, sql: &str, id: &NodeId) -> Result<Vec<GraphEdge>> {
        let mut rows = self
            .conn
            .query(sql, params![id.to_string()])
            .await
            .map_err(|e| RegraphError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_edge(&row)?);
        }
        Ok(results)
    }
}

/// Convert a database row to a [`GraphNode`].
fn row_to_node(row: &libsql::Row) -> Result<GraphNode> {
    let id: String = row
        .get(0)
        .map_err(|e| RegraphError::Storage(e.to_string()))?;
    let kind: String = row
        .get(1)
        .map_err(|e| RegraphError::Storage(e.to_string()))?;

    Ok(GraphNode {
        id: id
            .parse()
            .map_err(|e| RegraphError::Storage(format!("invalid node id: {e}")))?,
        kind: kind.parse().map_err(RegraphError::Storage)?,
        url: row.get::<String>(2).ok(),
        title: row.get::<String>(3).ok(),
        fingerprint: row
            .get::<String>(4)
            .ok()
            .map(regraph_shared::Fingerprint),
        payload: row.get::<String>(5).ok(),
        chunk_index: row.get::<i64>(6).ok().map(|v| v as u32),
        parent_id: row
            .get::<String>(7)
            .ok()
            .and_then(|s| s.parse().ok()),
        embedding: row
            .get::<Vec<u8>>(8)
            .ok()
            .map(|blob| blob_to_embedding(&blob)),
        stale: row.get::<i64>(9).unwrap_or(0) != 0,
        last_seen: {
            let s: String = row
                .get(10)
                .map_err(|e| RegraphError::Storage(e.to_string()))?;
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| RegraphError::Storage(format!("invalid date: {e}")))?
        },
    })
}

/// Convert a database row to a [`GraphEdge`].
fn row_to_edge(row: &libsql::Row) -> Result<GraphEdge> {
    let from_id: String = row
        .get(0)
        .map_err(|e| RegraphError::Storage(e.to_string()))?;
    let to_id: String = row
        .get(1)
        .map_err(|e| RegraphError::Storage(e.to_string()))?;
    let kind: String = row
        .get(2)
        .map_err(|e| RegraphError::Storage(e.to_string()))?;

    Ok(GraphEdge {
        from_id: from_id
            .parse()
            .map_err(|e| RegraphError::Storage(format!("invalid edge from_id: {e}")))?,
        to_id: to_id
            .parse()
            .map_err(|e| RegraphError::Storage(format!("invalid edge to_id: {e}")))?,
        kind: kind.parse().map_err(RegraphError::Storage)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use regraph_shared::Fingerprint;

    /// Unique temp database path per test.
    fn temp_db_path() -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock before epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("regraph_test_{nanos}.db"))
    }

    /// Create a temp file storage for testing.
    async fn test_store() -> LibsqlGraphStore {
        LibsqlGraphStore::open(&temp_db_path()).await.expect("open test db")
    }

    fn page_node(url: &str, body: &str) -> GraphNode {
        GraphNode::page(url, Some("Title".into()), Fingerprint::of_text(body), Utc::now())
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = temp_db_path();
        let s1 = LibsqlGraphStore::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = LibsqlGraphStore::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn node_upsert_and_lookup() {
        let store = test_store().await;
        let node = page_node("https://agency.example/a", "body text");

        store.upsert_node(&node).await.expect("upsert");
        let found = store.get_node(&node.id).await.unwrap().expect("found");
        assert_eq!(found.kind, NodeKind::Page);
        assert_eq!(found.title.as_deref(), Some("Title"));
        assert_eq!(found.fingerprint, node.fingerprint);

        let by_url = store
            .get_node_by_url("https://agency.example/a")
            .await
            .unwrap()
            .expect("found by url");
        assert_eq!(by_url.id, node.id);

        // Re-upsert is an update, not a duplicate.
        store.upsert_node(&node).await.expect("re-upsert");
        assert_eq!(store.count_nodes(Some(NodeKind::Page)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_preserves_existing_embedding() {
        let store = test_store().await;
        let fp = Fingerprint::of_text("content");
        let parent = NodeId::document(&fp);
        let mut chunk = GraphNode::chunk(parent, 0, "chunk text".into(), Utc::now());

        store.upsert_node(&chunk).await.unwrap();
        store
            .set_embedding(&chunk.id, &[1.0, 2.0, 3.0])
            .await
            .unwrap();

        // A re-ingestion upserts the chunk without an embedding; the stored
        // vector must survive.
        chunk.embedding = None;
        store.upsert_node(&chunk).await.unwrap();

        let found = store.get_node(&chunk.id).await.unwrap().unwrap();
        assert_eq!(found.embedding, Some(vec![1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn kind_collision_is_integrity_error() {
        let store = test_store().await;
        let node = page_node("https://agency.example/a", "body");
        store.upsert_node(&node).await.unwrap();

        let mut impostor = node.clone();
        impostor.kind = NodeKind::Document;
        let err = store.upsert_node(&impostor).await.unwrap_err();
        assert!(matches!(err, RegraphError::Integrity { .. }));
    }

    #[tokio::test]
    async fn edges_are_deduplicated() {
        let store = test_store().await;
        let a = NodeId::page("https://agency.example/a");
        let b = NodeId::page("https://agency.example/b");
        let edge = GraphEdge::new(a, b, EdgeKind::LinksTo);

        store.upsert_edge(&edge).await.unwrap();
        store.upsert_edge(&edge).await.unwrap();
        assert_eq!(store.count_edges().await.unwrap(), 1);

        let from_a = store.edges_from(&a).await.unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].to_id, b);

        let to_b = store.edges_to(&b).await.unwrap();
        assert_eq!(to_b.len(), 1);
    }

    #[tokio::test]
    async fn forward_reference_edges_are_valid() {
        let store = test_store().await;
        let a = NodeId::page("https://agency.example/a");
        let b = NodeId::page("https://agency.example/b");

        // Edge first, target node later.
        store
            .upsert_edge(&GraphEdge::new(a, b, EdgeKind::LinksTo))
            .await
            .unwrap();
        assert!(store.get_node(&b).await.unwrap().is_none());

        store
            .upsert_node(&page_node("https://agency.example/b", "b body"))
            .await
            .unwrap();
        let resolved = store.get_node(&b).await.unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn detach_edges_removes_only_one_kind() {
        let store = test_store().await;
        let page = NodeId::page("https://agency.example/a");
        let doc = NodeId::document(&Fingerprint::of_text("x"));
        let other = NodeId::page("https://agency.example/b");

        store
            .upsert_edge(&GraphEdge::new(page, doc, EdgeKind::References))
            .await
            .unwrap();
        store
            .upsert_edge(&GraphEdge::new(page, other, EdgeKind::LinksTo))
            .await
            .unwrap();

        store.detach_edges(&page, EdgeKind::References).await.unwrap();
        let remaining = store.edges_from(&page).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, EdgeKind::LinksTo);
    }

    #[tokio::test]
    async fn missing_embedding_worklist() {
        let store = test_store().await;
        let fp = Fingerprint::of_text("doc");
        let parent = NodeId::document(&fp);

        for index in 0..3u32 {
            let chunk = GraphNode::chunk(parent, index, format!("chunk {index}"), Utc::now());
            store.upsert_node(&chunk).await.unwrap();
        }

        let missing = store.nodes_missing_embedding(10).await.unwrap();
        assert_eq!(missing.len(), 3);

        // Embed one; stale another; both drop off the work list.
        store
            .set_embedding(&NodeId::chunk(&parent, 0), &[0.5])
            .await
            .unwrap();
        store.mark_stale(&NodeId::chunk(&parent, 1)).await.unwrap();

        let missing = store.nodes_missing_embedding(10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].chunk_index, Some(2));
    }

    #[tokio::test]
    async fn stale_flag_and_touch() {
        let store = test_store().await;
        let node = page_node("https://agency.example/a", "body");
        store.upsert_node(&node).await.unwrap();

        store.mark_stale(&node.id).await.unwrap();
        assert_eq!(store.count_stale().await.unwrap(), 1);
        assert!(store.get_node(&node.id).await.unwrap().unwrap().stale);

        // Touching a node means it was seen live again.
        store.touch_node(&node.id, Utc::now()).await.unwrap();
        assert_eq!(store.count_stale().await.unwrap(), 0);
    }
}
