//! Embedding repair pass.
//!
//! Re-visits live chunk nodes whose embedding is absent (usually because
//! the backend was down or timed out during ingestion) and fills them in.
//! Idempotent: chunks that gain an embedding drop off the work list, so
//! the pass can run repeatedly or alongside ingestion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use regraph_embed::Embedder;
use regraph_shared::{AppConfig, Result};
use regraph_storage::GraphStore;

/// Work-list page size per store query.
const BATCH_SIZE: u32 = 64;

/// Summary of a completed repair pass.
#[derive(Debug, Default, Clone)]
pub struct RepairReport {
    /// Chunks examined.
    pub scanned: usize,
    /// Embeddings successfully written.
    pub repaired: usize,
    /// Chunks that still failed to embed (left for a later pass).
    pub failed: usize,
    /// Total duration.
    pub elapsed: Duration,
}

/// Embed every live chunk currently missing a vector, up to `limit`
/// (0 means no limit).
#[instrument(skip_all, fields(limit))]
pub async fn repair_embeddings(
    store: &dyn GraphStore,
    embedder: Arc<dyn Embedder>,
    config: &AppConfig,
    limit: usize,
) -> Result<RepairReport> {
    let start = Instant::now();
    let mut report = RepairReport::default();
    let timeout = Duration::from_secs(config.embedding.timeout_secs);

    loop {
        let batch = store.nodes_missing_embedding(BATCH_SIZE).await?;
        if batch.is_empty() {
            break;
        }

        let mut progressed = false;
        for node in &batch {
            if limit > 0 && report.scanned >= limit {
                break;
            }
            report.scanned += 1;

            let Some(text) = node.payload.as_deref() else {
                warn!(id = %node.id, "chunk node has no payload, skipping");
                report.failed += 1;
                continue;
            };

            match tokio::time::timeout(timeout, embedder.embed(text)).await {
                Ok(Ok(vector)) => {
                    store.set_embedding(&node.id, &vector).await?;
                    report.repaired += 1;
                    progressed = true;
                }
                Ok(Err(e)) => {
                    warn!(id = %node.id, error = %e, "repair embedding failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(id = %node.id, "repair embedding timed out");
                    report.failed += 1;
                }
            }
        }

        let hit_limit = limit > 0 && report.scanned >= limit;
        // Without progress the same nodes would come back forever.
        if hit_limit || !progressed {
            break;
        }
    }

    report.elapsed = start.elapsed();
    info!(
        scanned = report.scanned,
        repaired = report.repaired,
        failed = report.failed,
        elapsed_ms = report.elapsed.as_millis(),
        "repair pass complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use regraph_embed::NoopEmbedder;
    use regraph_shared::{Fingerprint, GraphNode, NodeId};
    use regraph_storage::MemoryGraphStore;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.provider = "noop".into();
        config.embedding.dimension = 4;
        config
    }

    async fn seed_chunks(store: &MemoryGraphStore, count: u32) -> NodeId {
        let parent = NodeId::document(&Fingerprint::of_text("doc"));
        for index in 0..count {
            let chunk = GraphNode::chunk(parent, index, format!("chunk {index}"), Utc::now());
            store.upsert_node(&chunk).await.unwrap();
        }
        parent
    }

    #[tokio::test]
    async fn repairs_all_missing_embeddings() {
        let store = MemoryGraphStore::new();
        seed_chunks(&store, 5).await;

        let report = repair_embeddings(
            &store,
            Arc::new(NoopEmbedder::new(4)),
            &test_config(),
            0,
        )
        .await
        .unwrap();

        assert_eq!(report.scanned, 5);
        assert_eq!(report.repaired, 5);
        assert_eq!(report.failed, 0);
        assert!(store.nodes_missing_embedding(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_pass_finds_nothing() {
        let store = MemoryGraphStore::new();
        seed_chunks(&store, 2).await;
        let embedder: Arc<dyn Embedder> = Arc::new(NoopEmbedder::new(4));

        repair_embeddings(&store, embedder.clone(), &test_config(), 0)
            .await
            .unwrap();
        let report = repair_embeddings(&store, embedder, &test_config(), 0)
            .await
            .unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.repaired, 0);
    }

    #[tokio::test]
    async fn respects_limit() {
        let store = MemoryGraphStore::new();
        seed_chunks(&store, 5).await;

        let report = repair_embeddings(
            &store,
            Arc::new(NoopEmbedder::new(4)),
            &test_config(),
            2,
        )
        .await
        .unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(store.nodes_missing_embedding(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn persistent_failures_terminate() {
        let store = MemoryGraphStore::new();
        let parent = NodeId::document(&Fingerprint::of_text("doc"));
        // Whitespace payload is degenerate input for every backend.
        let chunk = GraphNode::chunk(parent, 0, "   ".into(), Utc::now());
        store.upsert_node(&chunk).await.unwrap();

        let report = repair_embeddings(
            &store,
            Arc::new(NoopEmbedder::new(4)),
            &test_config(),
            0,
        )
        .await
        .unwrap();
        assert_eq!(report.repaired, 0);
        assert_eq!(report.failed, 1);
    }
}
