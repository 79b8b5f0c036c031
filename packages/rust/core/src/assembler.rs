//! Graph assembly: one extracted, deduplicated resource → a merge plan of
//! node/edge mutations, applied as a single logical upsert.
//!
//! Planning is pure (easy to test for idempotence); application talks to
//! the store. Every mutation is an upsert keyed by deterministic id, so
//! re-applying a plan — or applying the same plan concurrently from two
//! workers — converges instead of conflicting.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use regraph_shared::{
    Chunk, EdgeKind, Fingerprint, GraphEdge, GraphNode, NodeId, Result, Role,
};
use regraph_storage::GraphStore;

use crate::dedup::Decision;

// ---------------------------------------------------------------------------
// Input & plan
// ---------------------------------------------------------------------------

/// Everything the assembler needs to know about one ingested resource.
#[derive(Debug, Clone)]
pub struct MergeInput {
    /// Canonical URL of the resource.
    pub canonical_url: String,
    /// Extracted title.
    pub title: Option<String>,
    /// Fingerprint of the normalized body.
    pub fingerprint: Fingerprint,
    /// Fetch timestamp, becomes `last_seen`.
    pub fetched_at: DateTime<Utc>,
    /// Dedup decision for this URL.
    pub decision: Decision,
    /// Previously stored fingerprint (set when `decision` is `Updated`).
    pub prior_fingerprint: Option<Fingerprint>,
    /// Whether extraction produced a non-empty body.
    pub has_content: bool,
    /// Whether the fingerprint's Document subgraph already exists (shared
    /// content; chunks are reused, not rebuilt).
    pub content_known: bool,
    /// Chunks for novel content (already embedded where possible).
    pub chunks: Vec<Chunk>,
    /// Outbound links with their classified roles.
    pub outbound: Vec<(String, Role)>,
    /// Category/topic labels.
    pub tags: Vec<String>,
}

/// The mutations one resource contributes to the graph.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    /// Nodes to upsert, page first.
    pub nodes: Vec<GraphNode>,
    /// Edges to upsert (deduplicated by the store).
    pub edges: Vec<GraphEdge>,
    /// (from, kind) edge sets to detach before upserting, for
    /// reconciliation on content updates.
    pub detach: Vec<(NodeId, EdgeKind)>,
    /// Existing Document subgraph to mark live again (shared content).
    pub revive_document: Option<NodeId>,
    /// Prior Document subgraph to mark stale if no live page still
    /// references it.
    pub retire_document: Option<NodeId>,
    /// Timestamp applied to touched nodes.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Compute the merge plan for one resource. Pure; identical input yields an
/// identical plan.
pub fn plan_merge(input: &MergeInput) -> MergePlan {
    let page_id = NodeId::page(&input.canonical_url);
    let mut plan = MergePlan {
        fetched_at: input.fetched_at,
        ..MergePlan::default()
    };

    plan.nodes.push(GraphNode::page(
        &input.canonical_url,
        input.title.clone(),
        input.fingerprint.clone(),
        input.fetched_at,
    ));

    // A content change invalidates the page's old References and LinksTo
    // edge sets; they are rebuilt from the new extraction below.
    if input.decision == Decision::Updated {
        plan.detach.push((page_id, EdgeKind::References));
        plan.detach.push((page_id, EdgeKind::LinksTo));
        plan.retire_document = input
            .prior_fingerprint
            .as_ref()
            .filter(|prior| **prior != input.fingerprint)
            .map(NodeId::document);
    }

    if input.has_content {
        let document_id = NodeId::document(&input.fingerprint);
        plan.edges
            .push(GraphEdge::new(page_id, document_id, EdgeKind::References));

        if input.content_known {
            plan.revive_document = Some(document_id);
        } else {
            plan.nodes.push(GraphNode::document(
                input.fingerprint.clone(),
                input.title.clone(),
                input.fetched_at,
            ));
            for chunk in &input.chunks {
                let mut node = GraphNode::chunk(
                    chunk.parent_id,
                    chunk.index,
                    chunk.text.clone(),
                    input.fetched_at,
                );
                node.embedding = chunk.embedding.clone();
                plan.nodes.push(node);
                plan.edges.push(GraphEdge::new(
                    document_id,
                    NodeId::chunk(&document_id, chunk.index),
                    EdgeKind::ContainsChunk,
                ));
            }
        }
    }

    // LinksTo edges may point at nodes nobody has ingested yet; the target
    // id is derivable from the URL alone, so forward references are safe.
    for (target_url, role) in &input.outbound {
        if *role == Role::Irrelevant || *target_url == input.canonical_url {
            continue;
        }
        plan.edges
            .push(GraphEdge::new(page_id, NodeId::page(target_url), EdgeKind::LinksTo));
    }

    for tag in &input.tags {
        plan.nodes.push(GraphNode::entity(tag, input.fetched_at));
        plan.edges
            .push(GraphEdge::new(page_id, NodeId::entity(tag), EdgeKind::References));
    }

    plan
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Apply a merge plan to the store as one logical upsert.
///
/// Ordering: detach first (so reconciliation cannot delete edges this plan
/// adds), then nodes, then edges, then revival/retirement bookkeeping.
#[instrument(skip_all, fields(nodes = plan.nodes.len(), edges = plan.edges.len()))]
pub async fn apply_merge(store: &dyn GraphStore, plan: &MergePlan) -> Result<()> {
    for (from_id, kind) in &plan.detach {
        store.detach_edges(from_id, *kind).await?;
    }
    for node in &plan.nodes {
        store.upsert_node(node).await?;
    }
    for edge in &plan.edges {
        store.upsert_edge(edge).await?;
    }

    if let Some(document_id) = plan.revive_document {
        revive_subgraph(store, &document_id, plan.fetched_at).await?;
    }
    if let Some(document_id) = plan.retire_document {
        retire_if_orphaned(store, &document_id).await?;
    }

    Ok(())
}

/// Mark a shared Document subgraph live again (it may have been retired by
/// an earlier update before this URL re-surfaced the same content).
async fn revive_subgraph(
    store: &dyn GraphStore,
    document_id: &NodeId,
    seen_at: DateTime<Utc>,
) -> Result<()> {
    store.touch_node(document_id, seen_at).await?;
    for edge in store.edges_from(document_id).await? {
        if edge.kind == EdgeKind::ContainsChunk {
            store.touch_node(&edge.to_id, seen_at).await?;
        }
    }
    Ok(())
}

/// Mark a Document and its chunks stale — but only when no live page still
/// references it. Retained for provenance, never deleted.
async fn retire_if_orphaned(store: &dyn GraphStore, document_id: &NodeId) -> Result<()> {
    for edge in store.edges_to(document_id).await? {
        if edge.kind != EdgeKind::References {
            continue;
        }
        if let Some(referrer) = store.get_node(&edge.from_id).await? {
            if !referrer.stale {
                debug!(%document_id, referrer = %referrer.id, "document still referenced, keeping live");
                return Ok(());
            }
        }
    }

    store.mark_stale(document_id).await?;
    for edge in store.edges_from(document_id).await? {
        if edge.kind == EdgeKind::ContainsChunk {
            store.mark_stale(&edge.to_id).await?;
        }
    }
    debug!(%document_id, "retired orphaned document subgraph");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regraph_storage::MemoryGraphStore;

    fn chunk(parent: NodeId, index: u32, text: &str, embedded: bool) -> Chunk {
        Chunk {
            parent_id: parent,
            index,
            text: text.into(),
            embedding: embedded.then(|| vec![0.0; 4]),
        }
    }

    fn input_for(url: &str, body: &str, links: &[&str]) -> MergeInput {
        let fingerprint = Fingerprint::of_text(body);
        let document_id = NodeId::document(&fingerprint);
        MergeInput {
            canonical_url: url.into(),
            title: Some("Title".into()),
            fingerprint,
            fetched_at: Utc::now(),
            decision: Decision::New,
            prior_fingerprint: None,
            has_content: !body.is_empty(),
            content_known: false,
            chunks: vec![chunk(document_id, 0, body, true)],
            outbound: links
                .iter()
                .map(|l| (l.to_string(), Role::DocumentPage))
                .collect(),
            tags: vec![],
        }
    }

    async fn graph_shape(store: &MemoryGraphStore) -> (usize, usize) {
        (
            store.all_nodes().await.len(),
            store.all_edges().await.len(),
        )
    }

    #[test]
    fn plan_for_new_page_covers_full_subgraph() {
        let input = input_for("https://a.example/p", "Hello world", &["https://a.example/q"]);
        let plan = plan_merge(&input);

        // Page + document + one chunk.
        assert_eq!(plan.nodes.len(), 3);
        // References + ContainsChunk + LinksTo.
        assert_eq!(plan.edges.len(), 3);
        assert!(plan.detach.is_empty());
        assert!(plan.retire_document.is_none());

        let page_id = NodeId::page("https://a.example/p");
        assert!(
            plan.edges
                .iter()
                .any(|e| e.from_id == page_id && e.kind == EdgeKind::LinksTo)
        );
    }

    #[test]
    fn planning_is_deterministic() {
        let input = input_for("https://a.example/p", "Hello world", &["https://a.example/q"]);
        let a = plan_merge(&input);
        let b = plan_merge(&input);
        assert_eq!(a.edges, b.edges);
        assert_eq!(
            a.nodes.iter().map(|n| n.id).collect::<Vec<_>>(),
            b.nodes.iter().map(|n| n.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn apply_twice_changes_nothing() {
        let store = MemoryGraphStore::new();
        let input = input_for("https://a.example/p", "Hello world", &["https://a.example/q"]);
        let plan = plan_merge(&input);

        apply_merge(&store, &plan).await.unwrap();
        let first = graph_shape(&store).await;

        apply_merge(&store, &plan).await.unwrap();
        let second = graph_shape(&store).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn self_links_are_dropped() {
        let input = input_for("https://a.example/p", "body", &["https://a.example/p"]);
        let plan = plan_merge(&input);
        assert!(!plan.edges.iter().any(|e| e.kind == EdgeKind::LinksTo));
    }

    #[tokio::test]
    async fn update_retires_orphaned_document() {
        let store = MemoryGraphStore::new();
        let old = input_for("https://a.example/p", "old content", &[]);
        let old_fp = old.fingerprint.clone();
        apply_merge(&store, &plan_merge(&old)).await.unwrap();

        let mut new = input_for("https://a.example/p", "new content", &[]);
        new.decision = Decision::Updated;
        new.prior_fingerprint = Some(old_fp.clone());
        apply_merge(&store, &plan_merge(&new)).await.unwrap();

        let old_doc = store
            .get_node(&NodeId::document(&old_fp))
            .await
            .unwrap()
            .unwrap();
        assert!(old_doc.stale);
        let old_chunk = store
            .get_node(&NodeId::chunk(&old_doc.id, 0))
            .await
            .unwrap()
            .unwrap();
        assert!(old_chunk.stale);

        // The new subgraph is live and the page references only it.
        let page_refs = store
            .edges_from(&NodeId::page("https://a.example/p"))
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EdgeKind::References)
            .count();
        assert_eq!(page_refs, 1);
    }

    #[tokio::test]
    async fn shared_document_survives_one_referrer_updating() {
        let store = MemoryGraphStore::new();
        let shared_body = "identical content";

        let a = input_for("https://a.example/a", shared_body, &[]);
        apply_merge(&store, &plan_merge(&a)).await.unwrap();

        // Second URL, same fingerprint: content already known.
        let mut b = input_for("https://a.example/b", shared_body, &[]);
        b.content_known = true;
        b.chunks.clear();
        apply_merge(&store, &plan_merge(&b)).await.unwrap();

        // Two pages, one document, one chunk.
        let fp = Fingerprint::of_text(shared_body);
        assert_eq!(store.count_nodes(None).await.unwrap(), 4);
        assert_eq!(
            store
                .edges_to(&NodeId::document(&fp))
                .await
                .unwrap()
                .len(),
            2
        );

        // Page A moves to new content; the shared document must stay live
        // because B still references it.
        let mut a2 = input_for("https://a.example/a", "fresh content", &[]);
        a2.decision = Decision::Updated;
        a2.prior_fingerprint = Some(fp.clone());
        apply_merge(&store, &plan_merge(&a2)).await.unwrap();

        let shared_doc = store
            .get_node(&NodeId::document(&fp))
            .await
            .unwrap()
            .unwrap();
        assert!(!shared_doc.stale);
    }

    #[tokio::test]
    async fn revive_brings_retired_subgraph_back() {
        let store = MemoryGraphStore::new();
        let body = "resurrected content";
        let fp = Fingerprint::of_text(body);

        let original = input_for("https://a.example/p", body, &[]);
        apply_merge(&store, &plan_merge(&original)).await.unwrap();

        // Content replaced, old subgraph retired.
        let mut replaced = input_for("https://a.example/p", "interim content", &[]);
        replaced.decision = Decision::Updated;
        replaced.prior_fingerprint = Some(fp.clone());
        apply_merge(&store, &plan_merge(&replaced)).await.unwrap();
        assert!(
            store
                .get_node(&NodeId::document(&fp))
                .await
                .unwrap()
                .unwrap()
                .stale
        );

        // Same URL returns to the original content: subgraph revives,
        // chunks and embeddings reused.
        let mut back = input_for("https://a.example/p", body, &[]);
        back.decision = Decision::Updated;
        back.prior_fingerprint = Some(Fingerprint::of_text("interim content"));
        back.content_known = true;
        back.chunks.clear();
        apply_merge(&store, &plan_merge(&back)).await.unwrap();

        let doc = store.get_node(&NodeId::document(&fp)).await.unwrap().unwrap();
        assert!(!doc.stale);
        let chunk = store
            .get_node(&NodeId::chunk(&doc.id, 0))
            .await
            .unwrap()
            .unwrap();
        assert!(!chunk.stale);
        // The embedding written the first time around is still there.
        assert!(chunk.embedding.is_some());
    }

    #[tokio::test]
    async fn tags_become_entities_with_references() {
        let store = MemoryGraphStore::new();
        let mut input = input_for("https://a.example/p", "body", &[]);
        input.tags = vec!["Human medicines".into()];
        apply_merge(&store, &plan_merge(&input)).await.unwrap();

        let entity = store
            .get_node(&NodeId::entity("Human medicines"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.title.as_deref(), Some("Human medicines"));

        let refs = store.edges_to(&entity.id).await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].from_id, NodeId::page("https://a.example/p"));
    }

    #[tokio::test]
    async fn forward_reference_resolves_after_target_ingestion() {
        let store = MemoryGraphStore::new();
        let a = input_for("https://a.example/a", "a body", &["https://a.example/b"]);
        apply_merge(&store, &plan_merge(&a)).await.unwrap();

        let b_id = NodeId::page("https://a.example/b");
        assert!(store.get_node(&b_id).await.unwrap().is_none());
        assert_eq!(store.edges_to(&b_id).await.unwrap().len(), 1);

        let b = input_for("https://a.example/b", "b body", &[]);
        apply_merge(&store, &plan_merge(&b)).await.unwrap();
        assert!(store.get_node(&b_id).await.unwrap().is_some());
    }
}
