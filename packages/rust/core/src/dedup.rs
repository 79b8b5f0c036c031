//! Content deduplication: fingerprint lookups → ingestion decision.
//!
//! `Unchanged` is the primary cost-control path: it short-circuits
//! re-chunking and re-embedding entirely. Content identity is canonicalized
//! on the fingerprint, not the URL, so byte-identical content behind two
//! URLs shares one Document/Chunk subgraph.

use regraph_shared::{Fingerprint, NodeId, RegraphError, Result};
use regraph_storage::GraphStore;

/// Outcome of evaluating a fetched resource against stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No prior node for this URL.
    New,
    /// Prior node exists with the same fingerprint; skip everything
    /// downstream of extraction.
    Unchanged,
    /// Prior node exists with a different fingerprint; re-chunk, re-embed,
    /// and reconcile edges.
    Updated,
}

/// Evaluate a URL's page node against the stored fingerprint.
///
/// A stored Page node without a fingerprint is a data-integrity violation
/// (every page upsert writes one); the resource gets quarantined upstream.
pub async fn evaluate(
    store: &dyn GraphStore,
    page_id: &NodeId,
    fingerprint: &Fingerprint,
) -> Result<Decision> {
    match store.get_node(page_id).await? {
        None => Ok(Decision::New),
        Some(node) => match &node.fingerprint {
            Some(stored) if stored == fingerprint => Ok(Decision::Unchanged),
            Some(_) => Ok(Decision::Updated),
            None => Err(RegraphError::integrity(format!(
                "page node {page_id} has no stored fingerprint"
            ))),
        },
    }
}

/// Whether the fingerprint's Document subgraph already exists — if so, the
/// chunks (and their embeddings) are reused rather than recomputed.
pub async fn content_known(store: &dyn GraphStore, fingerprint: &Fingerprint) -> Result<bool> {
    let document_id = NodeId::document(fingerprint);
    Ok(store.get_node(&document_id).await?.is_some())
}
