//! Core domain types for the regraph ingestion graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

/// UUIDv5 namespace for all graph node identifiers.
///
/// Node ids must be pure functions of stable inputs so that re-ingestion
/// resolves to the same node regardless of crawl order or wall-clock time.
const NODE_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1d, 0x52, 0xf0, 0x9e, 0x41, 0x4c, 0x8a, 0xb4, 0x07, 0x2d, 0x5f, 0xa3, 0x1c, 0x88,
    0x19,
]);

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Semantic classification of a URL, guiding extraction routing and
/// deciding whether a link is worth an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// A regular content page (HTML).
    DocumentPage,
    /// A downloadable document (PDF and friends).
    Attachment,
    /// A listing/search/navigation page; crawl-worthy but content-thin.
    IndexPage,
    /// Not worth ingesting (assets, foreign-language variants, etc.).
    Irrelevant,
}

// ---------------------------------------------------------------------------
// FetchedResource
// ---------------------------------------------------------------------------

/// A raw resource handed to the pipeline by the external fetcher.
///
/// Immutable and consumed once; repeated delivery of the same URL is
/// expected and safe (the whole pipeline is idempotent).
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// URL the resource was fetched from.
    pub url: Url,
    /// When the fetcher retrieved it.
    pub fetched_at: DateTime<Utc>,
    /// Content type from the response headers (may be empty).
    pub content_type: String,
    /// Raw response body.
    pub raw_bytes: Vec<u8>,
    /// HTTP status code of the fetch.
    pub http_status: u16,
}

// ---------------------------------------------------------------------------
// ExtractedContent
// ---------------------------------------------------------------------------

/// One structural section of an extracted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Section heading, if the source had one.
    pub heading: Option<String>,
    /// Normalized section text.
    pub text: String,
}

/// Normalized content produced by an extractor.
///
/// Extraction never fails: malformed input yields an empty `body_text`
/// and one or more entries in `warnings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    /// URL the content came from.
    pub source_url: String,
    /// Document title, if one could be extracted.
    pub title: Option<String>,
    /// Full normalized body text.
    pub body_text: String,
    /// Ordered structural sections (heading hierarchy / page breaks).
    pub sections: Vec<Section>,
    /// Outbound links in document order, resolved and deduplicated.
    pub outbound_links: Vec<String>,
    /// Category/topic labels found on the page (become Entity nodes).
    pub tags: Vec<String>,
    /// Extraction warnings (e.g. "unparseable-pdf", "empty-document").
    pub warnings: Vec<String>,
}

impl ExtractedContent {
    /// An empty result for `source_url` carrying a single warning.
    pub fn failed(source_url: &str, warning: impl Into<String>) -> Self {
        Self {
            source_url: source_url.to_string(),
            warnings: vec![warning.into()],
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Deterministic digest of normalized body text, the dedup/change-detection
/// key. Two resources with the same fingerprint are the same content
/// regardless of URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Fingerprint of a body text: whitespace-collapsed, lowercased, then
    /// SHA-256 hex.
    pub fn of_text(text: &str) -> Self {
        let normalized = normalize_text(text);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// The hex digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collapse all whitespace runs to single spaces, trim, and lowercase.
///
/// Fingerprints are computed over this form so that markup reflows and
/// casing churn do not register as content changes.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Deterministic graph node identifier (UUIDv5 over stable inputs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Id of the Page node for a canonical URL.
    pub fn page(canonical_url: &str) -> Self {
        Self::derive("page", canonical_url)
    }

    /// Id of the content-identity Document node for a fingerprint.
    pub fn document(fingerprint: &Fingerprint) -> Self {
        Self::derive("document", fingerprint.as_str())
    }

    /// Id of a Chunk node keyed by its parent Document and stable index.
    pub fn chunk(parent: &NodeId, index: u32) -> Self {
        Self::derive("chunk", &format!("{parent}:{index}"))
    }

    /// Id of an Entity node for a tag label (case-insensitive).
    pub fn entity(label: &str) -> Self {
        Self::derive("entity", &label.trim().to_lowercase())
    }

    fn derive(kind: &str, key: &str) -> Self {
        let name = format!("{kind}\n{key}");
        Self(Uuid::new_v5(&NODE_NAMESPACE, name.as_bytes()))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Graph nodes & edges
// ---------------------------------------------------------------------------

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// URL identity: one node per canonical URL.
    Page,
    /// Content identity: one node per fingerprint, shared across URLs.
    Document,
    /// A bounded span of a document's text, the unit of embedding.
    Chunk,
    /// A category/topic label referenced by pages.
    Entity,
}

impl NodeKind {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Document => "document",
            Self::Chunk => "chunk",
            Self::Entity => "entity",
        }
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "page" => Ok(Self::Page),
            "document" => Ok(Self::Document),
            "chunk" => Ok(Self::Chunk),
            "entity" => Ok(Self::Entity),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Kind of a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// Page → Page hyperlink.
    LinksTo,
    /// Document → Chunk containment.
    ContainsChunk,
    /// Page → Document (content identity) or Page → Entity (tag).
    References,
}

impl EdgeKind {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinksTo => "links-to",
            Self::ContainsChunk => "contains-chunk",
            Self::References => "references",
        }
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "links-to" => Ok(Self::LinksTo),
            "contains-chunk" => Ok(Self::ContainsChunk),
            "references" => Ok(Self::References),
            other => Err(format!("unknown edge kind: {other}")),
        }
    }
}

/// A graph node as stored. All ids are deterministic (see [`NodeId`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Deterministic identifier.
    pub id: NodeId,
    /// Node kind.
    pub kind: NodeKind,
    /// Canonical URL (Page nodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Title or label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Content fingerprint (Page and Document nodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Text payload (Chunk nodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Stable chunk index within the parent (Chunk nodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// Parent Document id (Chunk nodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    /// Embedding vector; absent until (successfully) embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Staleness flag; set instead of deleting. A live re-ingestion of the
    /// node clears it.
    #[serde(default)]
    pub stale: bool,
    /// Last time an ingestion touched this node.
    pub last_seen: DateTime<Utc>,
}

impl GraphNode {
    /// Build a Page node for a canonical URL.
    pub fn page(
        url: &str,
        title: Option<String>,
        fingerprint: Fingerprint,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NodeId::page(url),
            kind: NodeKind::Page,
            url: Some(url.to_string()),
            title,
            fingerprint: Some(fingerprint),
            payload: None,
            chunk_index: None,
            parent_id: None,
            embedding: None,
            stale: false,
            last_seen,
        }
    }

    /// Build the content-identity Document node for a fingerprint.
    pub fn document(
        fingerprint: Fingerprint,
        title: Option<String>,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NodeId::document(&fingerprint),
            kind: NodeKind::Document,
            url: None,
            title,
            fingerprint: Some(fingerprint),
            payload: None,
            chunk_index: None,
            parent_id: None,
            embedding: None,
            stale: false,
            last_seen,
        }
    }

    /// Build a Chunk node under a parent Document.
    pub fn chunk(parent: NodeId, index: u32, text: String, last_seen: DateTime<Utc>) -> Self {
        Self {
            id: NodeId::chunk(&parent, index),
            kind: NodeKind::Chunk,
            url: None,
            title: None,
            fingerprint: None,
            payload: Some(text),
            chunk_index: Some(index),
            parent_id: Some(parent),
            embedding: None,
            stale: false,
            last_seen,
        }
    }

    /// Build an Entity node for a tag label.
    pub fn entity(label: &str, last_seen: DateTime<Utc>) -> Self {
        Self {
            id: NodeId::entity(label),
            kind: NodeKind::Entity,
            url: None,
            title: Some(label.trim().to_string()),
            fingerprint: None,
            payload: None,
            chunk_index: None,
            parent_id: None,
            embedding: None,
            stale: false,
            last_seen,
        }
    }
}

/// A graph edge, deduplicated by the full (from, to, kind) triple.
///
/// `to_id` may be a forward reference: an id whose node has not been
/// ingested yet. The edge becomes complete once that node is upserted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node id.
    pub from_id: NodeId,
    /// Target node id (forward references allowed).
    pub to_id: NodeId,
    /// Edge kind.
    pub kind: EdgeKind,
}

impl GraphEdge {
    /// Construct an edge.
    pub fn new(from_id: NodeId, to_id: NodeId, kind: EdgeKind) -> Self {
        Self {
            from_id,
            to_id,
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A chunk of document text produced by the splitter, pre-embedding.
///
/// `index` is stable given the same extraction, which is what makes
/// re-embedding idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// The parent Document node id.
    pub parent_id: NodeId,
    /// Stable, zero-based position within the parent.
    pub index: u32,
    /// Chunk text.
    pub text: String,
    /// Embedding vector, absent until computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ---------------------------------------------------------------------------
// URL canonicalization
// ---------------------------------------------------------------------------

/// Canonicalize a URL for identity purposes: strip the fragment and any
/// trailing slash on a non-root path. Node ids and dedup keys are always
/// derived from this form.
pub fn canonical_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let path = canonical.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        canonical.set_path(&trimmed);
    }
    canonical
}
