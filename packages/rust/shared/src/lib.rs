//! Shared types, error model, and configuration for regraph.
//!
//! This crate is the foundation depended on by all other regraph crates.
//! It provides:
//! - [`RegraphError`] — the unified error type
//! - Domain types ([`FetchedResource`], [`ExtractedContent`], [`GraphNode`],
//!   [`GraphEdge`], [`NodeId`], [`Fingerprint`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ChunkingConfig, ClassifyRuleConfig, EmbeddingConfig, PipelineConfig, RetryConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{RegraphError, Result};
pub use types::{
    Chunk, EdgeKind, ExtractedContent, FetchedResource, Fingerprint, GraphEdge, GraphNode,
    NodeId, NodeKind, Role, Section, canonical_url, normalize_text,
};
