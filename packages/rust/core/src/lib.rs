//! Core ingestion logic for regraph.
//!
//! This crate ties classification, extraction, deduplication, chunking,
//! embedding, and graph assembly into the per-resource ingestion pipeline
//! and the embedding repair pass.

pub mod assembler;
pub mod chunk;
pub mod dedup;
pub mod pipeline;
pub mod repair;

pub use assembler::{MergeInput, MergePlan, apply_merge, plan_merge};
pub use chunk::split_chunks;
pub use dedup::{Decision, evaluate};
pub use pipeline::{
    IngestPipeline, IngestReport, PipelineContext, ProgressReporter, ShutdownHandle,
    SilentProgress,
};
pub use repair::{RepairReport, repair_embeddings};
