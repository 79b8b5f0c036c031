//! Embedding backends: text in, fixed-dimensionality vector out.
//!
//! The [`Embedder`] trait is the capability seam; concrete backends are a
//! small closed set selected by the `embedding.provider` configuration key:
//! - [`HttpEmbedder`] — OpenAI-compatible `/embeddings` endpoint
//! - [`NoopEmbedder`] — zero vectors, for tests and dry runs
//!
//! An embedding failure is never fatal to a pipeline run: callers downgrade
//! the affected chunk to an un-embedded state and move on.

mod http;
mod noop;

pub use http::HttpEmbedder;
pub use noop::NoopEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use regraph_shared::{EmbeddingConfig, RegraphError, Result, RetryConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure modes of an embedding call, distinguishable from success.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Backend rejected the call or could not be reached (after retries).
    #[error("embedding backend error: {0}")]
    Backend(String),

    /// Input was empty or otherwise not embeddable.
    #[error("degenerate input: nothing to embed")]
    DegenerateInput,

    /// Backend returned a vector of the wrong dimensionality.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A text-embedding capability with declared dimensionality.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Backend name for tracing.
    fn name(&self) -> &str;

    /// Fixed output dimensionality; every successful call returns exactly
    /// this many floats.
    fn dimension(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the configured embedding backend.
///
/// Unknown providers and missing API keys are configuration errors: fatal
/// at startup, before any resource is processed.
pub fn embedder_from_config(
    embedding: &EmbeddingConfig,
    retry: &RetryConfig,
) -> Result<Arc<dyn Embedder>> {
    match embedding.provider.as_str() {
        "noop" => Ok(Arc::new(NoopEmbedder::new(embedding.dimension))),
        "openai" => {
            let api_key = std::env::var(&embedding.api_key_env).map_err(|_| {
                RegraphError::config(format!(
                    "embedding API key env var {} is not set",
                    embedding.api_key_env
                ))
            })?;
            let embedder = HttpEmbedder::new(
                &embedding.endpoint,
                &api_key,
                &embedding.model,
                embedding.dimension,
                std::time::Duration::from_secs(embedding.timeout_secs),
                retry.max_attempts,
                std::time::Duration::from_millis(retry.base_delay_ms),
            )?;
            Ok(Arc::new(embedder))
        }
        other => Err(RegraphError::config(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}
