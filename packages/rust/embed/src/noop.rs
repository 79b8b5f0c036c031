//! No-op embedding backend.
//!
//! Returns zero vectors of the configured dimensionality. Useful for tests,
//! dry runs, and builds where no embedding backend is reachable.

use async_trait::async_trait;

use crate::{EmbedError, Embedder};

/// Zero-vector embedder.
pub struct NoopEmbedder {
    dimension: usize,
}

impl NoopEmbedder {
    /// No-op embedder with the given output dimensionality.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for NoopEmbedder {
    fn name(&self) -> &str {
        "noop"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::DegenerateInput);
        }
        Ok(vec![0.0; self.dimension])
    }
}
