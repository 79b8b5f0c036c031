//! OpenAI-compatible HTTP embedding backend.
//!
//! Retries 429s, 5xx responses, and transport errors with exponential
//! backoff up to a bounded attempt count; everything else surfaces
//! immediately as a backend error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use regraph_shared::{RegraphError, Result};

use crate::{EmbedError, Embedder};

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
    max_attempts: u32,
    base_delay: Duration,
}

impl HttpEmbedder {
    /// Build a new client. The per-request timeout is enforced by the
    /// underlying HTTP client.
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
        max_attempts: u32,
        base_delay: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| RegraphError::config("embedding API key is not a valid header"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RegraphError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimension,
            max_attempts: max_attempts.max(1),
            base_delay,
        })
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::DegenerateInput);
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: Some(self.dimension),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let response = self.client.post(&self.endpoint).json(&request).send().await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .await
                            .map_err(|e| EmbedError::Backend(format!("invalid response: {e}")))?;
                        let Some(entry) = parsed.data.into_iter().next() else {
                            return Err(EmbedError::Backend("empty data array".into()));
                        };
                        if entry.embedding.len() != self.dimension {
                            return Err(EmbedError::DimensionMismatch {
                                expected: self.dimension,
                                got: entry.embedding.len(),
                            });
                        }
                        debug!(model = %self.model, chars = text.len(), "embedded text");
                        return Ok(entry.embedding);
                    }

                    if Self::should_retry(status) && attempt < self.max_attempts {
                        warn!(%status, attempt, "embedding call failed, retrying");
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_else(|_| "<unavailable>".into());
                    return Err(EmbedError::Backend(format!("HTTP {status}: {body}")));
                }
                Err(err) => {
                    if attempt < self.max_attempts {
                        warn!(error = %err, attempt, "embedding transport error, retrying");
                        tokio::time::sleep(self.backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbedError::Backend(err.to_string()));
                }
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server_uri: &str, max_attempts: u32) -> HttpEmbedder {
        HttpEmbedder::new(
            server_uri,
            "test-key",
            "test-model",
            3,
            Duration::from_secs(5),
            max_attempts,
            Duration::from_millis(1),
        )
        .unwrap()
    }

    fn ok_body() -> serde_json::Value {
        serde_json::json!({ "data": [ { "index": 0, "embedding": [0.1, 0.2, 0.3] } ] })
    }

    #[tokio::test]
    async fn embeds_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;

        let vector = embedder(&server.uri(), 3).embed("hello world").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;

        let vector = embedder(&server.uri(), 3).embed("hello").await.unwrap();
        assert_eq!(vector.len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = embedder(&server.uri(), 2).embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbedError::Backend(_)));
    }

    #[tokio::test]
    async fn client_errors_do_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = embedder(&server.uri(), 5).embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbedError::Backend(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_detected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "index": 0, "embedding": [0.1, 0.2] } ]
            })))
            .mount(&server)
            .await;

        let err = embedder(&server.uri(), 1).embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch { expected: 3, got: 2 }
        ));
    }

    #[tokio::test]
    async fn empty_input_is_degenerate_without_a_request() {
        let server = MockServer::start().await;
        // No mocks mounted: any request would 404 and fail differently.
        let err = embedder(&server.uri(), 1).embed("   ").await.unwrap_err();
        assert!(matches!(err, EmbedError::DegenerateInput));
    }
}
