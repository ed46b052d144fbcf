//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the seam between the pipeline and whatever
//! model backend serves vectors. The HTTP provider talks to an inference
//! service; the mock provider produces deterministic vectors for tests
//! and CI. Providers are order-preserving and must return exactly one
//! vector per input, so a backend hiccup can never silently drop chunks.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use crate::types::EmbedError;

/// Maps batches of texts to fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Identifier of the model behind this provider.
    fn model_id(&self) -> &str;

    /// Vector dimension this provider produces.
    fn dimension(&self) -> usize;
}

/// Validate a backend response against the input batch.
fn check_batch(
    texts: &[String],
    vectors: Vec<Vec<f32>>,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if vectors.len() != texts.len() {
        return Err(EmbedError::BatchMismatch {
            expected: texts.len(),
            got: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(EmbedError::DimensionMismatch {
            expected: dimension,
            got: bad.len(),
        });
    }
    Ok(vectors)
}

/// Deterministic hash-seeded provider for tests and offline runs.
///
/// Identical text always yields an identical unit-norm vector; different
/// texts diverge with overwhelming probability.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    model_id: String,
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            model_id: "mock-embedder".to_string(),
            dimension,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while vector.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            for pair in hasher.finalize().chunks(2) {
                if vector.len() == self.dimension {
                    break;
                }
                let raw = u16::from_le_bytes([pair[0], pair[1]]) as f32;
                vector.push(raw / u16::MAX as f32 - 0.5);
            }
            counter += 1;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Provider backed by an HTTP inference service.
///
/// Expects `POST {base_url}/embed` with `{"model", "input"}` and a
/// `{"embeddings": [[..], ..]}` response. Any transport or decode
/// failure is surfaced as [`EmbedError::ModelUnavailable`], which is
/// retryable at the task level.
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: Url,
    model_id: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: Url,
        model_id: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let model_id = model_id.into();
        let endpoint = base_url
            .join("embed")
            .map_err(|e| EmbedError::ModelUnavailable {
                model_id: model_id.clone(),
                reason: format!("invalid endpoint: {e}"),
            })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::ModelUnavailable {
                model_id: model_id.clone(),
                reason: format!("http client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint,
            model_id,
            dimension,
        })
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> EmbedError {
        EmbedError::ModelUnavailable {
            model_id: self.model_id.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    #[instrument(skip(self, texts), fields(model = %self.model_id, batch = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbedRequest {
            model: &self.model_id,
            input: texts,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        if !response.status().is_success() {
            return Err(self.unavailable(format!("HTTP {}", response.status())));
        }
        let body: EmbedResponse = response.json().await.map_err(|e| self.unavailable(e))?;
        check_batch(texts, body.embeddings, self.dimension)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
