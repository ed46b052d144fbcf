//! HTTP client for the Core sync API.
//!
//! Three endpoints: batch embedding upsert, node existence check, and
//! node deletion. The client maps failures onto the retryable /
//! non-retryable split ([`SyncError::Transport`] vs
//! [`SyncError::Validation`]); retry policy itself lives in the
//! orchestrator and the store's retry counters.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use crate::config::CoreConfig;
use crate::payload::EmbeddingPayload;
use crate::types::SyncError;

const API_KEY_HEADER: &str = "X-API-Key";

/// Delivery mode tag sent with every batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Routine delta delivery of unsynced embeddings.
    Incremental,
    /// Operator-initiated resend of the entire corpus.
    Full,
}

#[derive(Serialize)]
struct PushRequest<'a> {
    embeddings: &'a [EmbeddingPayload],
    sync_type: SyncType,
}

#[derive(Deserialize, Default)]
struct PushResponse {
    #[serde(default)]
    node_ids: Vec<String>,
    #[serde(default)]
    errors: Vec<PushItemError>,
}

/// Item-wise rejection reported inside an otherwise successful batch.
#[derive(Deserialize)]
struct PushItemError {
    #[serde(default)]
    id: String,
    #[serde(default)]
    error: String,
}

/// Outcome of one accepted batch: node ids in payload order, plus the
/// payload ids Core rejected item-wise and why.
#[derive(Clone, Debug, Default)]
pub struct PushResult {
    pub node_ids: Vec<String>,
    pub rejected: HashMap<String, String>,
}

/// Client for Core's `/api/v1/sync` endpoints.
#[derive(Clone, Debug)]
pub struct CoreClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl CoreClient {
    pub fn new(config: &CoreConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    /// Deliver a batch of embedding payloads.
    ///
    /// Returns Core's node ids in payload order plus any item-wise
    /// rejections the 200 response carries. When the response omits
    /// node ids (older Core versions), each payload's own id stands in,
    /// which matches how Core keys the node on upsert.
    #[instrument(skip(self, payloads), fields(batch = payloads.len(), sync_type = ?sync_type))]
    pub async fn push_embeddings(
        &self,
        payloads: &[EmbeddingPayload],
        sync_type: SyncType,
    ) -> Result<PushResult, SyncError> {
        if payloads.is_empty() {
            return Ok(PushResult::default());
        }
        let url = self.endpoint("api/v1/sync/embeddings")?;
        let request = PushRequest {
            embeddings: payloads,
            sync_type,
        };
        let mut builder = self.client.post(url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.header(API_KEY_HEADER, &self.api_key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Validation {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(SyncError::Transport(format!("HTTP {status}")));
        }

        let body: PushResponse = response.json().await.unwrap_or_default();
        let mut node_ids = body.node_ids;
        if node_ids.len() != payloads.len() {
            node_ids = payloads.iter().map(|p| p.id.clone()).collect();
        }
        let rejected = body
            .errors
            .into_iter()
            .filter(|e| !e.id.is_empty())
            .map(|e| (e.id, e.error))
            .collect();
        Ok(PushResult { node_ids, rejected })
    }

    /// Whether a node exists on Core. `Ok(false)` is a definite 404;
    /// transport failures stay errors so verification never reports a
    /// flaky connection as a missing node.
    #[instrument(skip(self))]
    pub async fn verify_node(&self, node_id: &str) -> Result<bool, SyncError> {
        let url = self.endpoint(&format!("api/v1/sync/node/{node_id}"))?;
        let mut builder = self.client.get(url);
        if !self.api_key.is_empty() {
            builder = builder.header(API_KEY_HEADER, &self.api_key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_client_error() => Err(SyncError::Validation {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
            status => Err(SyncError::Transport(format!("HTTP {status}"))),
        }
    }

    /// Delete a node from Core. Deleting an already-absent node is
    /// success; cleanup passes must be re-runnable.
    #[instrument(skip(self))]
    pub async fn delete_node(&self, node_id: &str) -> Result<(), SyncError> {
        let url = self.endpoint(&format!("api/v1/sync/node/{node_id}"))?;
        let mut builder = self.client.delete(url);
        if !self.api_key.is_empty() {
            builder = builder.header(API_KEY_HEADER, &self.api_key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_client_error() => Err(SyncError::Validation {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
            status => Err(SyncError::Transport(format!("HTTP {status}"))),
        }
    }
}
