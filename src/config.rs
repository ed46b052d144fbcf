//! Pipeline and Core-connection configuration.
//!
//! Configuration is resolved once (environment variables via `dotenvy`,
//! falling back to defaults) and passed explicitly into constructors so
//! tests can inject fakes. Nothing in this crate reads process globals
//! after construction.

use url::Url;

use crate::types::PipelineError;

/// Connection settings for the external Core vector-search system.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Base URL, e.g. `http://localhost:7001`.
    pub base_url: Url,
    /// Sent as `X-API-Key` when non-empty.
    pub api_key: String,
    /// Per-request timeout in seconds. A timed-out request is a
    /// retryable failure.
    pub request_timeout_secs: u64,
    /// Embeddings per sync batch.
    pub sync_batch_size: usize,
    /// Retry budget before an embedding is parked as `Failed`.
    pub max_retries: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("http://localhost:7001").expect("static URL parses"),
            api_key: String::new(),
            request_timeout_secs: 60,
            sync_batch_size: 100,
            max_retries: 3,
        }
    }
}

impl CoreConfig {
    /// Resolve from the environment, falling back to defaults.
    ///
    /// Recognized variables: `CORE_BASE_URL`, `CORE_API_KEY`,
    /// `CORE_SYNC_BATCH_SIZE`, `CORE_MAX_RETRIES`, `CORE_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("CORE_BASE_URL") {
            config.base_url = Url::parse(&raw)
                .map_err(|e| PipelineError::Config(format!("CORE_BASE_URL: {e}")))?;
        }
        if let Ok(key) = std::env::var("CORE_API_KEY") {
            config.api_key = key;
        }
        if let Some(n) = env_usize("CORE_SYNC_BATCH_SIZE")? {
            config.sync_batch_size = n.max(1);
        }
        if let Some(n) = env_usize("CORE_MAX_RETRIES")? {
            config.max_retries = n as u32;
        }
        if let Some(n) = env_usize("CORE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = n.max(1) as u64;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }
}

/// Chunking and embedding settings for the ingestion side of the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Embedding model identifier, e.g. `intfloat/multilingual-e5-large`.
    pub model_id: String,
    /// Expected embedding vector dimension.
    pub dimension: usize,
    /// Chunk budget in tokens.
    pub chunk_size_tokens: usize,
    /// Overlap carried between consecutive chunks, in tokens.
    pub overlap_tokens: usize,
    /// Texts per embedding-model request.
    pub embed_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_id: "intfloat/multilingual-e5-large".to_string(),
            dimension: 1024,
            chunk_size_tokens: 1000,
            overlap_tokens: 100,
            embed_batch_size: 32,
        }
    }
}

impl PipelineConfig {
    /// Resolve from the environment, falling back to defaults.
    ///
    /// Recognized variables: `EMBEDDING_MODEL_ID`, `EMBEDDING_DIMENSION`,
    /// `DEFAULT_CHUNK_SIZE`, `DEFAULT_CHUNK_OVERLAP`, `EMBED_BATCH_SIZE`.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(model) = std::env::var("EMBEDDING_MODEL_ID") {
            if !model.is_empty() {
                config.model_id = model;
            }
        }
        if let Some(n) = env_usize("EMBEDDING_DIMENSION")? {
            config.dimension = n;
        }
        if let Some(n) = env_usize("DEFAULT_CHUNK_SIZE")? {
            config.chunk_size_tokens = n;
        }
        if let Some(n) = env_usize("DEFAULT_CHUNK_OVERLAP")? {
            config.overlap_tokens = n;
        }
        if let Some(n) = env_usize("EMBED_BATCH_SIZE")? {
            config.embed_batch_size = n.max(1);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>, dimension: usize) -> Self {
        self.model_id = model_id.into();
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, chunk_size_tokens: usize, overlap_tokens: usize) -> Self {
        self.chunk_size_tokens = chunk_size_tokens;
        self.overlap_tokens = overlap_tokens;
        self
    }
}

fn env_usize(name: &str) -> Result<Option<usize>, PipelineError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|e| PipelineError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let core = CoreConfig::default();
        assert_eq!(core.sync_batch_size, 100);
        assert_eq!(core.max_retries, 3);

        let pipeline = PipelineConfig::default();
        assert!(pipeline.overlap_tokens < pipeline.chunk_size_tokens);
    }

    #[test]
    fn builders_override_fields() {
        let config = PipelineConfig::default()
            .with_model("test-model", 8)
            .with_chunking(10, 3);
        assert_eq!(config.model_id, "test-model");
        assert_eq!(config.dimension, 8);
        assert_eq!(config.chunk_size_tokens, 10);
        assert_eq!(config.overlap_tokens, 3);
    }
}
