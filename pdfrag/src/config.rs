//! Configuration for the ingestion and retrieval pipeline.
//!
//! [`RagConfig`] holds the tuning knobs of the pipeline itself and is built
//! through a validating builder. [`Settings`] is the full deployment surface
//! (models, endpoints, paths) read from environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::vectorstore::Distance;

/// Configuration parameters for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Similarity metric used by the collection.
    pub distance: Distance,
    /// Maximum number of texts sent in one embedding request.
    pub embedding_batch_size: usize,
    /// Maximum number of embedding requests in flight during ingestion.
    pub max_concurrent_embeddings: usize,
    /// Embedded batches allowed to wait for the upsert stage.
    pub upsert_queue_depth: usize,
    /// Deadline for every external call.
    pub request_timeout: Duration,
    /// Attempts per external call, including the first.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub initial_backoff: Duration,
    /// Consecutive failed embedding batches after which ingestion aborts.
    pub embedding_failure_limit: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 100,
            top_k: 5,
            similarity_threshold: 0.0,
            distance: Distance::Cosine,
            embedding_batch_size: 16,
            max_concurrent_embeddings: 4,
            upsert_queue_depth: 8,
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            embedding_failure_limit: 3,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the similarity metric.
    pub fn distance(mut self, distance: Distance) -> Self {
        self.config.distance = distance;
        self
    }

    /// Set the maximum number of texts per embedding request.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set the number of embedding requests allowed in flight.
    pub fn max_concurrent_embeddings(mut self, n: usize) -> Self {
        self.config.max_concurrent_embeddings = n;
        self
    }

    /// Set the depth of the queue between embedding and upserting.
    pub fn upsert_queue_depth(mut self, depth: usize) -> Self {
        self.config.upsert_queue_depth = depth;
        self
    }

    /// Set the deadline for external calls.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the number of attempts per external call.
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.config.max_retries = attempts;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    /// Set how many consecutive failed embedding batches abort ingestion.
    pub fn embedding_failure_limit(mut self, limit: usize) -> Self {
        self.config.embedding_failure_limit = limit;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - any batch, concurrency, queue, retry or failure limit is zero
    /// - `request_timeout` is zero
    pub fn build(self) -> Result<RagConfig> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        let limits = [
            ("embedding_batch_size", c.embedding_batch_size),
            ("max_concurrent_embeddings", c.max_concurrent_embeddings),
            ("upsert_queue_depth", c.upsert_queue_depth),
            ("max_retries", c.max_retries as usize),
            ("embedding_failure_limit", c.embedding_failure_limit),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(RagError::ConfigError(format!("{name} must be greater than zero")));
        }
        if c.request_timeout.is_zero() {
            return Err(RagError::ConfigError("request_timeout must be non-zero".to_string()));
        }
        Ok(self.config)
    }
}

/// Which vector store backend to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Qdrant over gRPC.
    Qdrant,
    /// Process-local store; contents are lost on exit.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" | "inmemory" | "in-memory" => Ok(Self::Memory),
            other => Err(RagError::ConfigError(format!(
                "unknown vector store backend '{other}' (expected 'qdrant' or 'memory')"
            ))),
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Embedding model name.
    pub model: String,
    /// Declared output dimension of the model.
    pub dimensions: usize,
    /// Base URL of the Ollama server.
    pub base_url: String,
}

/// Vector store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Backend to use.
    pub backend: StoreBackend,
    /// Connection URL; required for [`StoreBackend::Qdrant`].
    pub url: Option<String>,
    /// Collection name.
    pub collection: String,
}

/// Full deployment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Embedding service.
    pub embedding: EmbeddingSettings,
    /// Vector store.
    pub store: StoreSettings,
    /// Language model used by the assistant.
    pub llm_model: String,
    /// Directory scanned during ingestion.
    pub documents_dir: std::path::PathBuf,
    /// Whether subdirectories are scanned too.
    pub recursive: bool,
    /// Conversation storage table name.
    pub session_table: String,
    /// Conversation storage database file.
    pub session_db: String,
    /// Pipeline tuning.
    pub rag: RagConfig,
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] when a required value is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = RagConfig::default();

        let backend = match get("PDFRAG_VECTOR_STORE") {
            Some(v) => v.parse()?,
            None => StoreBackend::Qdrant,
        };
        let url = get("PDFRAG_QDRANT_URL").or_else(|| get("QDRANT_URL_LOCALHOST"));
        if backend == StoreBackend::Qdrant && url.is_none() {
            return Err(RagError::ConfigError(
                "PDFRAG_QDRANT_URL (or QDRANT_URL_LOCALHOST) must be set for the qdrant backend"
                    .to_string(),
            ));
        }

        let rag = RagConfig::builder()
            .chunk_size(parse_or(&get, "PDFRAG_CHUNK_SIZE", defaults.chunk_size)?)
            .chunk_overlap(parse_or(&get, "PDFRAG_CHUNK_OVERLAP", defaults.chunk_overlap)?)
            .top_k(parse_or(&get, "PDFRAG_TOP_K", defaults.top_k)?)
            .similarity_threshold(parse_or(
                &get,
                "PDFRAG_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?)
            .distance(parse_or(&get, "PDFRAG_DISTANCE", defaults.distance)?)
            .embedding_batch_size(parse_or(
                &get,
                "PDFRAG_EMBEDDING_BATCH_SIZE",
                defaults.embedding_batch_size,
            )?)
            .max_concurrent_embeddings(parse_or(
                &get,
                "PDFRAG_MAX_CONCURRENT_EMBEDDINGS",
                defaults.max_concurrent_embeddings,
            )?)
            .upsert_queue_depth(parse_or(
                &get,
                "PDFRAG_UPSERT_QUEUE_DEPTH",
                defaults.upsert_queue_depth,
            )?)
            .request_timeout(Duration::from_secs(parse_or(
                &get,
                "PDFRAG_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?))
            .max_retries(parse_or(&get, "PDFRAG_MAX_RETRIES", defaults.max_retries)?)
            .build()?;

        Ok(Self {
            embedding: EmbeddingSettings {
                model: get("PDFRAG_EMBEDDING_MODEL").unwrap_or_else(|| "nomic-embed-text".into()),
                dimensions: parse_or(&get, "PDFRAG_EMBEDDING_DIMENSIONS", 768)?,
                base_url: get("PDFRAG_OLLAMA_URL")
                    .unwrap_or_else(|| "http://localhost:11434".into()),
            },
            store: StoreSettings {
                backend,
                url,
                collection: get("PDFRAG_COLLECTION").unwrap_or_else(|| "pdf_documents".into()),
            },
            llm_model: get("PDFRAG_LLM_MODEL").unwrap_or_else(|| "llama3.1".into()),
            documents_dir: get("PDFRAG_DOCUMENTS_DIR")
                .unwrap_or_else(|| "./pdf_documents".into())
                .into(),
            recursive: parse_or(&get, "PDFRAG_RECURSIVE", true)?,
            session_table: get("PDFRAG_SESSION_TABLE").unwrap_or_else(|| "pdf_rag".into()),
            session_db: get("PDFRAG_SESSION_DB").unwrap_or_else(|| "pdf_rag_agent.db".into()),
            rag,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| RagError::ConfigError(format!("invalid value '{raw}' for {key}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn builder_rejects_overlap_not_below_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn builder_rejects_zero_limits() {
        assert!(RagConfig::builder().top_k(0).build().is_err());
        assert!(RagConfig::builder().max_concurrent_embeddings(0).build().is_err());
        assert!(RagConfig::builder().embedding_batch_size(0).build().is_err());
        assert!(RagConfig::builder().max_retries(0).build().is_err());
        assert!(RagConfig::builder().request_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let built = RagConfig::builder().build().unwrap();
        assert_eq!(built, RagConfig::default());
    }

    #[test]
    fn missing_qdrant_url_fails_fast() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("QDRANT")));
    }

    #[test]
    fn legacy_qdrant_variable_is_honoured() {
        let settings =
            Settings::from_lookup(lookup(&[("QDRANT_URL_LOCALHOST", "http://qdrant:6334")]))
                .unwrap();
        assert_eq!(settings.store.url.as_deref(), Some("http://qdrant:6334"));
        assert_eq!(settings.store.collection, "pdf_documents");
        assert_eq!(settings.embedding.model, "nomic-embed-text");
        assert_eq!(settings.llm_model, "llama3.1");
        assert!(settings.recursive);
    }

    #[test]
    fn memory_backend_needs_no_url() {
        let settings = Settings::from_lookup(lookup(&[
            ("PDFRAG_VECTOR_STORE", "memory"),
            ("PDFRAG_CHUNK_SIZE", "500"),
            ("PDFRAG_CHUNK_OVERLAP", "50"),
            ("PDFRAG_DISTANCE", "dot"),
            ("PDFRAG_RECURSIVE", "false"),
            ("PDFRAG_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        assert_eq!(settings.rag.chunk_size, 500);
        assert_eq!(settings.rag.chunk_overlap, 50);
        assert_eq!(settings.rag.distance, Distance::Dot);
        assert_eq!(settings.rag.request_timeout, Duration::from_secs(5));
        assert!(!settings.recursive);
    }

    #[test]
    fn unparsable_values_are_config_errors() {
        let err = Settings::from_lookup(lookup(&[
            ("PDFRAG_VECTOR_STORE", "memory"),
            ("PDFRAG_TOP_K", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RagError::ConfigError(msg) if msg.contains("PDFRAG_TOP_K")));
    }
}
