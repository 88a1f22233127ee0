//! Embedding provider trait and the retrying, batching wrapper used by the
//! pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::RagConfig;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Ollama, test doubles)
/// behind a unified async interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use pdfrag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially for each input. Override this method if the backend
    /// supports native batch embedding for better throughput.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Wraps an [`EmbeddingProvider`] with batching, deadlines, retries and
/// output validation.
///
/// - inputs are split into requests of at most `max_batch_size` texts
/// - each request runs under the [`RetryPolicy`]
/// - every response must contain one vector per input, each of the declared
///   dimension, otherwise the call fails
/// - with normalisation on, vectors are scaled to unit length so dot-product
///   search ranks like cosine
pub struct ResilientEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    max_batch_size: usize,
    normalize: bool,
}

impl ResilientEmbedder {
    /// Wrap `inner` with the batching and retry settings from `config`.
    pub fn new(inner: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Self {
        Self {
            inner,
            policy: RetryPolicy::from_config(config),
            max_batch_size: config.embedding_batch_size.max(1),
            normalize: false,
        }
    }

    /// Scale every returned vector to unit length.
    pub fn with_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    async fn embed_request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let inner = &self.inner;
        let vectors = self.policy.run("embed", move || inner.embed_batch(texts)).await?;

        if vectors.len() != texts.len() {
            return Err(RagError::EmbeddingError {
                provider: inner.name().to_string(),
                message: format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
                retryable: false,
            });
        }
        let expected = inner.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::DimensionMismatch { expected, actual: bad.len() });
        }

        Ok(if self.normalize { vectors.into_iter().map(l2_normalize).collect() } else { vectors })
    }
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl EmbeddingProvider for ResilientEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_request(&[text]).await?;
        vectors.pop().ok_or_else(|| RagError::EmbeddingError {
            provider: self.inner.name().to_string(),
            message: "empty response".to_string(),
            retryable: false,
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch_size) {
            debug!(provider = self.inner.name(), batch_size = batch.len(), "embedding batch");
            out.extend(self.embed_request(batch).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}
