//! Vector store trait for storing and searching vector embeddings.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};

/// Similarity metric of a collection.
///
/// `Dot` only ranks like cosine when the embedder emits unit-length vectors,
/// so pair it with a normalising [`ResilientEmbedder`](crate::ResilientEmbedder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    /// Cosine similarity.
    #[default]
    Cosine,
    /// Raw dot product.
    Dot,
}

impl Distance {
    /// Score two vectors; higher is more similar.
    pub fn similarity(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cosine => "cosine",
            Self::Dot => "dot",
        })
    }
}

impl FromStr for Distance {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" | "dot_product" | "dotproduct" => Ok(Self::Dot),
            other => Err(RagError::ConfigError(format!(
                "unknown distance '{other}' (expected 'cosine' or 'dot')"
            ))),
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Conjunction of metadata equality conditions applied during search.
///
/// ```rust,ignore
/// let filter = MetadataFilter::new().document("manuals/pump.pdf").page(3);
/// let results = store.search("docs", &query, 5, Some(&filter)).await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// An empty filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `metadata[key] == value`.
    pub fn where_eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// Restrict to chunks of one document.
    pub fn document(self, document_id: impl Into<String>) -> Self {
        self.where_eq(crate::document::META_DOCUMENT_ID, document_id)
    }

    /// Restrict to chunks of one page.
    pub fn page(self, page: u32) -> Self {
        self.where_eq(crate::document::META_PAGE, page.to_string())
    }

    /// The conditions, ordered by key.
    pub fn conditions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether `metadata` satisfies every condition.
    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        self.conditions.iter().all(|(k, v)| metadata.get(k) == Some(v))
    }
}

/// Order results by descending score, breaking ties by chunk id ascending,
/// then keep the first `top_k`.
pub fn rank_results(mut results: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    results.truncate(top_k);
    results
}

/// Collapse duplicate ids within one upsert call, keeping the last occurrence
/// and the original relative order of survivors.
pub fn last_write_wins(chunks: &[Chunk]) -> Vec<&Chunk> {
    let mut last: HashMap<&str, usize> = HashMap::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        last.insert(chunk.id.as_str(), i);
    }
    chunks.iter().enumerate().filter(|(i, c)| last[c.id.as_str()] == *i).map(|(_, c)| c).collect()
}

/// A storage backend for vector embeddings with similarity search.
///
/// Implementations manage named collections of [`Chunk`]s and support
/// upserting, deleting, and searching by vector similarity.
///
/// # Example
///
/// ```rust,ignore
/// use pdfrag::{VectorStore, InMemoryVectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 768).await?;
/// store.upsert("docs", &chunks).await?;
/// let results = store.search("docs", &query_embedding, 5, None).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn backend(&self) -> &str;

    /// Create a named collection. No-op if it already exists.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()>;

    /// Delete a named collection and all its data.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Insert or replace chunks keyed by chunk id. Chunks must have embeddings set.
    ///
    /// When the same id appears more than once, the last occurrence wins.
    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()>;

    /// Delete chunks by their IDs from a collection.
    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()>;

    /// Search for the `top_k` most similar chunks to the given embedding.
    ///
    /// Returns results ordered by descending similarity score, ties broken by
    /// chunk id ascending.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Number of records in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}
