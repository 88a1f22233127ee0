//! In-memory vector store.
//!
//! This module provides [`InMemoryVectorStore`], a dependency-free vector store
//! backed by a `HashMap` protected by a `tokio::sync::RwLock`. It is suitable
//! for development, testing, and small knowledge bases that are re-ingested
//! on every start.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{Distance, MetadataFilter, VectorStore, last_write_wins, rank_results};

const BACKEND: &str = "memory";

#[derive(Debug)]
struct StoredChunk {
    chunk: Chunk,
    /// Store-wide sequence number of the write that produced this record.
    seq: u64,
}

#[derive(Debug, Default)]
struct Collection {
    dimensions: usize,
    records: HashMap<String, StoredChunk>,
}

/// An in-memory vector store.
///
/// Collections are stored as nested `HashMap`s: collection name → chunk ID → chunk.
/// Every upsert takes a sequence number from a store-wide counter while holding
/// the write lock, so concurrent upserts of the same id resolve last-write-wins
/// in sequence order.
///
/// # Example
///
/// ```rust,ignore
/// use pdfrag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 768).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    distance: Distance,
    collections: RwLock<HashMap<String, Collection>>,
    sequence: AtomicU64,
}

impl InMemoryVectorStore {
    /// Create a new empty store using cosine similarity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty store using the given metric.
    pub fn with_distance(distance: Distance) -> Self {
        Self { distance, ..Self::default() }
    }

    /// Sequence number of the write that last replaced `id`, if present.
    pub async fn record_sequence(&self, collection: &str, id: &str) -> Option<u64> {
        let collections = self.collections.read().await;
        collections.get(collection)?.records.get(id).map(|r| r.seq)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| Collection { dimensions, records: HashMap::new() });
        if collection.dimensions != dimensions {
            return Err(RagError::DimensionMismatch {
                expected: collection.dimensions,
                actual: dimensions,
            });
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name);
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;

        let survivors = last_write_wins(chunks);
        if let Some(bad) = survivors.iter().find(|c| c.embedding.len() != store.dimensions) {
            return Err(RagError::DimensionMismatch {
                expected: store.dimensions,
                actual: bad.embedding.len(),
            });
        }

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        for chunk in survivors {
            store.records.insert(chunk.id.clone(), StoredChunk { chunk: chunk.clone(), seq });
        }
        debug!(collection, count = chunks.len(), seq, "upserted chunks in memory");
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        for id in ids {
            store.records.remove(*id);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.read().await;
        let store = collections
            .get(collection)
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))?;
        if !store.records.is_empty() && embedding.len() != store.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: store.dimensions,
                actual: embedding.len(),
            });
        }

        let scored: Vec<SearchResult> = store
            .records
            .values()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.chunk.metadata)))
            .map(|r| SearchResult {
                score: self.distance.similarity(&r.chunk.embedding, embedding),
                chunk: r.chunk.clone(),
            })
            .collect();

        Ok(rank_results(scored, top_k))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.records.len())
            .ok_or_else(|| RagError::CollectionNotFound(collection.to_string()))
    }
}
