//! Query-time retrieval over an ingested collection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::embedding::{EmbeddingProvider, ResilientEmbedder};
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;
use crate::vectorstore::{Distance, MetadataFilter, VectorStore};

/// Reply the assistant gives when the knowledge base has nothing relevant.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have sufficient information about this in my PDF knowledge base.";

/// Outcome of a retrieval that must not fail.
#[derive(Debug, Clone)]
pub enum KnowledgeLookup {
    /// Relevant passages, best first.
    Passages(Vec<SearchResult>),
    /// The collection is empty, missing, or nothing passed the threshold.
    NoRelevantInformation,
    /// The embedder or the vector store could not be reached.
    Unavailable {
        /// Rendered cause.
        reason: String,
    },
}

/// Embeds queries and searches one collection.
///
/// A retriever owns its store handle. Build it from a different handle than
/// the ingestion pipeline's so that long upserts never queue in front of
/// live queries.
///
/// ```rust,ignore
/// let retriever = Retriever::new(embedder, store, "pdf_documents", RagConfig::default());
/// for hit in retriever.retrieve("warranty period", 5).await? {
///     println!("{} p.{} ({:.3})", hit.chunk.document_id, hit.chunk.page, hit.score);
/// }
/// ```
pub struct Retriever {
    embedder: ResilientEmbedder,
    store: Arc<dyn VectorStore>,
    collection: String,
    config: RagConfig,
    policy: RetryPolicy,
}

impl Retriever {
    /// Create a retriever. The provider is wrapped with the retry settings
    /// of `config`, normalising vectors for [`Distance::Dot`].
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        config: RagConfig,
    ) -> Self {
        let embedder = ResilientEmbedder::new(provider, &config)
            .with_normalization(config.distance == Distance::Dot);
        Self {
            embedder,
            store,
            collection: collection.into(),
            policy: RetryPolicy::from_config(&config),
            config,
        }
    }

    /// The searched collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The `top_k` passages most similar to `query`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::RetrievalUnavailable`] when the store cannot be
    /// reached after retries, or the embedder's error when the query cannot
    /// be embedded.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.retrieve_filtered(query, top_k, None).await
    }

    /// As [`retrieve`](Self::retrieve), restricted to chunks whose metadata
    /// matches `filter`.
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || top_k == 0 {
            debug!(collection = %self.collection, "empty query or top_k, nothing to retrieve");
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;

        let (store, collection, vector) = (&self.store, self.collection.as_str(), &embedding);
        let searched = self
            .policy
            .run("search", move || store.search(collection, vector, top_k, filter))
            .await;

        let results = match searched {
            Ok(results) => results,
            Err(RagError::CollectionNotFound(_)) => {
                debug!(collection, "collection does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) if e.is_retryable() => {
                warn!(collection, error = %e, "vector store unavailable");
                return Err(RagError::RetrievalUnavailable(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let threshold = self.config.similarity_threshold;
        let mut filtered: Vec<SearchResult> =
            results.into_iter().filter(|r| r.score >= threshold).collect();
        filtered.truncate(top_k);

        info!(collection, top_k, result_count = filtered.len(), "retrieval completed");
        Ok(filtered)
    }

    /// Retrieve without failing: errors become [`KnowledgeLookup::Unavailable`].
    pub async fn lookup(&self, query: &str, top_k: usize) -> KnowledgeLookup {
        match self.retrieve(query, top_k).await {
            Ok(results) if results.is_empty() => KnowledgeLookup::NoRelevantInformation,
            Ok(results) => KnowledgeLookup::Passages(results),
            Err(e) => {
                warn!(collection = %self.collection, error = %e, "knowledge lookup degraded");
                KnowledgeLookup::Unavailable { reason: e.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::document::Chunk;
    use crate::inmemory::InMemoryVectorStore;

    /// Maps "north"/"east" to axis vectors.
    struct Compass;

    #[async_trait]
    impl EmbeddingProvider for Compass {
        fn name(&self) -> &str {
            "compass"
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("north") { vec![0.0, 1.0] } else { vec![1.0, 0.0] })
        }
        fn dimensions(&self) -> usize {
            2
        }
    }

    fn chunk(id: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "map.pdf".into(),
            page: 1,
            text: id.to_string(),
            start_offset: 0,
            end_offset: id.len(),
            embedding,
            metadata: Default::default(),
        }
    }

    fn config() -> RagConfig {
        RagConfig::builder().similarity_threshold(0.5).build().unwrap()
    }

    #[tokio::test]
    async fn missing_collection_is_empty_not_an_error() {
        let store = Arc::new(InMemoryVectorStore::new());
        let retriever = Retriever::new(Arc::new(Compass), store, "nope", config());
        assert!(retriever.retrieve("north", 3).await.unwrap().is_empty());
        assert!(matches!(retriever.lookup("north", 3).await, KnowledgeLookup::NoRelevantInformation));
    }

    #[tokio::test]
    async fn threshold_drops_weak_matches() {
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert("c", &[chunk("north-pole", vec![0.0, 1.0]), chunk("east-coast", vec![1.0, 0.0])])
            .await
            .unwrap();

        let retriever = Retriever::new(Arc::new(Compass), store, "c", config());
        let results = retriever.retrieve("go north", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "north-pole");

        match retriever.lookup("go north", 5).await {
            KnowledgeLookup::Passages(p) => assert_eq!(p.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let retriever =
            Retriever::new(Arc::new(Compass), Arc::new(InMemoryVectorStore::new()), "c", config());
        assert!(retriever.retrieve("   ", 5).await.unwrap().is_empty());
        assert!(retriever.retrieve("north", 0).await.unwrap().is_empty());
    }
}
