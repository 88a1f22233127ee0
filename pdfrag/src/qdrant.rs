//! Qdrant vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStore`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! Qdrant point ids must be integers or UUIDs, so every chunk id is mapped
//! to a UUIDv5 and the chunk id itself is kept in the payload:
//!
//! ```text
//! { chunk_id, text, document_id, page, start_offset, end_offset, metadata: { .. } }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use pdfrag::qdrant::QdrantVectorStore;
//!
//! let store = QdrantVectorStore::new("http://localhost:6334")?;
//! store.create_collection("docs", 768).await?;
//! store.upsert("docs", &chunks).await?;
//! let results = store.search("docs", &query_embedding, 5, None).await?;
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder,
    Distance as QdrantDistance, Filter, PointId, PointStruct, PointsIdsList, SearchPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{Distance, MetadataFilter, VectorStore, last_write_wins, rank_results};

const BACKEND: &str = "qdrant";

/// Namespace for deriving point ids from chunk ids.
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a8e_95d4_4b7e_8c1f_3d2a_7e90_b5c4);

/// The Qdrant point id of a chunk.
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&POINT_NAMESPACE, chunk_id.as_bytes()).to_string()
}

/// A [`VectorStore`] backed by [Qdrant](https://qdrant.tech/).
pub struct QdrantVectorStore {
    client: Qdrant,
    distance: Distance,
}

impl QdrantVectorStore {
    /// Create a new Qdrant vector store connecting to the given URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(|e| unavailable(&e))?;
        Ok(Self::from_client(client))
    }

    /// Connect with a deadline on every request.
    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| unavailable(&e))?;
        Ok(Self::from_client(client))
    }

    /// Create a new Qdrant vector store from an existing client.
    pub fn from_client(client: Qdrant) -> Self {
        Self { client, distance: Distance::Cosine }
    }

    /// Set the metric used when creating collections.
    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    async fn search_points(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        let mut request = SearchPointsBuilder::new(collection, embedding.to_vec(), limit as u64)
            .with_payload(true);
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            request = request.filter(to_filter(filter));
        }

        let response = self.client.search_points(request).await.map_err(map_err(collection))?;
        Ok(response
            .result
            .into_iter()
            .map(|scored| SearchResult {
                chunk: from_payload(&scored.payload),
                score: scored.score,
            })
            .collect())
    }
}

/// Candidates fetched beyond `top_k` on the first search request.
const TIE_HEADROOM: usize = 8;

/// Rank `candidates` (fetched with `limit`) and keep the best `top_k`.
///
/// Returns `None` when the server filled the limit and its lowest score still
/// equals the k-th score: further points with that score may exist, and one
/// of them could have a smaller chunk id.
fn settle(
    candidates: Vec<SearchResult>,
    top_k: usize,
    limit: usize,
) -> Option<Vec<SearchResult>> {
    let exhausted = candidates.len() < limit;
    let mut ranked = rank_results(candidates, usize::MAX);
    if !exhausted && top_k > 0 {
        if let (Some(kth), Some(last)) = (ranked.get(top_k - 1), ranked.last()) {
            if last.score >= kth.score {
                return None;
            }
        }
    }
    ranked.truncate(top_k);
    Some(ranked)
}

fn unavailable(e: &qdrant_client::QdrantError) -> RagError {
    RagError::StoreUnavailable { backend: BACKEND.to_string(), message: e.to_string() }
}

/// Classify a client error by its rendered message.
fn classify(collection: &str, message: String) -> RagError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("doesn't exist") || lower.contains("not found: collection") {
        RagError::CollectionNotFound(collection.to_string())
    } else if lower.contains("wrong input") || lower.contains("invalid argument") {
        RagError::VectorStoreError { backend: BACKEND.to_string(), message }
    } else {
        RagError::StoreUnavailable { backend: BACKEND.to_string(), message }
    }
}

fn map_err(collection: &str) -> impl Fn(qdrant_client::QdrantError) -> RagError + '_ {
    move |e| classify(collection, e.to_string())
}

fn to_payload(chunk: &Chunk) -> Result<Payload> {
    let payload = json!({
        "chunk_id": chunk.id,
        "text": chunk.text,
        "document_id": chunk.document_id,
        "page": chunk.page,
        "start_offset": chunk.start_offset,
        "end_offset": chunk.end_offset,
        "metadata": chunk.metadata,
    });
    Payload::try_from(payload).map_err(|e| RagError::VectorStoreError {
        backend: BACKEND.to_string(),
        message: format!("invalid payload for chunk '{}': {e}", chunk.id),
    })
}

fn payload_string(payload: &HashMap<String, QdrantValue>, key: &str) -> String {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        _ => String::new(),
    }
}

fn payload_usize(payload: &HashMap<String, QdrantValue>, key: &str) -> usize {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => usize::try_from(*n).unwrap_or_default(),
        Some(Kind::DoubleValue(n)) if *n >= 0.0 => *n as usize,
        _ => 0,
    }
}

fn payload_metadata(payload: &HashMap<String, QdrantValue>) -> HashMap<String, String> {
    match payload.get("metadata").and_then(|v| v.kind.as_ref()) {
        Some(Kind::StructValue(s)) => s
            .fields
            .iter()
            .filter_map(|(k, v)| match &v.kind {
                Some(Kind::StringValue(s)) => Some((k.clone(), s.clone())),
                _ => None,
            })
            .collect(),
        _ => HashMap::new(),
    }
}

fn from_payload(payload: &HashMap<String, QdrantValue>) -> Chunk {
    Chunk {
        id: payload_string(payload, "chunk_id"),
        document_id: payload_string(payload, "document_id"),
        page: u32::try_from(payload_usize(payload, "page")).unwrap_or_default(),
        text: payload_string(payload, "text"),
        start_offset: payload_usize(payload, "start_offset"),
        end_offset: payload_usize(payload, "end_offset"),
        embedding: Vec::new(),
        metadata: payload_metadata(payload),
    }
}

fn to_filter(filter: &MetadataFilter) -> Filter {
    Filter::must(
        filter
            .conditions()
            .map(|(k, v)| Condition::matches(format!("metadata.{k}"), v.to_string())),
    )
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let exists = self.client.collection_exists(name).await.map_err(map_err(name))?;
        if exists {
            debug!(collection = name, "qdrant collection already exists, skipping creation");
            return Ok(());
        }

        let distance = match self.distance {
            Distance::Cosine => QdrantDistance::Cosine,
            Distance::Dot => QdrantDistance::Dot,
        };
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, distance)),
            )
            .await
            .map_err(map_err(name))?;

        debug!(collection = name, dimensions, distance = %self.distance, "created qdrant collection");
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.client.delete_collection(name).await.map_err(map_err(name))?;
        debug!(collection = name, "deleted qdrant collection");
        Ok(())
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points = last_write_wins(chunks)
            .into_iter()
            .map(|chunk| {
                Ok(PointStruct::new(point_id(&chunk.id), chunk.embedding.clone(), to_payload(chunk)?))
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .map_err(map_err(collection))?;

        debug!(collection, count = chunks.len(), "upserted chunks to qdrant");
        Ok(())
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<PointId> = ids.iter().map(|id| point_id(id).into()).collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(map_err(collection))?;

        debug!(collection, count = ids.len(), "deleted points from qdrant");
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // Qdrant cuts ties at the limit arbitrarily, so fetch extra candidates
        // and widen until the cutoff score is unambiguous.
        let mut limit = top_k.saturating_add(TIE_HEADROOM);
        loop {
            let candidates = self.search_points(collection, embedding, limit, filter).await?;
            match settle(candidates, top_k, limit) {
                Some(results) => return Ok(results),
                None => {
                    debug!(collection, limit, "scores tie at the cutoff, widening search");
                    limit = limit.saturating_mul(2);
                }
            }
        }
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(collection).exact(true))
            .await
            .map_err(map_err(collection))?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Chunk {
        Chunk {
            id: "manuals/pump.pdf#p3#c1".into(),
            document_id: "manuals/pump.pdf".into(),
            page: 3,
            text: "Prime the pump before use.".into(),
            start_offset: 120,
            end_offset: 146,
            embedding: vec![0.1, 0.2],
            metadata: HashMap::from([("title".to_string(), "Pump".to_string())]),
        }
    }

    #[test]
    fn point_ids_are_stable_uuids() {
        let a = point_id("doc.pdf#p1#c0");
        assert_eq!(a, point_id("doc.pdf#p1#c0"));
        assert_ne!(a, point_id("doc.pdf#p1#c1"));
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 5);
    }

    #[test]
    fn payload_round_trips_chunk_fields() {
        let original = chunk();
        let payload: HashMap<String, QdrantValue> = to_payload(&original).unwrap().into();
        let restored = from_payload(&payload);
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.page, 3);
        assert_eq!((restored.start_offset, restored.end_offset), (120, 146));
        assert_eq!(restored.metadata, original.metadata);
        assert!(restored.embedding.is_empty());
    }

    fn scored(id: &str, score: f32) -> SearchResult {
        SearchResult { chunk: Chunk { id: id.into(), ..chunk() }, score }
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn ties_at_the_cutoff_resolve_by_chunk_id() {
        // The server returned every tied point, in its own order.
        let candidates = vec![scored("b", 0.5), scored("c", 0.5), scored("a", 0.5)];
        let top = settle(candidates, 1, 1 + TIE_HEADROOM).unwrap();
        assert_eq!(ids(&top), ["a"]);
    }

    #[test]
    fn a_full_page_of_ties_asks_for_more() {
        let candidates = vec![scored("x", 0.9), scored("b", 0.5), scored("c", 0.5)];
        assert!(settle(candidates, 2, 3).is_none());

        let candidates = vec![scored("x", 0.9), scored("b", 0.5), scored("c", 0.4)];
        assert_eq!(ids(&settle(candidates, 2, 3).unwrap()), ["x", "b"]);
    }

    #[test]
    fn short_pages_are_final() {
        let candidates = vec![scored("d", 0.7), scored("a", 0.7)];
        assert_eq!(ids(&settle(candidates, 5, 13).unwrap()), ["a", "d"]);
    }

    #[test]
    fn errors_are_classified() {
        assert!(matches!(
            classify("c", "Not found: Collection `c` doesn't exist!".into()),
            RagError::CollectionNotFound(name) if name == "c"
        ));
        assert!(matches!(
            classify("c", "status: InvalidArgument, message: Wrong input: Vector dimension error".into()),
            RagError::VectorStoreError { .. }
        ));
        assert!(classify("c", "transport error: connection refused".into()).is_retryable());
    }
}
