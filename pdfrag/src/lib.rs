//! # pdfrag
//!
//! Ingestion and retrieval pipeline for a PDF knowledge base.
//!
//! Documents are loaded from a directory, split per page into bounded
//! chunks, embedded through an external model and upserted into a vector
//! store. Queries are embedded the same way and answered with ranked,
//! citable passages.
//!
//! ## Features
//!
//! - `ollama` (default): [`OllamaEmbeddingProvider`](ollama::OllamaEmbeddingProvider)
//! - `qdrant` (default): [`QdrantVectorStore`](qdrant::QdrantVectorStore)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pdfrag::{CancellationToken, IngestionPipeline, InMemoryVectorStore, RagConfig, Retriever};
//! use pdfrag::ollama::OllamaEmbeddingProvider;
//!
//! let config = RagConfig::default();
//! let embedder = Arc::new(OllamaEmbeddingProvider::new());
//! let store = Arc::new(InMemoryVectorStore::new());
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(config.clone())
//!     .embedding_provider(embedder.clone())
//!     .vector_store(store.clone())
//!     .collection("pdf_documents")
//!     .build()?;
//! pipeline.ingest_directory("./pdf_documents", &CancellationToken::new()).await?;
//!
//! let retriever = Retriever::new(embedder, store, "pdf_documents", config);
//! let passages = retriever.retrieve("How do I reset the device?", 5).await?;
//! ```

pub mod agent;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod loader;
pub mod pipeline;
pub mod retrieval;
pub mod retry;
pub mod tool;
pub mod vectorstore;

#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use agent::{AssistantProfile, Capabilities, SessionStorage};
pub use chunking::{Chunker, FixedSizeChunker, PageChunker};
pub use config::{RagConfig, RagConfigBuilder, Settings, StoreBackend};
pub use document::{Chunk, Document, Page, SearchResult};
pub use embedding::{EmbeddingProvider, ResilientEmbedder};
pub use error::{RagError, Result};
pub use inmemory::InMemoryVectorStore;
pub use loader::{DirectoryLoader, DocumentIter, FileKind};
pub use pipeline::{
    IngestFailure, IngestStage, IngestState, IngestionPipeline, IngestionPipelineBuilder,
    IngestionSummary,
};
pub use retrieval::{INSUFFICIENT_INFORMATION, KnowledgeLookup, Retriever};
pub use retry::{CancellationToken, RetryPolicy};
pub use tool::KnowledgeSearchTool;
pub use vectorstore::{Distance, MetadataFilter, VectorStore};
