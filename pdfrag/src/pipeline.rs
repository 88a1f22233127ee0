//! Ingestion pipeline orchestrator.
//!
//! The [`IngestionPipeline`] runs load → chunk → embed → upsert over a
//! directory (or a set of pre-loaded documents) and reports an
//! [`IngestionSummary`].
//!
//! Stages overlap. Loading runs on the blocking pool and streams documents
//! to the chunker; chunks are grouped into embedding batches issued
//! concurrently up to `max_concurrent_embeddings`; embedded batches go
//! through a bounded queue (`upsert_queue_depth`) to a dedicated upsert task.
//! A full queue stops new embedding calls until the store catches up.
//!
//! # Example
//!
//! ```rust,ignore
//! use pdfrag::{CancellationToken, IngestionPipeline, InMemoryVectorStore, RagConfig};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .collection("pdf_documents")
//!     .build()?;
//!
//! let summary = pipeline.ingest_directory("./pdf_documents", &CancellationToken::new()).await?;
//! println!("{} chunks upserted", summary.chunks_upserted);
//! ```

use std::fmt;
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::chunking::{Chunker, PageChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::embedding::{EmbeddingProvider, ResilientEmbedder};
use crate::error::{RagError, Result};
use crate::loader::DirectoryLoader;
use crate::retry::{CancellationToken, RetryPolicy};
use crate::vectorstore::{Distance, VectorStore};

/// A stage of an ingestion run, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    /// Reading files and extracting text.
    Loading,
    /// Splitting documents into chunks.
    Chunking,
    /// Calling the embedding service.
    Embedding,
    /// Writing to the vector store.
    Upserting,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Upserting => "upserting",
        })
    }
}

/// Observable state of an [`IngestionPipeline`].
///
/// A run moves `Idle → Running(Loading) → Running(Chunking) →
/// Running(Embedding) → Running(Upserting) → Idle`. The running stage is the
/// furthest stage any data has reached so far; it never moves backwards
/// within a run. An aborted run ends in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IngestState {
    /// No run in progress.
    #[default]
    Idle,
    /// A run is in progress.
    Running(IngestStage),
    /// The last run aborted.
    Failed {
        /// The stage that failed.
        stage: IngestStage,
        /// Rendered cause.
        cause: String,
    },
}

/// One item that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    /// The file path or the document ids the failed item came from.
    pub source: String,
    /// Where it failed.
    pub stage: IngestStage,
    /// Rendered error.
    pub message: String,
}

/// Counts reported at the end of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestionSummary {
    /// Documents read and chunked.
    pub documents_loaded: usize,
    /// Files that could not be read or parsed.
    pub documents_failed: usize,
    /// Chunks produced by the chunker.
    pub chunks_produced: usize,
    /// Chunks committed to the vector store.
    pub chunks_upserted: usize,
    /// Chunks dropped because their embedding batch failed.
    pub chunks_failed: usize,
    /// Embedding batches that failed after retries.
    pub embedding_batches_failed: usize,
    /// Embedded chunks left unwritten because the run was cancelled.
    pub chunks_cancelled: usize,
    /// Whether the run stopped early on request.
    pub cancelled: bool,
    /// Every skipped file and failed batch.
    pub failures: Vec<IngestFailure>,
}

impl IngestionSummary {
    /// Files seen by the loader, successful or not.
    pub fn documents_discovered(&self) -> usize {
        self.documents_loaded + self.documents_failed
    }
}

#[derive(Clone)]
struct StateTracker(Arc<watch::Sender<IngestState>>);

impl StateTracker {
    fn new() -> Self {
        Self(Arc::new(watch::Sender::new(IngestState::Idle)))
    }

    fn set(&self, state: IngestState) {
        self.0.send_replace(state);
    }

    fn advance(&self, stage: IngestStage) {
        self.0.send_if_modified(|state| {
            let forward = matches!(state, IngestState::Running(current) if *current < stage);
            if forward {
                *state = IngestState::Running(stage);
            }
            forward
        });
    }
}

#[derive(Default)]
struct LoadStats {
    documents_loaded: usize,
    documents_failed: usize,
    chunks_produced: usize,
    failures: Vec<IngestFailure>,
}

#[derive(Default)]
struct EmbedStats {
    chunks_failed: usize,
    batches_failed: usize,
    failures: Vec<IngestFailure>,
    abort: Option<RagError>,
}

/// Loads, chunks, embeds and upserts documents into one collection.
///
/// Construct via [`IngestionPipeline::builder()`]. Runs on one pipeline are
/// serialised; concurrent calls wait for the previous run to finish.
pub struct IngestionPipeline {
    config: RagConfig,
    loader: DirectoryLoader,
    chunker: Arc<dyn Chunker>,
    embedder: ResilientEmbedder,
    store: Arc<dyn VectorStore>,
    collection: String,
    store_policy: RetryPolicy,
    state: StateTracker,
    run_lock: Mutex<()>,
}

impl IngestionPipeline {
    /// Create a new [`IngestionPipelineBuilder`].
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The collection this pipeline writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<IngestState> {
        self.state.0.subscribe()
    }

    /// Ingest every supported file under `dir`.
    ///
    /// Files that fail to load, and embedding batches that fail after
    /// retries, are skipped and listed in the summary.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IngestionFailed`] when `dir` cannot be opened, when
    /// the vector store stays unavailable after retries, or when
    /// `embedding_failure_limit` consecutive embedding batches fail. Upserts
    /// committed before the failure remain in the store.
    pub async fn ingest_directory(
        &self,
        dir: impl AsRef<Path>,
        token: &CancellationToken,
    ) -> Result<IngestionSummary> {
        let _run = self.run_lock.lock().await;
        self.state.set(IngestState::Running(IngestStage::Loading));

        let dir = dir.as_ref().to_path_buf();
        info!(dir = %dir.display(), collection = %self.collection, "starting directory ingestion");

        let loader = self.loader.clone();
        let opened = tokio::task::spawn_blocking(move || loader.load(dir))
            .await
            .map_err(|e| RagError::PipelineError(format!("loader task failed: {e}")))?;
        let documents = match opened {
            Ok(documents) => documents,
            Err(e) => return Err(self.fail(IngestStage::Loading, e, IngestionSummary::default())),
        };

        let (tx, rx) = mpsc::channel(1);
        let loading_token = token.clone();
        tokio::task::spawn_blocking(move || {
            for item in documents {
                if loading_token.is_cancelled() || tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });
        let documents =
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });

        self.run(documents.boxed(), token).await
    }

    /// Ingest documents that were loaded elsewhere.
    ///
    /// # Errors
    ///
    /// As [`ingest_directory`](Self::ingest_directory), except that loading
    /// cannot fail.
    pub async fn ingest_documents(
        &self,
        documents: Vec<Document>,
        token: &CancellationToken,
    ) -> Result<IngestionSummary> {
        let _run = self.run_lock.lock().await;
        self.state.set(IngestState::Running(IngestStage::Loading));
        info!(documents = documents.len(), collection = %self.collection, "starting ingestion");
        self.run(stream::iter(documents.into_iter().map(Ok)).boxed(), token).await
    }

    async fn run(
        &self,
        documents: BoxStream<'static, Result<Document>>,
        token: &CancellationToken,
    ) -> Result<IngestionSummary> {
        let span = info_span!("ingest", collection = %self.collection);
        async move {
            let dimensions = self.embedder.dimensions();
            let created = self
                .store_policy
                .run("create_collection", || {
                    self.store.create_collection(&self.collection, dimensions)
                })
                .await;
            if let Err(e) = created {
                return Err(self.fail(IngestStage::Upserting, e, IngestionSummary::default()));
            }

            let (batch_tx, batch_rx) = mpsc::channel(self.config.max_concurrent_embeddings);
            let (upsert_tx, upsert_rx) = mpsc::channel(self.config.upsert_queue_depth);
            let upserter = tokio::spawn(
                upsert_loop(
                    Arc::clone(&self.store),
                    self.collection.clone(),
                    self.store_policy,
                    upsert_rx,
                    self.state.clone(),
                    token.clone(),
                )
                .in_current_span(),
            );

            let (loaded, embedded) = tokio::join!(
                self.produce(documents, batch_tx, token),
                self.embed(batch_rx, upsert_tx, token),
            );
            let upserted = upserter.await;

            let mut summary = IngestionSummary {
                documents_loaded: loaded.documents_loaded,
                documents_failed: loaded.documents_failed,
                chunks_produced: loaded.chunks_produced,
                chunks_failed: embedded.chunks_failed,
                embedding_batches_failed: embedded.batches_failed,
                cancelled: token.is_cancelled(),
                failures: loaded.failures,
                ..Default::default()
            };
            summary.failures.extend(embedded.failures);

            let outcome = upserted.unwrap_or_else(|e| UpsertOutcome {
                error: Some(RagError::PipelineError(format!("upsert task failed: {e}"))),
                ..Default::default()
            });
            summary.chunks_upserted = outcome.upserted;
            summary.chunks_cancelled = outcome.dropped;
            let store_error = outcome.error;

            if let Some(e) = store_error {
                return Err(self.fail(IngestStage::Upserting, e, summary));
            }
            if let Some(e) = embedded.abort {
                return Err(self.fail(IngestStage::Embedding, e, summary));
            }

            self.state.set(IngestState::Idle);
            info!(
                documents_loaded = summary.documents_loaded,
                documents_failed = summary.documents_failed,
                chunks_upserted = summary.chunks_upserted,
                chunks_failed = summary.chunks_failed,
                chunks_cancelled = summary.chunks_cancelled,
                cancelled = summary.cancelled,
                "ingestion finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Chunk incoming documents and group the chunks into embedding batches.
    async fn produce(
        &self,
        mut documents: BoxStream<'static, Result<Document>>,
        batches: mpsc::Sender<Vec<Chunk>>,
        token: &CancellationToken,
    ) -> LoadStats {
        let batch_size = self.config.embedding_batch_size;
        let mut stats = LoadStats::default();
        let mut pending: Vec<Chunk> = Vec::new();

        while let Some(item) = documents.next().await {
            if token.is_cancelled() {
                break;
            }
            let document = match item {
                Ok(document) => document,
                Err(e) => {
                    warn!(error = %e, "skipping document");
                    stats.documents_failed += 1;
                    stats.failures.push(load_failure(&e));
                    continue;
                }
            };

            self.state.advance(IngestStage::Chunking);
            let chunks = self.chunker.chunk(&document);
            info!(
                document.id = %document.id,
                pages = document.page_count,
                chars = document.char_count(),
                chunk_count = chunks.len(),
                "chunked document"
            );
            stats.documents_loaded += 1;
            stats.chunks_produced += chunks.len();
            pending.extend(chunks);

            while pending.len() >= batch_size {
                let batch: Vec<Chunk> = pending.drain(..batch_size).collect();
                if batches.send(batch).await.is_err() {
                    return stats;
                }
            }
        }

        if !pending.is_empty() && !token.is_cancelled() {
            // The receiver is gone only when embedding already aborted.
            let _ = batches.send(pending).await;
        }
        stats
    }

    /// Embed batches concurrently and forward them to the upsert task.
    async fn embed(
        &self,
        batches: mpsc::Receiver<Vec<Chunk>>,
        upserts: mpsc::Sender<Vec<Chunk>>,
        token: &CancellationToken,
    ) -> EmbedStats {
        let token = token.clone();
        let batches = stream::unfold(batches, move |mut rx| {
            let token = token.clone();
            async move {
                if token.is_cancelled() {
                    return None;
                }
                let batch = rx.recv().await?;
                if token.is_cancelled() {
                    return None;
                }
                Some((batch, rx))
            }
        });

        let mut embedded = pin!(
            batches
                .map(|batch| embed_chunks(&self.embedder, batch, &self.state))
                .buffer_unordered(self.config.max_concurrent_embeddings)
        );

        let mut stats = EmbedStats::default();
        let mut consecutive = 0;
        while let Some(outcome) = embedded.next().await {
            match outcome {
                Ok(chunks) => {
                    consecutive = 0;
                    if upserts.send(chunks).await.is_err() {
                        break;
                    }
                }
                Err((chunks, e)) => {
                    consecutive += 1;
                    let source = batch_source(&chunks);
                    warn!(source = %source, error = %e, consecutive, "embedding batch failed");
                    stats.chunks_failed += chunks.len();
                    stats.batches_failed += 1;
                    stats.failures.push(IngestFailure {
                        source,
                        stage: IngestStage::Embedding,
                        message: e.to_string(),
                    });
                    if consecutive >= self.config.embedding_failure_limit {
                        error!(consecutive, "embedding service looks down, aborting");
                        stats.abort = Some(e);
                        break;
                    }
                }
            }
        }
        stats
    }

    fn fail(&self, stage: IngestStage, cause: RagError, summary: IngestionSummary) -> RagError {
        error!(%stage, error = %cause, "ingestion aborted");
        self.state.set(IngestState::Failed { stage, cause: cause.to_string() });
        RagError::IngestionFailed { stage, cause: Box::new(cause), summary: Box::new(summary) }
    }
}

async fn embed_chunks(
    embedder: &ResilientEmbedder,
    mut chunks: Vec<Chunk>,
    state: &StateTracker,
) -> std::result::Result<Vec<Chunk>, (Vec<Chunk>, RagError)> {
    state.advance(IngestStage::Embedding);
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    match embedder.embed_batch(&texts).await {
        Ok(vectors) => {
            for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                chunk.embedding = vector;
            }
            debug!(batch_size = chunks.len(), "embedded batch");
            Ok(chunks)
        }
        Err(e) => Err((chunks, e)),
    }
}

#[derive(Debug, Default)]
struct UpsertOutcome {
    upserted: usize,
    /// Queued chunks discarded after cancellation.
    dropped: usize,
    error: Option<RagError>,
}

/// Write queued batches until the queue closes. Once `token` is cancelled,
/// the remaining batches are drained and counted but never written.
async fn upsert_loop(
    store: Arc<dyn VectorStore>,
    collection: String,
    policy: RetryPolicy,
    mut batches: mpsc::Receiver<Vec<Chunk>>,
    state: StateTracker,
    token: CancellationToken,
) -> UpsertOutcome {
    let mut outcome = UpsertOutcome::default();
    while let Some(batch) = batches.recv().await {
        if token.is_cancelled() {
            outcome.dropped += batch.len();
            debug!(collection, batch_size = batch.len(), "dropped queued batch");
            continue;
        }
        state.advance(IngestStage::Upserting);
        let (store, collection, chunks) = (&store, collection.as_str(), &batch);
        match policy.run("upsert", move || store.upsert(collection, chunks)).await {
            Ok(()) => {
                outcome.upserted += batch.len();
                debug!(
                    collection,
                    batch_size = batch.len(),
                    upserted = outcome.upserted,
                    "upserted batch"
                );
            }
            Err(e) => {
                error!(collection, error = %e, "upsert failed after retries");
                outcome.error = Some(e);
                return outcome;
            }
        }
    }
    if outcome.dropped > 0 {
        warn!(collection, dropped = outcome.dropped, "cancelled before queued chunks were written");
    }
    outcome
}

fn load_failure(e: &RagError) -> IngestFailure {
    let source = match e {
        RagError::LoadError { path, .. } => path.display().to_string(),
        _ => String::new(),
    };
    IngestFailure { source, stage: IngestStage::Loading, message: e.to_string() }
}

/// Distinct document ids of a batch, in order of first appearance.
fn batch_source(chunks: &[Chunk]) -> String {
    let mut ids: Vec<&str> = Vec::new();
    for chunk in chunks {
        if !ids.contains(&chunk.document_id.as_str()) {
            ids.push(&chunk.document_id);
        }
    }
    ids.join(", ")
}

/// Builder for constructing an [`IngestionPipeline`].
///
/// `config`, `embedding_provider`, `vector_store` and `collection` are
/// required. The loader defaults to a recursive [`DirectoryLoader`] and the
/// chunker to a [`PageChunker`] sized from the config.
///
/// The provider is wrapped in a [`ResilientEmbedder`] using the config's
/// batch size and retry settings, normalising vectors when the distance is
/// [`Distance::Dot`].
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<RagConfig>,
    loader: Option<DirectoryLoader>,
    chunker: Option<Arc<dyn Chunker>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    collection: Option<String>,
}

impl IngestionPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document loader.
    pub fn loader(mut self, loader: DirectoryLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the target collection.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Build the [`IngestionPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any required field is missing or
    /// the collection name is empty.
    pub fn build(self) -> Result<IngestionPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        let provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;
        let collection = self
            .collection
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| RagError::ConfigError("collection is required".to_string()))?;

        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(PageChunker::new(config.chunk_size, config.chunk_overlap))
        });
        let embedder = ResilientEmbedder::new(provider, &config)
            .with_normalization(config.distance == Distance::Dot);

        Ok(IngestionPipeline {
            store_policy: RetryPolicy::from_config(&config),
            loader: self.loader.unwrap_or_default(),
            chunker,
            embedder,
            store,
            collection,
            state: StateTracker::new(),
            run_lock: Mutex::new(()),
            config,
        })
    }
}
