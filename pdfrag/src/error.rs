//! Error types for the `pdfrag` crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::{IngestStage, IngestionSummary};

/// Errors that can occur while loading, embedding, storing, or retrieving.
#[derive(Debug, Error)]
pub enum RagError {
    /// A path or file could not be read or parsed.
    ///
    /// At document granularity this is non-fatal: the loader reports it and
    /// ingestion skips the file.
    #[error("Load error ({}): {message}", path.display())]
    LoadError {
        /// The file or directory that failed.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
        /// Whether repeating the request may succeed (network, 5xx, 429).
        retryable: bool,
    },

    /// An embedding did not have the dimension declared for the collection.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The declared dimension.
        expected: usize,
        /// The dimension actually received.
        actual: usize,
    },

    /// The vector store backend could not be reached.
    #[error("Vector store unavailable ({backend}): {message}")]
    StoreUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector store rejected an operation.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The named collection does not exist.
    #[error("Collection '{0}' does not exist")]
    CollectionNotFound(String),

    /// An external call did not complete within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The configured deadline.
        after: Duration,
    },

    /// Retrieval could not reach the vector store.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An error in the ingestion pipeline orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// An ingestion run was aborted. Upserts committed before the failure
    /// remain in the store.
    #[error("Ingestion failed during {stage}: {cause}")]
    IngestionFailed {
        /// The stage that was running when the run aborted.
        stage: IngestStage,
        /// The underlying failure.
        cause: Box<RagError>,
        /// Counts accumulated before the abort.
        summary: Box<IngestionSummary>,
    },
}

impl RagError {
    /// Shorthand for a [`RagError::LoadError`].
    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LoadError { path: path.into(), message: message.into() }
    }

    /// Whether the failed operation may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable { .. } | Self::Timeout { .. } => true,
            Self::EmbeddingError { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(
            RagError::StoreUnavailable { backend: "qdrant".into(), message: "down".into() }
                .is_retryable()
        );
        assert!(
            RagError::Timeout { operation: "embed".into(), after: Duration::from_secs(1) }
                .is_retryable()
        );
        assert!(
            RagError::EmbeddingError { provider: "x".into(), message: "503".into(), retryable: true }
                .is_retryable()
        );
        assert!(
            !RagError::EmbeddingError {
                provider: "x".into(),
                message: "400".into(),
                retryable: false
            }
            .is_retryable()
        );
        assert!(!RagError::DimensionMismatch { expected: 3, actual: 4 }.is_retryable());
        assert!(!RagError::ConfigError("missing".into()).is_retryable());
    }

    #[test]
    fn load_error_mentions_path() {
        let err = RagError::load("docs/broken.pdf", "bad xref");
        assert_eq!(err.to_string(), "Load error (docs/broken.pdf): bad xref");
    }
}
