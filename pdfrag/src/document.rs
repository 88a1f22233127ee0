//! Data types for documents, chunks, and search results.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metadata key holding the document title.
pub const META_TITLE: &str = "title";
/// Metadata key holding the source path.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the 1-based page number.
pub const META_PAGE: &str = "page";
/// Metadata key holding the per-page chunk index.
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Metadata key holding the parent document id.
pub const META_DOCUMENT_ID: &str = "document_id";

/// One page (or section) of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    /// 1-based page number within the source file.
    pub number: u32,
    /// The extracted text of the page.
    pub text: String,
}

/// A loaded source document.
///
/// The id is the path relative to the ingestion root with `/` separators, so
/// it stays stable across machines and re-ingestion runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// Human-readable title used in citations.
    pub title: String,
    /// Where the document was read from.
    pub source_path: PathBuf,
    /// Total number of pages in the source, including empty ones.
    pub page_count: u32,
    /// Non-empty pages in ascending page order.
    pub pages: Vec<Page>,
    /// Key-value metadata copied onto every chunk.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Build a document from its pages, filling the standard metadata keys.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        source_path: impl Into<PathBuf>,
        page_count: u32,
        pages: Vec<Page>,
    ) -> Self {
        let id = id.into();
        let title = title.into();
        let source_path = source_path.into();
        let metadata = HashMap::from([
            (META_TITLE.to_string(), title.clone()),
            (META_SOURCE.to_string(), source_path.display().to_string()),
            (META_DOCUMENT_ID.to_string(), id.clone()),
        ]);
        Self { id, title, source_path, page_count, pages, metadata }
    }

    /// Total number of characters across all pages.
    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}

/// Deterministic chunk identifier for `(document, page, index)`.
pub fn chunk_id(document_id: &str, page: u32, index: usize) -> String {
    format!("{document_id}#p{page}#c{index}")
}

/// A bounded span of one page, optionally carrying its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk, see [`chunk_id`].
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// 1-based page number the text was taken from.
    pub page: u32,
    /// The text content of the chunk.
    pub text: String,
    /// Character offset of the first character within the page.
    pub start_offset: usize,
    /// Character offset one past the last character within the page.
    pub end_offset: usize,
    /// The vector embedding for this chunk's text. Empty until embedded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Metadata inherited from the parent document plus chunk-specific fields.
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// The title of the parent document, if recorded.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get(META_TITLE).map(String::as_str)
    }

    /// Length of the chunk text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}
