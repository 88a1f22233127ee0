//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`PageChunker`] - per page, cuts at paragraph, sentence, or word
//!   boundaries inside a character budget, falling back to a hard cut
//! - [`FixedSizeChunker`] - per page, plain character windows
//!
//! Both measure sizes and offsets in characters, never bytes, and both keep
//! overlap between consecutive chunks of the same page. Chunks never span
//! pages, so every chunk can be cited by page number.

use crate::document::{Chunk, Document, META_CHUNK_INDEX, META_PAGE, Page, chunk_id};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has no text.
    /// Each returned chunk has an empty embedding vector.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits each page into chunks that end on natural boundaries.
///
/// Inside the window of `max_chars` characters starting at the current
/// position, the cut goes after the last paragraph break (`\n\n`), else after
/// the last sentence end (`.`, `!` or `?` followed by whitespace), else after
/// the last whitespace. Only the back half of the window is searched for
/// paragraph and sentence breaks, so chunks do not shrink far below the
/// budget. Without any break the window is cut at `max_chars`. The next chunk
/// starts `overlap_chars` before the cut.
///
/// # Example
///
/// ```rust,ignore
/// use pdfrag::PageChunker;
///
/// let chunker = PageChunker::new(800, 100);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct PageChunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl PageChunker {
    /// Create a new `PageChunker`.
    ///
    /// # Arguments
    ///
    /// * `max_chars` - maximum number of characters per chunk
    /// * `overlap_chars` - number of overlapping characters between consecutive chunks
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        Self { max_chars: max_chars.max(1), overlap_chars }
    }
}

impl Chunker for PageChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        chunk_pages(document, |chars| {
            split_spans(chars, self.max_chars, self.overlap_chars, find_boundary)
        })
    }
}

/// Splits each page into fixed-size character windows with overlap.
///
/// # Example
///
/// ```rust,ignore
/// use pdfrag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per chunk
    /// * `chunk_overlap` - number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self { chunk_size: chunk_size.max(1), chunk_overlap }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        chunk_pages(document, |chars| {
            split_spans(chars, self.chunk_size, self.chunk_overlap, |_, _, end| end)
        })
    }
}

/// Run `split` over every page and turn the resulting spans into chunks.
fn chunk_pages(
    document: &Document,
    split: impl Fn(&[char]) -> Vec<(usize, usize)>,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in &document.pages {
        let chars: Vec<char> = page.text.chars().collect();
        let spans = split(&chars)
            .into_iter()
            .filter(|&(start, end)| chars[start..end].iter().any(|c| !c.is_whitespace()));
        for (index, (start, end)) in spans.enumerate() {
            chunks.push(make_chunk(document, page, index, start, end, &chars));
        }
    }
    chunks
}

fn make_chunk(
    document: &Document,
    page: &Page,
    index: usize,
    start: usize,
    end: usize,
    chars: &[char],
) -> Chunk {
    let mut metadata = document.metadata.clone();
    metadata.insert(META_PAGE.to_string(), page.number.to_string());
    metadata.insert(META_CHUNK_INDEX.to_string(), index.to_string());
    Chunk {
        id: chunk_id(&document.id, page.number, index),
        document_id: document.id.clone(),
        page: page.number,
        text: chars[start..end].iter().collect(),
        start_offset: start,
        end_offset: end,
        embedding: Vec::new(),
        metadata,
    }
}

/// Produce `[start, end)` character spans covering `chars`.
///
/// `cut(chars, start, window_end)` picks the end of a span whose window would
/// otherwise end at `window_end`; it must return a value in
/// `start + 1..=window_end`.
fn split_spans(
    chars: &[char],
    max_chars: usize,
    overlap: usize,
    cut: impl Fn(&[char], usize, usize) -> usize,
) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        if len - start <= max_chars {
            spans.push((start, len));
            break;
        }
        let window_end = start + max_chars;
        let end = cut(chars, start, window_end).clamp(start + 1, window_end);
        spans.push((start, end));

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    spans
}

/// Best cut position in `(start, window_end]`, see [`PageChunker`].
fn find_boundary(chars: &[char], start: usize, window_end: usize) -> usize {
    let half = start + (window_end - start) / 2;
    let back_half = (half.max(start + 1)..=window_end).rev();

    let paragraph = back_half
        .clone()
        .find(|&p| p >= start + 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n');
    if let Some(p) = paragraph {
        return p;
    }

    let sentence = back_half.clone().find(|&p| {
        p >= start + 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?')
    });
    if let Some(p) = sentence {
        return p;
    }

    ((start + 1)..=window_end).rev().find(|&p| chars[p - 1].is_whitespace()).unwrap_or(window_end)
}
