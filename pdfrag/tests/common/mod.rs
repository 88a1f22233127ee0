//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pdfrag::{
    CancellationToken, Chunk, EmbeddingProvider, InMemoryVectorStore, MetadataFilter, RagError,
    Result, SearchResult, VectorStore,
};

pub const DIMS: usize = 1024;

/// Bag-of-words embedder: every lowercase alphanumeric word adds 1.0 at
/// `fnv1a(word) % DIMS`, and the result is scaled to unit length.
#[derive(Debug, Default)]
pub struct HashingEmbedder {
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        v[(fnv1a(&word.to_lowercase()) % DIMS as u64) as usize] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_embed(text))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Embeds like [`HashingEmbedder`] and cancels `token` on the first call.
pub struct CancellingEmbedder {
    pub token: CancellationToken,
}

#[async_trait]
impl EmbeddingProvider for CancellingEmbedder {
    fn name(&self) -> &str {
        "cancelling"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.token.cancel();
        Ok(hash_embed(text))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// An embedding service that is down.
pub struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn name(&self) -> &str {
        "down"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::EmbeddingError {
            provider: "down".into(),
            message: "connection refused".into(),
            retryable: false,
        })
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Wraps an [`InMemoryVectorStore`]; every upsert after the first
/// `healthy_upserts` fails as unavailable.
pub struct FlakyStore {
    pub inner: Arc<InMemoryVectorStore>,
    healthy_upserts: usize,
    upserts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryVectorStore>, healthy_upserts: usize) -> Self {
        Self { inner, healthy_upserts, upserts: AtomicUsize::new(0) }
    }

    pub fn upsert_attempts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn backend(&self) -> &str {
        "flaky"
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        self.inner.create_collection(name, dimensions).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.inner.delete_collection(name).await
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        if self.upserts.fetch_add(1, Ordering::SeqCst) >= self.healthy_upserts {
            return Err(RagError::StoreUnavailable {
                backend: "flaky".into(),
                message: "connection reset".into(),
            });
        }
        self.inner.upsert(collection, chunks).await
    }

    async fn delete(&self, collection: &str, ids: &[&str]) -> Result<()> {
        self.inner.delete(collection, ids).await
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchResult>> {
        self.inner.search(collection, embedding, top_k, filter).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.inner.count(collection).await
    }
}

pub fn write(dir: &Path, name: &str, contents: impl AsRef<[u8]>) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// `pattern` repeated and cut to exactly `len` characters.
pub fn filler(pattern: &str, len: usize) -> String {
    pattern.chars().cycle().take(len).collect()
}

/// A valid PDF with one page per entry, each drawn as a single line of
/// Helvetica text.
pub fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let font_id = 3 + 2 * pages.len();
    let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();

    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages.len()),
    ];
    for (i, text) in pages.iter().enumerate() {
        let escaped = text.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
        let content = format!("BT /F1 12 Tf 72 720 Td ({escaped}) Tj ET");
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
             /Resources << /Font << /F1 {font_id} 0 R >> >> /Contents {} 0 R >>",
            4 + 2 * i
        ));
        objects.push(format!("<< /Length {} >>\nstream\n{content}\nendstream", content.len()));
    }
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", i + 1).as_bytes());
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!("trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n", objects.len() + 1)
            .as_bytes(),
    );
    pdf
}
