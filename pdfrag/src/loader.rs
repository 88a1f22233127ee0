//! Directory scanning and text extraction.
//!
//! [`DirectoryLoader`] walks a directory and turns every supported file into a
//! [`Document`]. A file that cannot be read or parsed produces an error for
//! that file alone; callers log it and move on.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::document::{Document, Page};
use crate::error::{RagError, Result};

/// Form feed, the page separator in plain-text files.
const PAGE_BREAK: char = '\x0C';

/// File kinds the loader can extract text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Portable Document Format.
    Pdf,
    /// UTF-8 plain text; form feeds separate pages.
    Text,
    /// Markdown; a single page.
    Markdown,
}

impl FileKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Loads documents from a directory.
///
/// # Example
///
/// ```rust,ignore
/// use pdfrag::DirectoryLoader;
///
/// let loader = DirectoryLoader::new().recursive(false);
/// for document in loader.load("./pdf_documents")? {
///     match document {
///         Ok(doc) => println!("{} ({} pages)", doc.title, doc.page_count),
///         Err(e) => eprintln!("skipped: {e}"),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    recursive: bool,
    kinds: Vec<FileKind>,
}

impl Default for DirectoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryLoader {
    /// A recursive loader accepting PDF, text and markdown files.
    pub fn new() -> Self {
        Self { recursive: true, kinds: vec![FileKind::Pdf, FileKind::Text, FileKind::Markdown] }
    }

    /// Whether subdirectories are scanned.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Restrict the accepted file kinds.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = FileKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        FileKind::from_path(path).is_some_and(|k| self.kinds.contains(&k))
    }

    fn walker(&self, root: &Path) -> Result<walkdir::IntoIter> {
        let meta = fs::metadata(root).map_err(|e| RagError::load(root, e.to_string()))?;
        if !meta.is_dir() {
            return Err(RagError::load(root, "not a directory"));
        }
        fs::read_dir(root).map_err(|e| RagError::load(root, e.to_string()))?;

        let walk = WalkDir::new(root).min_depth(1).sort_by_file_name();
        let walk = if self.recursive { walk } else { walk.max_depth(1) };
        Ok(walk.into_iter())
    }

    /// Lazily load every supported file under `root`, in file-name order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::LoadError`] if `root` does not exist, is not a
    /// directory, or cannot be read. Per-file failures are yielded as `Err`
    /// items instead.
    pub fn load(&self, root: impl AsRef<Path>) -> Result<DocumentIter> {
        let root = root.as_ref().to_path_buf();
        let walk = self.walker(&root)?;
        Ok(DocumentIter { loader: self.clone(), root, walk })
    }

    /// List the supported files under `root` without reading them.
    ///
    /// Entries the walk cannot read are skipped.
    pub fn scan(&self, root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let root = root.as_ref();
        let files = self
            .walker(root)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.accepts(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        Ok(files)
    }

    /// Read and extract a single file. The document id is `path` relative to
    /// `root`.
    pub fn load_file(&self, root: &Path, path: &Path) -> Result<Document> {
        let kind = FileKind::from_path(path)
            .ok_or_else(|| RagError::load(path, "unsupported file type"))?;
        let bytes = fs::read(path).map_err(|e| RagError::load(path, e.to_string()))?;

        let (page_count, pages, heading) = match kind {
            FileKind::Pdf => {
                let texts = extract_pdf_pages(&bytes).map_err(|msg| RagError::load(path, msg))?;
                let (count, pages) = number_pages(texts.iter().map(String::as_str));
                (count, pages, None)
            }
            FileKind::Text => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| RagError::load(path, format!("invalid UTF-8: {e}")))?;
                let (count, pages) = split_pages(&text);
                (count, pages, None)
            }
            FileKind::Markdown => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| RagError::load(path, format!("invalid UTF-8: {e}")))?;
                let heading = first_heading(&text);
                let (_, pages) = split_pages(&text.replace(PAGE_BREAK, "\n"));
                (1, pages, heading)
            }
        };

        let id = document_id(root, path);
        let title = heading.unwrap_or_else(|| {
            path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| id.clone())
        });
        debug!(document.id = %id, page_count, pages = pages.len(), "loaded document");
        Ok(Document::new(id, title, path, page_count, pages))
    }
}

/// Lazy sequence of documents produced by [`DirectoryLoader::load`].
pub struct DocumentIter {
    loader: DirectoryLoader,
    root: PathBuf,
    walk: walkdir::IntoIter,
}

impl Iterator for DocumentIter {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                    return Some(Err(RagError::load(path, e.to_string())));
                }
            };
            if entry.file_type().is_file() && self.loader.accepts(entry.path()) {
                return Some(self.loader.load_file(&self.root, entry.path()));
            }
        }
    }
}

/// Relative path with `/` separators, falling back to the full path.
fn document_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/")
}

/// Split on form feeds. A trailing form feed terminates the last page rather
/// than opening a new one.
fn split_pages(text: &str) -> (u32, Vec<Page>) {
    let mut raw: Vec<&str> = text.split(PAGE_BREAK).collect();
    if raw.len() > 1 && raw.last().is_some_and(|last| last.trim().is_empty()) {
        raw.pop();
    }
    number_pages(raw)
}

/// Number pages from 1 by their position in the source, dropping empty ones.
/// Returns the total page count and the non-empty pages.
fn number_pages<'a>(texts: impl IntoIterator<Item = &'a str>) -> (u32, Vec<Page>) {
    let mut count = 0u32;
    let mut pages = Vec::new();
    for text in texts {
        count += 1;
        let text = text.trim();
        if !text.is_empty() {
            pages.push(Page { number: count, text: text.to_string() });
        }
    }
    (count, pages)
}

fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim_start)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|h| !h.is_empty())
}

/// Extract the text of every page with `pdf-extract`, converting parser
/// panics into errors.
fn extract_pdf_pages(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    let outcome =
        panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem_by_pages(bytes)));
    match outcome {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(format!("PDF extraction failed: {e}")),
        Err(_) => Err("PDF parser panicked on malformed input".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_extensions() {
        assert_eq!(FileKind::from_path(Path::new("a/B.PDF")), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_path(Path::new("notes.md")), Some(FileKind::Markdown));
        assert_eq!(FileKind::from_path(Path::new("x.txt")), Some(FileKind::Text));
        assert_eq!(FileKind::from_path(Path::new("image.png")), None);
        assert_eq!(FileKind::from_path(Path::new("README")), None);
    }

    #[test]
    fn pages_keep_their_numbers() {
        let (count, pages) = split_pages("one\x0C\x0Cthree\x0C");
        assert_eq!(count, 3);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[1].number, 3);
        assert_eq!(pages[1].text, "three");
    }

    #[test]
    fn extracted_pages_are_numbered_by_position() {
        let (count, pages) = number_pages(["  intro ", "", "\n", "appendix"]);
        assert_eq!(count, 4);
        let numbered: Vec<(u32, &str)> = pages.iter().map(|p| (p.number, p.text.as_str())).collect();
        assert_eq!(numbered, vec![(1, "intro"), (4, "appendix")]);
    }

    #[test]
    fn markdown_title_from_heading() {
        assert_eq!(first_heading("\n# Pump Manual\ntext"), Some("Pump Manual".into()));
        assert_eq!(first_heading("no heading"), None);
    }

    #[test]
    fn ids_are_relative_and_slash_separated() {
        let root = Path::new("/data/docs");
        assert_eq!(document_id(root, &root.join("a").join("b.pdf")), "a/b.pdf");
    }

    #[test]
    fn garbage_pdf_is_an_error() {
        assert!(extract_pdf_pages(b"definitely not a pdf").is_err());
    }
}
