//! Directory scanning and text extraction against real files.

mod common;

use common::{pdf_with_pages, write};
use pdfrag::{DirectoryLoader, FileKind, RagError};
use tempfile::TempDir;

fn library() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "b-manual.pdf", pdf_with_pages(&["Only page"]));
    write(dir.path(), "a-notes.txt", "plain notes");
    write(dir.path(), "image.png", [0u8, 1, 2]);
    write(dir.path(), "sub/c-guide.md", "# Guide\n\nbody");
    dir
}

#[test]
fn multi_page_pdf_keeps_page_numbers() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "report.pdf",
        pdf_with_pages(&[
            "Alpha page one content",
            "Bravo page two content",
            "Charlie page three content",
        ]),
    );

    let docs: Vec<_> = DirectoryLoader::new().load(dir.path()).unwrap().collect();
    assert_eq!(docs.len(), 1);
    let doc = docs.into_iter().next().unwrap().unwrap();

    assert_eq!(doc.id, "report.pdf");
    assert_eq!(doc.title, "report");
    assert_eq!(doc.page_count, 3);
    let numbers: Vec<u32> = doc.pages.iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(doc.pages[0].text.contains("Alpha page one content"));
    assert!(doc.pages[1].text.contains("Bravo page two content"));
    assert!(doc.pages[2].text.contains("Charlie page three content"));
    assert!(!doc.pages[0].text.contains("Bravo"));
}

#[test]
fn scan_lists_supported_files_in_name_order() {
    let dir = library();

    let deep = DirectoryLoader::new().scan(dir.path()).unwrap();
    let names: Vec<_> =
        deep.iter().map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf()).collect();
    assert_eq!(
        names,
        vec![
            std::path::PathBuf::from("a-notes.txt"),
            "b-manual.pdf".into(),
            std::path::Path::new("sub").join("c-guide.md"),
        ]
    );

    let flat = DirectoryLoader::new().recursive(false).scan(dir.path()).unwrap();
    assert_eq!(flat.len(), 2);

    let pdf_only = DirectoryLoader::new().kinds([FileKind::Pdf]).scan(dir.path()).unwrap();
    assert_eq!(pdf_only.len(), 1);
    assert!(pdf_only[0].ends_with("b-manual.pdf"));
}

#[test]
fn scan_and_load_agree() {
    let dir = library();
    let loader = DirectoryLoader::new();

    let scanned = loader.scan(dir.path()).unwrap();
    let loaded: Vec<_> = loader.load(dir.path()).unwrap().map(|d| d.unwrap().source_path).collect();
    assert_eq!(scanned, loaded);
}

#[test]
fn missing_root_is_a_load_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent");
    assert!(matches!(DirectoryLoader::new().scan(&missing), Err(RagError::LoadError { .. })));

    write(dir.path(), "file.txt", "x");
    let err = DirectoryLoader::new().scan(dir.path().join("file.txt")).unwrap_err();
    assert!(err.to_string().contains("not a directory"));
}
