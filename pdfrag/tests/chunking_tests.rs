//! Property tests for the chunkers.

use pdfrag::{Chunker, Document, FixedSizeChunker, Page, PageChunker};
use proptest::prelude::*;

fn document(pages: Vec<String>) -> Document {
    let pages: Vec<Page> = pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page { number: i as u32 + 1, text })
        .collect();
    Document::new("doc.pdf", "Doc", "/docs/doc.pdf", pages.len() as u32, pages)
}

/// Text mixing words, sentence ends, paragraph breaks and multibyte letters.
fn arb_page() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            "[a-zA-Z]{1,12}",
            Just(" ".to_string()),
            Just(". ".to_string()),
            Just("\n\n".to_string()),
            Just("é".to_string()),
            Just("漢字".to_string()),
        ],
        0..200,
    )
    .prop_map(|parts| parts.concat())
}

fn arb_sizes() -> impl Strategy<Value = (usize, usize)> {
    (1usize..120).prop_flat_map(|size| (Just(size), 0..size))
}

fn check(chunker: &dyn Chunker, pages: Vec<String>, size: usize) -> Result<(), TestCaseError> {
    let doc = document(pages);
    let chunks = chunker.chunk(&doc);
    for chunk in &chunks {
        prop_assert!(chunk.char_len() <= size, "{} chars > {size}", chunk.char_len());
        prop_assert!(!chunk.text.trim().is_empty());

        let page = &doc.pages[(chunk.page - 1) as usize];
        let span: String = page
            .text
            .chars()
            .skip(chunk.start_offset)
            .take(chunk.end_offset - chunk.start_offset)
            .collect();
        prop_assert_eq!(&span, &chunk.text);
    }
    for pair in chunks.windows(2) {
        if pair[0].page == pair[1].page {
            prop_assert!(pair[0].start_offset < pair[1].start_offset);
        }
    }
    // Deterministic ids.
    let again: Vec<String> = chunker.chunk(&doc).into_iter().map(|c| c.id).collect();
    prop_assert_eq!(again, chunks.into_iter().map(|c| c.id).collect::<Vec<_>>());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn page_chunks_respect_size_and_offsets(
        pages in proptest::collection::vec(arb_page(), 0..4),
        (size, overlap) in arb_sizes(),
    ) {
        check(&PageChunker::new(size, overlap), pages, size)?;
    }

    #[test]
    fn fixed_chunks_respect_size_and_offsets(
        pages in proptest::collection::vec(arb_page(), 0..4),
        (size, overlap) in arb_sizes(),
    ) {
        check(&FixedSizeChunker::new(size, overlap), pages, size)?;
    }
}

#[test]
fn three_page_document_chunks_per_page() {
    let doc = document(vec!["lorem ".repeat(200), "zebra ".repeat(50), "ipsum ".repeat(150)]);
    let chunks = PageChunker::new(500, 50).chunk(&doc);

    let per_page: Vec<usize> =
        (1..=3).map(|p| chunks.iter().filter(|c| c.page == p).count()).collect();
    assert_eq!(per_page, vec![3, 1, 2]);
    assert_eq!(chunks[0].id, "doc.pdf#p1#c0");
    assert_eq!(chunks[3].id, "doc.pdf#p2#c0");
    assert_eq!(chunks[5].id, "doc.pdf#p3#c1");
}
