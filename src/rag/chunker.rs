//! Recursive character splitter with page provenance.
//!
//! Pages are laid end to end (joined by a paragraph break) and the combined
//! text is split with a separator hierarchy: paragraph, line, sentence, word,
//! character. Every chunk is a contiguous, whitespace-trimmed span of the
//! combined text, so its page set is simply the pages its span overlaps.

use std::collections::VecDeque;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];
const PAGE_JOINER: &str = "\n\n";

/// Text extracted from one page of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number,
            text: text.into(),
        }
    }
}

/// A chunk of text plus the (sorted, unique) pages it was drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkedText {
    pub text: String,
    pub source_pages: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split pages into overlapping chunks.
    ///
    /// Never fails: if splitting is impossible, each non-empty page comes
    /// back as one whole chunk.
    pub fn chunk(&self, pages: &[PageText]) -> Vec<ChunkedText> {
        let pages: Vec<&PageText> = pages
            .iter()
            .filter(|page| !page.text.trim().is_empty())
            .collect();
        if pages.is_empty() {
            return Vec::new();
        }

        match self.try_chunk(&pages) {
            Ok(chunks) if !chunks.is_empty() => chunks,
            Ok(_) => {
                tracing::error!("Chunker produced no chunks for non-empty input; using whole pages");
                whole_pages(&pages)
            }
            Err(err) => {
                tracing::error!("Chunking failed ({}); using whole pages", err);
                whole_pages(&pages)
            }
        }
    }

    fn try_chunk(&self, pages: &[&PageText]) -> Result<Vec<ChunkedText>, ApiError> {
        if self.chunk_size == 0 {
            return Err(ApiError::BadRequest("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ApiError::BadRequest(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }

        let mut combined = String::new();
        let mut page_spans: Vec<(u32, Range<usize>)> = Vec::with_capacity(pages.len());
        for (idx, page) in pages.iter().enumerate() {
            if idx > 0 {
                combined.push_str(PAGE_JOINER);
            }
            let start = combined.len();
            combined.push_str(&page.text);
            page_spans.push((page.page_number, start..combined.len()));
        }

        let chunks = self
            .split_spans(&combined)
            .into_iter()
            .map(|span| {
                let mut source_pages: Vec<u32> = page_spans
                    .iter()
                    .filter(|(_, page)| page.start < span.end && span.start < page.end)
                    .map(|(number, _)| *number)
                    .collect();
                source_pages.sort_unstable();
                source_pages.dedup();
                ChunkedText {
                    text: combined[span].to_string(),
                    source_pages,
                }
            })
            .collect();

        Ok(chunks)
    }

    /// Byte ranges of each chunk within `text`.
    pub(crate) fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        self.split_range(text, 0..text.len(), &SEPARATORS)
            .into_iter()
            .filter_map(|span| trim_span(text, span))
            .collect()
    }

    fn split_range(&self, text: &str, range: Range<usize>, separators: &[&str]) -> Vec<Range<usize>> {
        let slice = &text[range.clone()];
        let sep_idx = separators
            .iter()
            .position(|sep| sep.is_empty() || slice.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(sep_idx).copied().unwrap_or("");
        let remaining = separators.get(sep_idx + 1..).unwrap_or(&[]);

        let pieces = split_keeping_separator(slice, separator, range.start);

        let mut spans = Vec::new();
        let mut pending: Vec<(Range<usize>, usize)> = Vec::new();
        for piece in pieces {
            let len = text[piece.clone()].chars().count();
            if len < self.chunk_size {
                pending.push((piece, len));
                continue;
            }

            if !pending.is_empty() {
                spans.extend(self.merge(std::mem::take(&mut pending)));
            }
            if remaining.is_empty() {
                spans.push(piece);
            } else {
                spans.extend(self.split_range(text, piece, remaining));
            }
        }
        if !pending.is_empty() {
            spans.extend(self.merge(pending));
        }

        spans
    }

    /// Greedily pack consecutive pieces up to `chunk_size`, carrying up to
    /// `chunk_overlap` characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: Vec<(Range<usize>, usize)>) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for (piece, len) in pieces {
            if total + len > self.chunk_size {
                if let (Some(first), Some(last)) = (window.front(), window.back()) {
                    spans.push(first.0.start..last.0.end);
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            total += len;
            window.push_back((piece, len));
        }

        if let (Some(first), Some(last)) = (window.front(), window.back()) {
            spans.push(first.0.start..last.0.end);
        }
        spans
    }
}

/// Split `slice` on `separator`, leaving the separator at the end of the
/// piece it terminates. Offsets are shifted by `base` into the parent text.
fn split_keeping_separator(slice: &str, separator: &str, base: usize) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(idx, ch)| base + idx..base + idx + ch.len_utf8())
            .collect();
    }

    let mut pieces = Vec::new();
    let mut cursor = 0;
    for (idx, matched) in slice.match_indices(separator) {
        let end = idx + matched.len();
        pieces.push(base + cursor..base + end);
        cursor = end;
    }
    if cursor < slice.len() {
        pieces.push(base + cursor..base + slice.len());
    }
    pieces
}

fn trim_span(text: &str, span: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[span.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading + trailing >= slice.len() {
        return None;
    }
    Some(span.start + leading..span.end - trailing)
}

fn whole_pages(pages: &[&PageText]) -> Vec<ChunkedText> {
    pages
        .iter()
        .map(|page| ChunkedText {
            text: page.text.clone(),
            source_pages: vec![page.page_number],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence_page(number: u32, sentences: usize) -> PageText {
        let text = (0..sentences)
            .map(|i| format!("Page {number} sentence {i} talks about topic {}.", i % 7))
            .collect::<Vec<_>>()
            .join(" ");
        PageText::new(number, text)
    }

    /// Every non-whitespace byte of `text` lies inside some span.
    fn assert_full_coverage(text: &str, spans: &[Range<usize>]) {
        for (idx, ch) in text.char_indices() {
            if ch.is_whitespace() {
                continue;
            }
            assert!(
                spans.iter().any(|span| span.contains(&idx)),
                "byte {idx} ({ch:?}) not covered by any chunk"
            );
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk(&[]).is_empty());
        assert!(chunker.chunk(&[PageText::new(1, "   \n\n ")]).is_empty());
    }

    #[test]
    fn small_pages_merge_and_keep_all_page_numbers() {
        let chunker = Chunker::default();
        let pages = vec![
            PageText::new(1, "Page1 text about cells."),
            PageText::new(2, "Page2 text about mitochondria."),
            PageText::new(3, "Page3 text about ribosomes."),
        ];

        let chunks = chunker.chunk(&pages);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_pages, vec![1, 2, 3]);
        assert!(chunks[0].text.contains("Page2 text"));
    }

    #[test]
    fn chunks_respect_size_limit() {
        let chunker = Chunker::new(200, 40);
        let chunks = chunker.chunk(&[sentence_page(1, 80)]);

        assert!(chunks.len() > 5);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 200, "chunk too long: {}", chunk.text.len());
        }
    }

    #[test]
    fn chunks_prefer_sentence_boundaries() {
        let chunker = Chunker::new(200, 40);
        let chunks = chunker.chunk(&[sentence_page(1, 40)]);

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.text.ends_with('.'), "chunk ends mid-sentence: {:?}", chunk.text);
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let chunker = Chunker::new(200, 60);
        let chunks = chunker.chunk(&[sentence_page(1, 30)]);

        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let last_sentence = pair[0]
                .text
                .rsplit(". ")
                .next()
                .unwrap()
                .trim_end_matches('.');
            assert!(
                pair[1].text.contains(last_sentence),
                "expected overlap of {:?} in {:?}",
                last_sentence,
                pair[1].text
            );
        }
    }

    #[test]
    fn single_huge_page_without_separators_is_split_by_characters() {
        let chunker = Chunker::new(100, 20);
        let text = "x".repeat(1050);
        let chunks = chunker.chunk(&[PageText::new(4, text.clone())]);

        assert!(chunks.len() >= 11);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
        assert!(chunks.iter().all(|c| c.source_pages == vec![4]));
        assert_full_coverage(&text, &chunker.split_spans(&text));
    }

    #[test]
    fn spans_cover_all_content() {
        let chunker = Chunker::new(150, 30);
        let text = format!(
            "{}\n\n{}\nshort line\n{}",
            sentence_page(1, 10).text,
            "word ".repeat(90),
            sentence_page(2, 12).text
        );

        let spans = chunker.split_spans(&text);

        assert_full_coverage(&text, &spans);
    }

    #[test]
    fn provenance_only_names_contributing_pages() {
        let chunker = Chunker::new(300, 50);
        let pages = vec![sentence_page(1, 20), sentence_page(2, 20), sentence_page(3, 20)];

        let chunks = chunker.chunk(&pages);

        for chunk in &chunks {
            assert!(!chunk.source_pages.is_empty());
            for page in &chunk.source_pages {
                let marker = format!("Page {page} sentence");
                assert!(
                    chunk.text.contains(&marker),
                    "chunk claims page {page} but has no text from it: {:?}",
                    chunk.text
                );
            }
            for page in &pages {
                let marker = format!("Page {} sentence", page.page_number);
                if chunk.text.contains(&marker) {
                    assert!(chunk.source_pages.contains(&page.page_number));
                }
            }
        }
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let chunker = Chunker::new(60, 10);
        let text = "日本語のテキストです。".repeat(30);
        let chunks = chunker.chunk(&[PageText::new(1, text)]);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 60));
    }

    #[test]
    fn invalid_configuration_falls_back_to_whole_pages() {
        let chunker = Chunker::new(100, 100);
        let pages = vec![PageText::new(1, "first page"), PageText::new(2, "second page")];

        let chunks = chunker.chunk(&pages);

        assert_eq!(
            chunks,
            vec![
                ChunkedText {
                    text: "first page".to_string(),
                    source_pages: vec![1]
                },
                ChunkedText {
                    text: "second page".to_string(),
                    source_pages: vec![2]
                },
            ]
        );
    }
}
