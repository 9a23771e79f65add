//! File extraction collaborator.
//!
//! Format-specific extraction (PDF, DOCX, OCR) lives outside this crate and
//! plugs in through [`Extractor`]. The built-in [`PlainTextExtractor`]
//! handles text-like files.

use std::path::Path;

use async_trait::async_trait;

use super::chunker::PageText;
use crate::core::errors::ApiError;

/// Characters per synthetic page for formats without real pagination.
pub const PLAIN_TEXT_PAGE_CHARS: usize = 2000;

const PAGE_BREAK: char = '\u{0c}';

const TEXT_EXTENSIONS: [&str; 7] = ["txt", "md", "markdown", "csv", "json", "rst", "log"];

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Ordered pages of text. An empty vector means "no content".
    async fn extract(&self, path: &Path) -> Result<Vec<PageText>, ApiError>;
}

#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    page_chars: usize,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            page_chars: PLAIN_TEXT_PAGE_CHARS,
        }
    }
}

impl PlainTextExtractor {
    pub fn with_page_chars(page_chars: usize) -> Self {
        Self {
            page_chars: page_chars.max(1),
        }
    }

    pub fn supports(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Form feeds are honoured as page breaks; otherwise pages are cut at
    /// paragraph boundaries near `page_chars`.
    pub fn paginate(&self, text: &str) -> Vec<PageText> {
        let raw_pages: Vec<String> = if text.contains(PAGE_BREAK) {
            text.split(PAGE_BREAK).map(str::to_string).collect()
        } else {
            self.split_by_length(text)
        };

        raw_pages
            .into_iter()
            .enumerate()
            .filter(|(_, page)| !page.trim().is_empty())
            .map(|(idx, page)| PageText::new(idx as u32 + 1, page.trim().to_string()))
            .collect()
    }

    fn split_by_length(&self, text: &str) -> Vec<String> {
        let mut pages = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;

        for paragraph in text.split_inclusive("\n\n") {
            let paragraph_chars = paragraph.chars().count();
            if current_chars > 0 && current_chars + paragraph_chars > self.page_chars {
                pages.push(std::mem::take(&mut current));
                current_chars = 0;
            }

            if paragraph_chars > self.page_chars {
                let chars: Vec<char> = paragraph.chars().collect();
                for piece in chars.chunks(self.page_chars) {
                    pages.push(piece.iter().collect());
                }
                continue;
            }

            current.push_str(paragraph);
            current_chars += paragraph_chars;
        }

        if !current.is_empty() {
            pages.push(current);
        }
        pages
    }
}

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<Vec<PageText>, ApiError> {
        if !Self::supports(path) {
            return Err(ApiError::Extraction(format!(
                "Unsupported file type: {}",
                path.display()
            )));
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::Extraction(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let text = String::from_utf8_lossy(&bytes);

        Ok(self.paginate(&text))
    }
}
