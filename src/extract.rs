//! Page-bounded plain text extraction from PDF bytes.

use lopdf::Document;
use thiserror::Error;

pub const DEFAULT_MAX_PAGES: usize = 30;

/// Returned instead of an empty string when no page carried any text.
pub const NO_TEXT_SENTINEL: &str = "(No text could be extracted from this PDF)";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to extract text from PDF: {0}")]
    Parse(#[from] lopdf::Error),
}

/// Something that can hand out text one page at a time. Pages are 1-based.
pub trait PageSource {
    fn page_count(&self) -> usize;
    fn page_text(&self, page: u32) -> Result<String, ExtractionError>;
}

impl PageSource for Document {
    fn page_count(&self) -> usize {
        self.get_pages().len()
    }

    fn page_text(&self, page: u32) -> Result<String, ExtractionError> {
        Ok(self.extract_text(&[page])?)
    }
}

/// Parse `bytes` as a PDF and render up to `max_pages` pages of text.
pub fn extract_text(bytes: &[u8], max_pages: usize) -> Result<String, ExtractionError> {
    let doc = Document::load_mem(bytes)?;
    Ok(render_pages(&doc, max_pages))
}

/// Pages `1..=min(count, max_pages)` in order, each under a `## Page N`
/// header. Blank pages are skipped entirely; a page whose text cannot be
/// decoded counts as blank.
pub fn render_pages<S: PageSource + ?Sized>(source: &S, max_pages: usize) -> String {
    let last = source.page_count().min(max_pages);
    let mut pages_text: Vec<String> = Vec::new();

    for page in 1..=last as u32 {
        let text = match source.page_text(page) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(page, "skipping undecodable page: {}", e);
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        pages_text.push(format!("## Page {}\n\n{}", page, text));
    }

    let full_text = pages_text.join("\n\n");
    if full_text.trim().is_empty() {
        tracing::warn!(pages = last, "no text extracted from PDF");
        return NO_TEXT_SENTINEL.to_string();
    }
    full_text
}
