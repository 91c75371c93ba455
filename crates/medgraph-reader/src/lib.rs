//! Medgraph Reader - Page-level document text extraction
//!
//! Extracts raw per-page text from a PDF and hands ordered `Page` records
//! to the pipeline. The reader is the only component that touches the
//! source document; everything downstream works from the persisted page
//! store. An invalid page range is fatal and raised immediately, never
//! retried.

use std::path::Path;

use thiserror::Error;

use medgraph_core::Page;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while reading the source document
#[derive(Error, Debug)]
pub enum ReaderError {
    /// IO error while reading the file
    #[error("IO error reading file: {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// PDF text extraction error
    #[error("PDF parsing error: {0}")]
    Pdf(String),

    /// Requested page range is outside the document or inverted
    #[error("invalid page range {start}..={end} for a {page_count}-page document")]
    InvalidPageRange {
        start: u32,
        end: u32,
        page_count: u32,
    },
}

pub type Result<T> = std::result::Result<T, ReaderError>;

// ============================================================================
// Reader
// ============================================================================

/// Read the document and return pages in the requested inclusive range.
///
/// Omitted bounds default to the first and last page. Fails with
/// `InvalidPageRange` if `start > end` or either bound falls outside
/// `[1, page_count]`.
pub fn read_pages(
    path: &Path,
    start_page: Option<u32>,
    end_page: Option<u32>,
) -> Result<Vec<Page>> {
    let bytes = std::fs::read(path).map_err(|e| ReaderError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let text =
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ReaderError::Pdf(e.to_string()))?;

    let pages = paginate(&text);
    tracing::info!(
        path = %path.display(),
        page_count = pages.len(),
        "Extracted page text from document"
    );

    select_range(pages, start_page, end_page)
}

/// Split extracted text into 1-based pages on form-feed page breaks.
///
/// Empty pages are kept so page numbering stays aligned with the source
/// document; they contribute no lines downstream.
pub fn paginate(text: &str) -> Vec<Page> {
    text.split('\x0C')
        .enumerate()
        .map(|(i, page_text)| Page {
            number: i as u32 + 1,
            text: page_text.to_string(),
        })
        .collect()
}

/// Keep only pages in the inclusive `[start, end]` range, validating bounds.
pub fn select_range(
    pages: Vec<Page>,
    start_page: Option<u32>,
    end_page: Option<u32>,
) -> Result<Vec<Page>> {
    let page_count = pages.len() as u32;
    let start = start_page.unwrap_or(1);
    let end = end_page.unwrap_or(page_count);

    if start > end || start < 1 || end > page_count {
        return Err(ReaderError::InvalidPageRange {
            start,
            end,
            page_count,
        });
    }

    Ok(pages
        .into_iter()
        .filter(|p| p.number >= start && p.number <= end)
        .collect())
}
