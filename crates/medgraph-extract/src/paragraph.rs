//! Paragraph reconstruction from page-level text.
//!
//! A paragraph ends at a blank line within a page; a paragraph still open
//! at the end of a page continues into the first non-blank line of the
//! next page. Every page whose lines were appended into the accumulating
//! buffer is recorded in the paragraph's provenance before it closes.
//!
//! This is a structural, non-semantic pass: it never calls the
//! text-generation service.

use std::collections::BTreeSet;

use medgraph_core::{Page, Paragraph};

/// Turn ordered page text into ordered provenance-tagged paragraphs.
pub fn reconstruct_paragraphs(pages: &[Page]) -> Vec<Paragraph> {
    let mut paragraphs = Vec::new();
    let mut text = String::new();
    let mut source_pages: BTreeSet<u32> = BTreeSet::new();

    for page in pages {
        for line in page.text.lines() {
            let line = line.trim();
            if line.is_empty() {
                if !text.is_empty() {
                    paragraphs.push(Paragraph {
                        text: std::mem::take(&mut text),
                        source_pages: std::mem::take(&mut source_pages),
                    });
                }
            } else {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(line);
                source_pages.insert(page.number);
            }
        }
    }

    // Trailing open paragraph at end-of-input is flushed as-is
    if !text.is_empty() {
        paragraphs.push(Paragraph { text, source_pages });
    }

    paragraphs
}
