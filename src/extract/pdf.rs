//! PDF text extraction built on `lopdf`.

use lopdf::Document;
use tracing::debug;

use crate::normalize::normalize;
use crate::types::KbError;

/// Extracts the text of a PDF document, page by page.
///
/// Blank pages are skipped; surviving pages are normalized and joined with
/// a single newline. Returns `Ok(None)` when no page yields non-blank text
/// (a scanned or image-only document), which callers treat as "skip this
/// document". An unreadable document is an `Err` — still only fatal for
/// that one document.
pub fn extract_text(bytes: &[u8]) -> Result<Option<String>, KbError> {
    let document = Document::load_mem(bytes).map_err(|err| KbError::Pdf(err.to_string()))?;

    let mut pages = Vec::new();
    for (page_number, _object_id) in document.get_pages() {
        let text = match document.extract_text(&[page_number]) {
            Ok(text) => text,
            Err(err) => {
                debug!(page_number, %err, "skipping unreadable pdf page");
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }
        pages.push(normalize(&text));
    }

    if pages.is_empty() {
        Ok(None)
    } else {
        Ok(Some(pages.join("\n")))
    }
}

/// Display title derived from a PDF filename: extension stripped,
/// underscores spaced, words capitalized (`fee_structure.pdf` →
/// `Fee Structure`).
pub fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .strip_suffix(".pdf")
        .or_else(|| filename.strip_suffix(".PDF"))
        .unwrap_or(filename);
    stem.replace('_', " ")
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
