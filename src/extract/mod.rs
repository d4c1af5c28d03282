//! Turning fetched documents into normalized text with provenance.
//!
//! Two extractors share the same output shape: [`html`] for crawled pages
//! and [`pdf`] for downloaded documents. Both run their output through
//! [`crate::normalize::normalize`] before it reaches the chunker.

pub mod html;
pub mod pdf;

use serde::{Deserialize, Serialize};

/// Where a piece of content came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Web,
    Pdf,
}

impl SourceKind {
    /// Stable lowercase tag used in storage and provenance headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Web => "web",
            SourceKind::Pdf => "pdf",
        }
    }

    /// Parses the storage tag written by [`SourceKind::as_str`].
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "web" => Some(SourceKind::Web),
            "pdf" => Some(SourceKind::Pdf),
            _ => None,
        }
    }
}

/// One crawled unit of content, immutable once extracted.
///
/// For web pages `uri` is the canonical page URL; for PDFs it is the local
/// filename the document was saved under, which is also what provenance
/// headers display.
#[derive(Clone, Debug)]
pub struct Source {
    pub uri: String,
    pub kind: SourceKind,
    pub title: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_round_trips() {
        for kind in [SourceKind::Web, SourceKind::Pdf] {
            assert_eq!(SourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SourceKind::parse("doc"), None);
    }
}
