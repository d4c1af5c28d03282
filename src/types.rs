//! Shared error type for the ingestion and retrieval pipeline.

use thiserror::Error;

/// Errors surfaced by the knowledge-base pipeline.
///
/// Per-item crawl failures (one page, one PDF) are *not* represented here;
/// they are logged and skipped where they occur. `KbError` covers the
/// conditions that abort a whole operation: a build, a store transaction,
/// or a query.
#[derive(Debug, Error)]
pub enum KbError {
    /// An HTTP request failed in a way that aborts the operation.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL could not be parsed or resolved.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// Filesystem failure (PDF directory, downloaded documents).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The session store rejected an operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// A PDF document could not be opened or decoded.
    #[error("pdf error: {0}")]
    Pdf(String),

    /// The embedding backend failed or returned malformed vectors.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The answering backend failed.
    #[error("answerer error: {0}")]
    Answer(String),

    /// A document was structurally unusable.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// `start_build` was called while another build holds the slot.
    #[error("a build is already in progress")]
    BuildInProgress,

    /// A query arrived before any snapshot was published.
    #[error("knowledge base is not ready")]
    NotReady,
}
