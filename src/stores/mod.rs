//! Session persistence: traits, row types, and the embedding blob codec.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunking::Chunk;
use crate::types::KbError;

pub use sqlite::SqliteSessionStore;

/// Counters describing one completed build.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_crawled: usize,
    pub pdfs_processed: usize,
    pub chunks_created: usize,
    pub base_url: String,
}

/// A PDF downloaded during a crawl, recorded for audit alongside the
/// session it fed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PdfRecord {
    pub url: String,
    pub filename: String,
    pub path: String,
}

/// A knowledge-base session loaded back from storage.
#[derive(Clone, Debug)]
pub struct PersistedSession {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub stats: CrawlStats,
    pub chunks: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}

/// Aggregate numbers over everything the store holds.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreStats {
    pub sessions: usize,
    pub active_sessions: usize,
    pub chunks: usize,
    pub pdf_documents: usize,
}

/// Storage backend for knowledge-base sessions.
///
/// Sessions are soft-versioned: saving a new one marks every prior session
/// inactive rather than deleting it, so a load always sees the newest
/// active session and history stays queryable.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Persists a complete session atomically and returns its id. Prior
    /// active sessions are deactivated in the same transaction.
    async fn save(
        &self,
        stats: &CrawlStats,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        dimensions: usize,
        pdfs: &[PdfRecord],
    ) -> Result<i64, KbError>;

    /// Loads the most recent active session, or `None` when the store is
    /// empty or the stored data is internally inconsistent.
    async fn load_latest(&self) -> Result<Option<PersistedSession>, KbError>;

    /// Marks every session inactive. The next load starts from nothing.
    async fn deactivate_all(&self) -> Result<(), KbError>;

    async fn stats(&self) -> Result<StoreStats, KbError>;
}

/// Packs an embedding matrix into a little-endian f32 byte blob, row-major.
pub fn encode_embeddings(rows: &[Vec<f32>]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(rows.iter().map(|row| row.len() * 4).sum());
    for row in rows {
        for value in row {
            blob.extend_from_slice(&value.to_le_bytes());
        }
    }
    blob
}

/// Unpacks an embedding blob. Returns `None` unless the byte count matches
/// `rows * dimensions * 4` exactly.
pub fn decode_embeddings(blob: &[u8], dimensions: usize, rows: usize) -> Option<Vec<Vec<f32>>> {
    if dimensions == 0 || blob.len() != rows * dimensions * 4 {
        return None;
    }
    let mut matrix = Vec::with_capacity(rows);
    for row_bytes in blob.chunks_exact(dimensions * 4) {
        let row: Vec<f32> = row_bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        matrix.push(row);
    }
    Some(matrix)
}
