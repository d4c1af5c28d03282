//! SQLite session backend built on `tokio-rusqlite`.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use tracing::{info, warn};

use crate::chunking::Chunk;
use crate::extract::SourceKind;
use crate::types::KbError;

use super::{
    CrawlStats, PdfRecord, PersistedSession, SessionBackend, StoreStats, decode_embeddings,
    encode_embeddings,
};

const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at      TEXT NOT NULL,
    pages_crawled   INTEGER NOT NULL,
    pdfs_processed  INTEGER NOT NULL,
    chunks_created  INTEGER NOT NULL,
    base_url        TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'active'
                    CHECK (status IN ('active', 'inactive'))
);
CREATE TABLE IF NOT EXISTS content_chunks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id   INTEGER NOT NULL REFERENCES crawl_sessions(id),
    chunk_index  INTEGER NOT NULL,
    chunk_text   TEXT NOT NULL,
    source_uri   TEXT NOT NULL,
    source_kind  TEXT NOT NULL CHECK (source_kind IN ('web', 'pdf')),
    source_title TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_session ON content_chunks(session_id);
CREATE TABLE IF NOT EXISTS embeddings_data (
    session_id INTEGER PRIMARY KEY REFERENCES crawl_sessions(id),
    embedding  BLOB NOT NULL,
    dimension  INTEGER NOT NULL,
    rows       INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS pdf_documents (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id   INTEGER NOT NULL REFERENCES crawl_sessions(id),
    filename     TEXT NOT NULL,
    original_url TEXT NOT NULL,
    file_path    TEXT NOT NULL,
    processed_at TEXT NOT NULL
);
";

/// Knowledge-base session store backed by a single SQLite file.
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    /// Opens (creating if needed) the database and runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, KbError> {
        let conn = Connection::open(path)
            .await
            .map_err(|err| KbError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(MIGRATIONS)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| KbError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests.
    pub async fn open_in_memory() -> Result<Self, KbError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| KbError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(MIGRATIONS)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(|err| KbError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionStore {
    async fn save(
        &self,
        stats: &CrawlStats,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        dimensions: usize,
        pdfs: &[PdfRecord],
    ) -> Result<i64, KbError> {
        if chunks.len() != embeddings.len() {
            return Err(KbError::Storage(format!(
                "{} chunks but {} embedding rows",
                chunks.len(),
                embeddings.len()
            )));
        }
        let stats = stats.clone();
        let chunks = chunks.to_vec();
        let blob = encode_embeddings(embeddings);
        let rows = embeddings.len();
        let pdfs = pdfs.to_vec();
        let now = Utc::now().to_rfc3339();

        let session_id = self
            .conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                tx.execute(
                    "UPDATE crawl_sessions SET status = 'inactive' WHERE status = 'active'",
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                tx.execute(
                    "INSERT INTO crawl_sessions
                       (created_at, pages_crawled, pdfs_processed, chunks_created, base_url, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
                    (
                        &now,
                        stats.pages_crawled as i64,
                        stats.pdfs_processed as i64,
                        stats.chunks_created as i64,
                        &stats.base_url,
                    ),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let session_id = tx.last_insert_rowid();

                {
                    let mut insert_chunk = tx
                        .prepare(
                            "INSERT INTO content_chunks
                               (session_id, chunk_index, chunk_text, source_uri, source_kind, source_title)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    for chunk in &chunks {
                        insert_chunk
                            .execute((
                                session_id,
                                chunk.ordinal as i64,
                                &chunk.text,
                                &chunk.source_uri,
                                chunk.source_kind.as_str(),
                                &chunk.source_title,
                            ))
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    }
                }

                tx.execute(
                    "INSERT INTO embeddings_data (session_id, embedding, dimension, rows)
                     VALUES (?1, ?2, ?3, ?4)",
                    (session_id, &blob, dimensions as i64, rows as i64),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                {
                    let mut insert_pdf = tx
                        .prepare(
                            "INSERT INTO pdf_documents
                               (session_id, filename, original_url, file_path, processed_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    for pdf in &pdfs {
                        insert_pdf
                            .execute((session_id, &pdf.filename, &pdf.url, &pdf.path, &now))
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    }
                }

                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(session_id)
            })
            .await
            .map_err(|err| KbError::Storage(err.to_string()))?;

        info!(session_id, chunks = rows, "session saved");
        Ok(session_id)
    }

    async fn load_latest(&self) -> Result<Option<PersistedSession>, KbError> {
        let loaded = self
            .conn
            .call(|conn| {
                use tokio_rusqlite::OptionalExtension;

                let header = conn
                    .query_row(
                        "SELECT id, created_at, pages_crawled, pdfs_processed, chunks_created, base_url
                         FROM crawl_sessions WHERE status = 'active'
                         ORDER BY id DESC LIMIT 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, i64>(2)?,
                                row.get::<_, i64>(3)?,
                                row.get::<_, i64>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let Some((id, created_at, pages, pdfs, chunk_count, base_url)) = header else {
                    return Ok(None);
                };

                let mut stmt = conn
                    .prepare(
                        "SELECT chunk_index, chunk_text, source_uri, source_kind, source_title
                         FROM content_chunks WHERE session_id = ?1
                         ORDER BY chunk_index ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let chunk_rows = stmt
                    .query_map([id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut chunks: Vec<Chunk> = Vec::new();
                for row in chunk_rows {
                    let (ordinal, text, uri, kind, title) =
                        row.map_err(tokio_rusqlite::Error::Rusqlite)?;
                    let Some(kind) = SourceKind::parse(&kind) else {
                        return Ok(None);
                    };
                    chunks.push(Chunk {
                        text,
                        source_uri: uri,
                        source_kind: kind,
                        source_title: title,
                        ordinal: ordinal as usize,
                    });
                }

                let embedding_row = conn
                    .query_row(
                        "SELECT embedding, dimension, rows FROM embeddings_data WHERE session_id = ?1",
                        [id],
                        |row| {
                            Ok((
                                row.get::<_, Vec<u8>>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, i64>(2)?,
                            ))
                        },
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                Ok(Some((
                    id,
                    created_at,
                    pages,
                    pdfs,
                    chunk_count,
                    base_url,
                    chunks,
                    embedding_row,
                )))
            })
            .await
            .map_err(|err| KbError::Storage(err.to_string()))?;

        let Some((id, created_at, pages, pdfs, _chunk_count, base_url, chunks, embedding_row)) =
            loaded
        else {
            return Ok(None);
        };

        let Some((blob, dimensions, rows)) = embedding_row else {
            warn!(session_id = id, "active session has no embedding blob");
            return Ok(None);
        };
        let dimensions = dimensions as usize;
        if rows as usize != chunks.len() {
            warn!(
                session_id = id,
                rows, chunks = chunks.len(),
                "embedding row count disagrees with chunk count"
            );
            return Ok(None);
        }
        let Some(embeddings) = decode_embeddings(&blob, dimensions, chunks.len()) else {
            warn!(session_id = id, "embedding blob has the wrong byte length");
            return Ok(None);
        };

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(PersistedSession {
            id,
            created_at,
            stats: CrawlStats {
                pages_crawled: pages as usize,
                pdfs_processed: pdfs as usize,
                chunks_created: chunks.len(),
                base_url,
            },
            chunks,
            embeddings,
            dimensions,
        }))
    }

    async fn deactivate_all(&self) -> Result<(), KbError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "UPDATE crawl_sessions SET status = 'inactive' WHERE status = 'active'",
                    [],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| KbError::Storage(err.to_string()))
    }

    async fn stats(&self) -> Result<StoreStats, KbError> {
        self.conn
            .call(|conn| {
                let count = |sql: &str| -> Result<usize, tokio_rusqlite::Error> {
                    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                        .map(|n| n as usize)
                        .map_err(tokio_rusqlite::Error::Rusqlite)
                };
                Ok(StoreStats {
                    sessions: count("SELECT COUNT(*) FROM crawl_sessions")?,
                    active_sessions: count(
                        "SELECT COUNT(*) FROM crawl_sessions WHERE status = 'active'",
                    )?,
                    chunks: count("SELECT COUNT(*) FROM content_chunks")?,
                    pdf_documents: count("SELECT COUNT(*) FROM pdf_documents")?,
                })
            })
            .await
            .map_err(|err| KbError::Storage(err.to_string()))
    }
}
