//! The knowledge engine: build orchestration, readiness, retrieval, and
//! query answering.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::answer::{Answerer, DEFAULT_SUGGESTIONS};
use crate::chunking::{Chunk, ChunkSet, Chunker, provenance_header};
use crate::config::EngineConfig;
use crate::crawler::Crawler;
use crate::embeddings::Embedder;
use crate::extract::SourceKind;
use crate::index::VectorIndex;
use crate::stores::{CrawlStats, SessionBackend};
use crate::types::KbError;

/// Where a published snapshot's data came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Store,
    FreshCrawl,
}

/// How to obtain the knowledge base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildMode {
    /// Reuse the newest persisted session when one exists; crawl only
    /// when the store is empty.
    LoadOrBuild,
    /// Deactivate stored sessions and crawl from scratch.
    ForceRebuild,
}

/// One immutable, fully built knowledge base. Queries run against a
/// snapshot; a rebuild publishes a new one atomically and never mutates
/// the one in flight.
pub struct Snapshot {
    pub chunks: Vec<Chunk>,
    pub index: VectorIndex,
    pub stats: CrawlStats,
    pub built_at: DateTime<Utc>,
    pub source: DataSource,
}

/// Swap point between builds and queries: readers grab an `Arc` to the
/// current snapshot, a finished build swaps in the next. A failed build
/// never unpublishes the snapshot already serving.
#[derive(Default)]
struct ReadinessGuard {
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl ReadinessGuard {
    fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.current.write() = Some(snapshot);
    }

    fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }
}

/// Point-in-time view of the engine for health endpoints.
#[derive(Clone, Debug, Serialize)]
pub struct EngineStatus {
    pub ready: bool,
    pub building: bool,
    pub chunk_count: usize,
    pub pages_crawled: usize,
    pub pdfs_processed: usize,
    pub last_build_time: Option<DateTime<Utc>>,
    pub source: Option<DataSource>,
    pub last_error: Option<String>,
}

/// One prior question/answer pair from the conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// The engine's reply to one question.
#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub suggestions: Vec<String>,
    /// Up to three unique web URLs the retrieved passages came from.
    pub sources: Vec<String>,
}

/// Ties the whole pipeline together: crawls a site, chunks and embeds its
/// content, persists the session, and answers questions against the
/// published snapshot.
pub struct KnowledgeEngine {
    config: EngineConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn SessionBackend>,
    answerer: Arc<dyn Answerer>,
    guard: ReadinessGuard,
    building: AtomicBool,
    last_error: RwLock<Option<String>>,
    last_build_time: RwLock<Option<DateTime<Utc>>>,
}

impl KnowledgeEngine {
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn SessionBackend>,
        answerer: Arc<dyn Answerer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            embedder,
            store,
            answerer,
            guard: ReadinessGuard::default(),
            building: AtomicBool::new(false),
            last_error: RwLock::new(None),
            last_build_time: RwLock::new(None),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.guard.is_ready()
    }

    pub fn status(&self) -> EngineStatus {
        let snapshot = self.guard.snapshot();
        EngineStatus {
            ready: snapshot.is_some(),
            building: self.building.load(Ordering::Acquire),
            chunk_count: snapshot.as_ref().map_or(0, |s| s.chunks.len()),
            pages_crawled: snapshot.as_ref().map_or(0, |s| s.stats.pages_crawled),
            pdfs_processed: snapshot.as_ref().map_or(0, |s| s.stats.pdfs_processed),
            last_build_time: *self.last_build_time.read(),
            source: snapshot.as_ref().map(|s| s.source),
            last_error: self.last_error.read().clone(),
        }
    }

    /// Kicks off a build in the background. At most one build runs at a
    /// time; a second request while one is in flight is rejected.
    pub fn start_build(self: &Arc<Self>, mode: BuildMode) -> Result<(), KbError> {
        self.claim_build_slot()?;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let result = engine.execute_build(mode).await;
            engine.finish_build(&result);
        });
        Ok(())
    }

    /// Runs a build to completion on the current task. Same single-build
    /// guarantee as [`start_build`](Self::start_build).
    pub async fn run_build_now(&self, mode: BuildMode) -> Result<(), KbError> {
        self.claim_build_slot()?;
        let result = self.execute_build(mode).await;
        self.finish_build(&result);
        result
    }

    fn claim_build_slot(&self) -> Result<(), KbError> {
        self.building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| KbError::BuildInProgress)?;
        Ok(())
    }

    fn finish_build(&self, result: &Result<(), KbError>) {
        match result {
            Ok(()) => {
                *self.last_error.write() = None;
                *self.last_build_time.write() = Some(Utc::now());
            }
            Err(err) => {
                error!(%err, "build failed");
                *self.last_error.write() = Some(err.to_string());
            }
        }
        self.building.store(false, Ordering::Release);
    }

    async fn execute_build(&self, mode: BuildMode) -> Result<(), KbError> {
        if mode == BuildMode::ForceRebuild {
            self.store.deactivate_all().await?;
        } else if let Some(session) = self.store.load_latest().await? {
            if session.dimensions == self.embedder.dimensions() {
                let index = VectorIndex::attach(Arc::clone(&self.embedder), session.embeddings)?;
                info!(
                    session_id = session.id,
                    chunks = session.chunks.len(),
                    "loaded knowledge base from store"
                );
                self.guard.publish(Arc::new(Snapshot {
                    chunks: session.chunks,
                    index,
                    stats: session.stats,
                    built_at: session.created_at,
                    source: DataSource::Store,
                }));
                return Ok(());
            }
            warn!(
                stored = session.dimensions,
                configured = self.embedder.dimensions(),
                "stored embeddings have the wrong dimension, rebuilding"
            );
        }

        let outcome = Crawler::new(&self.config)?.crawl().await?;

        let chunker = Chunker::new(self.config.max_tokens);
        let mut set = ChunkSet::new();
        for source in &outcome.sources {
            set.extend(chunker.chunk(source));
        }
        if set.is_empty() {
            // An empty site still becomes ready: one placeholder chunk, so
            // queries answer honestly instead of erroring forever.
            warn!(base = %self.config.base_url, "crawl produced no usable content");
            let base = self.config.base_url.as_str();
            let header = provenance_header("No Content", SourceKind::Web, base);
            set.push(Chunk {
                text: format!("{header} No content could be extracted from this website."),
                source_uri: base.to_string(),
                source_kind: SourceKind::Web,
                source_title: "No Content".to_string(),
                ordinal: 0,
            });
        }
        let chunks = set.into_chunks();

        let index = VectorIndex::build(Arc::clone(&self.embedder), &chunks).await?;
        let stats = CrawlStats {
            pages_crawled: outcome.pages_crawled,
            pdfs_processed: outcome.pdfs_processed,
            chunks_created: chunks.len(),
            base_url: self.config.base_url.as_str().to_string(),
        };

        let session_id = self
            .store
            .save(
                &stats,
                &chunks,
                index.rows(),
                self.embedder.dimensions(),
                &outcome.pdf_records,
            )
            .await?;
        info!(session_id, chunks = chunks.len(), "knowledge base built");

        self.guard.publish(Arc::new(Snapshot {
            chunks,
            index,
            stats,
            built_at: Utc::now(),
            source: DataSource::FreshCrawl,
        }));
        Ok(())
    }

    /// Retrieves the `k` most relevant chunks for a question. Degrades
    /// gracefully: an unready engine or a failed embedding yields an empty
    /// result rather than an error.
    pub async fn search(&self, question: &str, k: usize) -> Vec<Chunk> {
        let Some(snapshot) = self.guard.snapshot() else {
            return Vec::new();
        };
        match snapshot.index.search(question, k).await {
            Ok(hits) => hits
                .into_iter()
                .filter_map(|ordinal| snapshot.chunks.get(ordinal).cloned())
                .collect(),
            Err(err) => {
                warn!(%err, "retrieval failed");
                Vec::new()
            }
        }
    }

    /// Answers a question against the published snapshot. Retrieval uses
    /// the bare question and degrades to empty context on failure; the
    /// answerer sees the question with recent history folded in. Only
    /// answerer errors surface to the caller.
    pub async fn query(
        &self,
        question: &str,
        history: &[Exchange],
    ) -> Result<QueryResponse, KbError> {
        let Some(snapshot) = self.guard.snapshot() else {
            return Err(KbError::NotReady);
        };

        let hits = match snapshot.index.search(question, self.config.top_k).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(%err, "retrieval failed, answering without context");
                Vec::new()
            }
        };
        let passages: Vec<&Chunk> = hits
            .iter()
            .filter_map(|&ordinal| snapshot.chunks.get(ordinal))
            .collect();

        let context: Vec<String> = passages.iter().map(|chunk| chunk.text.clone()).collect();
        let prompt = self.prompt_with_history(question, history);
        let answer = self.answerer.answer(&prompt, &context).await?;

        let suggestions = match self.answerer.suggest(question, &answer).await {
            Ok(suggestions) if !suggestions.is_empty() => suggestions,
            Ok(_) => default_suggestions(),
            Err(err) => {
                warn!(%err, "suggestion generation failed, using defaults");
                default_suggestions()
            }
        };

        Ok(QueryResponse {
            answer,
            suggestions,
            sources: web_sources(&passages),
        })
    }

    /// Question text sent to the answerer: the last few exchanges (answers
    /// truncated) followed by the new question, so follow-ups like "what
    /// about fees?" are answered in context.
    fn prompt_with_history(&self, question: &str, history: &[Exchange]) -> String {
        let window_start = history.len().saturating_sub(self.config.history_window);
        let mut parts: Vec<String> = Vec::new();
        for exchange in &history[window_start..] {
            let truncated: String = exchange
                .answer
                .chars()
                .take(self.config.history_answer_chars)
                .collect();
            parts.push(format!("Previous: {} Answer: {truncated}", exchange.question));
        }
        parts.push(question.to_string());
        parts.join(" ")
    }
}

fn default_suggestions() -> Vec<String> {
    DEFAULT_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}

/// Unique web URLs among the retrieved passages, rank order preserved,
/// capped at three. PDF passages contribute no link.
fn web_sources(passages: &[&Chunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for chunk in passages {
        if chunk.source_kind != SourceKind::Web {
            continue;
        }
        if sources.iter().any(|existing| existing == &chunk.source_uri) {
            continue;
        }
        sources.push(chunk.source_uri.clone());
        if sources.len() == 3 {
            break;
        }
    }
    sources
}
