//! Website-to-knowledge-base pipeline: crawl a site, distill its pages and
//! PDFs into provenance-tagged chunks, embed them into a searchable index,
//! and answer questions against the result.
//!
//! ```text
//!   seed URL
//!      |
//!   [crawler]  -- pages --> [extract::html] --\
//!      |                                      +--> [chunking] --> [index]
//!      \------- PDFs  ----> [extract::pdf] --/                       |
//!                                                                    v
//!   [stores::sqlite]  <---- session (chunks + embeddings) ----  [engine]
//!                                                                    |
//!   question + history  ------------------------------------->   [answer]
//! ```
//!
//! The [`engine::KnowledgeEngine`] owns the whole flow. Builds run one at
//! a time and publish immutable snapshots; queries always see a complete
//! knowledge base or a clean "not ready".

pub mod answer;
pub mod chunking;
pub mod config;
pub mod crawler;
pub mod embeddings;
pub mod engine;
pub mod extract;
pub mod index;
pub mod normalize;
pub mod stores;
pub mod types;

pub use answer::{Answerer, HttpAnswerer};
pub use chunking::{Chunk, ChunkSet, Chunker};
pub use config::EngineConfig;
pub use crawler::{CrawlOutcome, Crawler};
pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder};
pub use engine::{BuildMode, EngineStatus, Exchange, KnowledgeEngine, QueryResponse};
pub use extract::{Source, SourceKind};
pub use index::{FlatIndex, VectorIndex};
pub use stores::{CrawlStats, SessionBackend, SqliteSessionStore};
pub use types::KbError;
