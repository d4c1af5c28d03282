//! Token-bounded, provenance-tagged chunking of normalized sources.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::extract::{Source, SourceKind};

/// Default word budget per chunk.
pub const DEFAULT_MAX_TOKENS: usize = 600;

/// Fallback windows shorter than this (before the header is prefixed) are
/// discarded as noise.
pub const MIN_FALLBACK_CHARS: usize = 50;

/// One retrieval unit: bounded text carrying structured provenance.
///
/// `text` always begins with the rendered provenance header so the
/// answerer can attribute passages from the text alone; the structured
/// fields are the canonical provenance and the header is a pure render of
/// them. `ordinal` is the chunk's position in its session and lines up
/// one-to-one with the embedding matrix rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_uri: String,
    pub source_kind: SourceKind,
    pub source_title: String,
    pub ordinal: usize,
}

/// Renders the provenance header a chunk's text starts with, e.g.
/// `SOURCE: Admissions (WEB: https://site/admissions)` or
/// `SOURCE: Fee Structure (PDF: fee_structure.pdf)`.
pub fn provenance_header(title: &str, kind: SourceKind, uri: &str) -> String {
    let tag = match kind {
        SourceKind::Web => "WEB",
        SourceKind::Pdf => "PDF",
    };
    format!("SOURCE: {title} ({tag}: {uri})")
}

/// Splits normalized source text into token-bounded chunks.
///
/// Sentences are packed greedily into a buffer seeded with the provenance
/// header; when the next sentence would push the buffer past `max_tokens`
/// words, the buffer closes as one chunk and a new one starts with the
/// header plus that sentence. A sentence is never split across chunks, so
/// a single sentence longer than the budget produces one oversized chunk
/// rather than a truncated sentence.
///
/// If sentence segmentation produces nothing usable, chunking falls back
/// to fixed `max_tokens`-word windows with the header prefixed as free
/// text. The fallback never fails; garbled input degrades chunk quality,
/// not the build.
#[derive(Clone, Debug)]
pub struct Chunker {
    max_tokens: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKENS)
    }
}

impl Chunker {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
        }
    }

    /// Chunks one source. Ordinals are positions within this source's
    /// output; [`ChunkSet`] reassigns them when chunks join a session.
    pub fn chunk(&self, source: &Source) -> Vec<Chunk> {
        let header = provenance_header(&source.title, source.kind, &source.uri);
        let sentences: Vec<&str> = source
            .text
            .unicode_sentences()
            .map(str::trim)
            .filter(|sentence| !sentence.is_empty())
            .collect();

        if sentences.is_empty() {
            return self.window_fallback(source, &header);
        }

        let header_words = word_count(&header);
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut buffer: Vec<&str> = Vec::new();
        let mut words = header_words;

        for sentence in sentences {
            let sentence_words = word_count(sentence);
            if words + sentence_words <= self.max_tokens {
                buffer.push(sentence);
                words += sentence_words;
            } else {
                chunks.push(self.assemble(source, &header, &buffer, chunks.len()));
                buffer.clear();
                buffer.push(sentence);
                words = header_words + sentence_words;
            }
        }

        // Flush the tail only if it holds more than the header.
        if !buffer.is_empty() {
            chunks.push(self.assemble(source, &header, &buffer, chunks.len()));
        }

        chunks
    }

    fn assemble(&self, source: &Source, header: &str, sentences: &[&str], ordinal: usize) -> Chunk {
        let mut text = header.to_string();
        for sentence in sentences {
            text.push(' ');
            text.push_str(sentence);
        }
        Chunk {
            text,
            source_uri: source.uri.clone(),
            source_kind: source.kind,
            source_title: source.title.clone(),
            ordinal,
        }
    }

    fn window_fallback(&self, source: &Source, header: &str) -> Vec<Chunk> {
        let words: Vec<&str> = source.text.split_whitespace().collect();
        let mut chunks = Vec::new();
        for window in words.chunks(self.max_tokens) {
            let body = window.join(" ");
            if body.trim().len() <= MIN_FALLBACK_CHARS {
                continue;
            }
            chunks.push(Chunk {
                text: format!("{header} - {body}"),
                source_uri: source.uri.clone(),
                source_kind: source.kind,
                source_title: source.title.clone(),
                ordinal: chunks.len(),
            });
        }
        chunks
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Session-wide chunk accumulator: exact-text dedup, first occurrence
/// wins, ordinals assigned in insertion order.
#[derive(Debug, Default)]
pub struct ChunkSet {
    chunks: Vec<Chunk>,
    seen: HashSet<String>,
}

impl ChunkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk unless an identical text is already present. Returns
    /// whether the chunk was kept.
    pub fn push(&mut self, mut chunk: Chunk) -> bool {
        if self.seen.contains(&chunk.text) {
            return false;
        }
        self.seen.insert(chunk.text.clone());
        chunk.ordinal = self.chunks.len();
        self.chunks.push(chunk);
        true
    }

    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        for chunk in chunks {
            self.push(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}
