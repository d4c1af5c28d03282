//! In-memory vector index: brute-force nearest-neighbor over the session's
//! embedding matrix.

use std::sync::Arc;

use tracing::debug;

use crate::chunking::Chunk;
use crate::embeddings::Embedder;
use crate::types::KbError;

/// Flat (exhaustive) index over fixed-dimension vectors.
///
/// Search is a linear scan by squared L2 distance. Ties break toward the
/// lower row index, so results are deterministic for a given matrix.
#[derive(Clone, Debug)]
pub struct FlatIndex {
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Appends a vector. Row index equals the chunk ordinal it represents.
    pub fn add(&mut self, vector: Vec<f32>) -> Result<(), KbError> {
        if vector.len() != self.dimensions {
            return Err(KbError::Embedding(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimensions
            )));
        }
        self.vectors.push(vector);
        Ok(())
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Indices of the `k` nearest rows to `query`, nearest first. Returns
    /// fewer than `k` when the index holds fewer rows, and nothing at all
    /// when it is empty.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<usize> {
        if self.vectors.is_empty() || k == 0 || query.len() != self.dimensions {
            return Vec::new();
        }
        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(row, vector)| (squared_l2(query, vector), row))
            .collect();
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);
        scored.into_iter().map(|(_, row)| row).collect()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// A flat index paired with the embedder that produced (and queries) it.
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    flat: FlatIndex,
}

impl VectorIndex {
    /// Embeds every chunk in order and builds the index. Row `i` holds the
    /// vector for chunk ordinal `i`.
    pub async fn build(embedder: Arc<dyn Embedder>, chunks: &[Chunk]) -> Result<Self, KbError> {
        let mut flat = FlatIndex::new(embedder.dimensions());
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        for batch in texts.chunks(embedder.max_batch().max(1)) {
            let vectors = embedder.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(KbError::Embedding(format!(
                    "embedder returned {} vectors for a batch of {}",
                    vectors.len(),
                    batch.len()
                )));
            }
            for vector in vectors {
                flat.add(vector)?;
            }
        }
        debug!(rows = flat.len(), dimensions = flat.dimensions(), "index built");
        Ok(Self { embedder, flat })
    }

    /// Wraps previously persisted vectors without re-embedding. Fails when
    /// any row disagrees with the embedder's dimension.
    pub fn attach(embedder: Arc<dyn Embedder>, rows: Vec<Vec<f32>>) -> Result<Self, KbError> {
        let mut flat = FlatIndex::new(embedder.dimensions());
        for row in rows {
            flat.add(row)?;
        }
        Ok(Self { embedder, flat })
    }

    pub fn len(&self) -> usize {
        self.flat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        self.flat.rows()
    }

    /// Embeds the query and returns the nearest chunk ordinals.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<usize>, KbError> {
        let vector = self.embedder.embed(query).await?;
        Ok(self.flat.search(&vector, k))
    }
}
