//! Embedding providers behind a single async trait.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::KbError;

/// Turns batches of text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder produces.
    fn dimensions(&self) -> usize;

    /// Largest batch a single `embed_batch` call should carry.
    fn max_batch(&self) -> usize {
        64
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KbError>;

    /// Embeds one text. Default delegates to the batch path.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KbError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| KbError::Embedding("provider returned no vector".to_string()))
    }
}

/// Deterministic hash-based embedder.
///
/// No semantics, but stable: equal texts embed equally, so ranking and
/// persistence behavior can be exercised without a model. Each vector is
/// L2-normalized.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for (position, word) in text.split_whitespace().enumerate() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            position.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimensions;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder speaking the OpenAI-compatible `/embeddings` wire shape.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, KbError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(KbError::Embedding(format!(
                "provider returned {status}: {body}"
            )));
        }
        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(KbError::Embedding(format!(
                "expected {} vectors, provider sent {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        // Providers may reorder; the index field is authoritative.
        parsed.data.sort_by_key(|item| item.index);
        for item in &parsed.data {
            if item.embedding.len() != self.dimensions {
                return Err(KbError::Embedding(format!(
                    "vector dimension {} does not match configured {}",
                    item.embedding.len(),
                    self.dimensions
                )));
            }
        }
        debug!(batch = texts.len(), model = %self.model, "embedded batch");
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}
