use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use tracing::{debug, info};

use super::{EmbeddingProvider, check_batch};
use crate::error::{MemvaultError, Result};

pub const LOCAL_EMBEDDING_DIMENSION: usize = 384;

/// In-process multilingual-e5-small model.
///
/// Inference is CPU-bound, so it runs on the blocking pool behind a mutex.
#[derive(Clone)]
pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    batch_size: usize,
}

impl LocalEmbedder {
    /// Load the model, downloading it on first use.
    pub fn new(batch_size: usize) -> Result<Self> {
        info!("Loading local embedding model");
        let model = TextEmbedding::try_new(InitOptions::new(FastEmbedModel::MultilingualE5Small))
            .map_err(|e| MemvaultError::EmbeddingUnavailable(e.to_string()))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            batch_size: batch_size.max(1),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = texts.len(), "Embedding batch locally");

        let model = Arc::clone(&self.model);
        let inputs = texts.to_vec();
        let batch_size = self.batch_size;
        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|_| {
                MemvaultError::EmbeddingUnavailable("embedding model lock poisoned".to_string())
            })?;
            model
                .embed(inputs, Some(batch_size))
                .map_err(|e| MemvaultError::EmbeddingUnavailable(e.to_string()))
        })
        .await
        .map_err(|e| MemvaultError::EmbeddingUnavailable(format!("embedding task failed: {e}")))??;

        check_batch(self.name(), texts.len(), LOCAL_EMBEDDING_DIMENSION, &vectors)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        LOCAL_EMBEDDING_DIMENSION
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_distance;

    #[tokio::test]
    #[cfg_attr(not(feature = "ml-tests"), ignore = "downloads the embedding model")]
    async fn test_embed_returns_correct_dimension() {
        let embedder = LocalEmbedder::new(8).expect("Failed to load model");
        let embedding = embedder.embed("Hello, world!").await.expect("Failed to embed");
        assert_eq!(embedding.len(), LOCAL_EMBEDDING_DIMENSION);
    }

    #[tokio::test]
    #[cfg_attr(not(feature = "ml-tests"), ignore = "downloads the embedding model")]
    async fn test_similar_texts_are_closer() {
        let embedder = LocalEmbedder::new(8).expect("Failed to load model");
        let texts = vec![
            "The quick brown fox jumps over the lazy dog".to_string(),
            "A fast brown fox leaps over a sleepy dog".to_string(),
            "Quantum computing revolutionizes cryptography".to_string(),
        ];
        let vectors = embedder.embed_batch(&texts).await.expect("Failed to embed batch");
        assert_eq!(vectors.len(), 3);

        let near = cosine_distance(&vectors[0], &vectors[1]);
        let far = cosine_distance(&vectors[0], &vectors[2]);
        assert!(near < far, "similar texts ({near:.3}) should be closer than unrelated ({far:.3})");
    }
}
