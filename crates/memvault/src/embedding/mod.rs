//! Embedding port: turns text into fixed-length vectors.
//!
//! The engine only sees [`EmbeddingProvider`]. Implementations:
//! - [`LocalEmbedder`]: fastembed model running in-process
//! - [`RemoteEmbedder`]: OpenAI-compatible `/embeddings` endpoint
//! - [`CachedEmbedder`]: LRU cache in front of any other provider

mod cache;
mod local;
mod remote;

pub use cache::CachedEmbedder;
pub use local::{LOCAL_EMBEDDING_DIMENSION, LocalEmbedder};
pub use remote::RemoteEmbedder;

use async_trait::async_trait;

use crate::error::{MemvaultError, Result};

/// Capability to embed text.
///
/// Output must be deterministic for identical input under one model version.
/// Transport and quota failures surface as [`MemvaultError::EmbeddingUnavailable`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemvaultError::EmbeddingUnavailable("No embedding returned".to_string()))
    }

    /// Embed many texts; output order and length match the input
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Get the provider name for logging
    fn name(&self) -> &'static str;
}

/// Check a batch result against the request before handing it on.
pub(crate) fn check_batch(
    provider: &'static str,
    expected_len: usize,
    dimension: usize,
    vectors: &[Vec<f32>],
) -> Result<()> {
    if vectors.len() != expected_len {
        return Err(MemvaultError::EmbeddingUnavailable(format!(
            "{provider} returned {} vectors for {expected_len} inputs",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(crate::record::ValidationError::new(
            "embedding",
            format!(
                "{provider} returned dimension {}, deployment expects {dimension}",
                bad.len()
            ),
        )
        .into());
    }
    Ok(())
}

/// Cosine distance in `[0, 2]`; zero vectors are treated as unrelated.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
