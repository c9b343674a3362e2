use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lru::LruCache;
use tracing::trace;

use super::EmbeddingProvider;
use crate::error::Result;

/// LRU cache keyed by exact input text.
///
/// Batches are split into hits and misses; only misses reach the inner
/// provider, in one call, and results are stitched back in input order.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut slots: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<String> = Vec::new();
        {
            // A poisoned cache only costs hits
            if let Ok(mut cache) = self.cache.lock() {
                for text in texts {
                    slots.push(cache.get(text).cloned());
                }
            } else {
                slots.resize(texts.len(), None);
            }
        }
        for (text, slot) in texts.iter().zip(&slots) {
            if slot.is_none() && !misses.contains(text) {
                misses.push(text.clone());
            }
        }
        trace!(
            hits = texts.len() - slots.iter().filter(|s| s.is_none()).count(),
            misses = misses.len(),
            "Embedding cache lookup"
        );

        if !misses.is_empty() {
            let fresh = self.inner.embed_batch(&misses).await?;
            if let Ok(mut cache) = self.cache.lock() {
                for (text, vector) in misses.iter().zip(&fresh) {
                    cache.put(text.clone(), vector.clone());
                }
            }
            for (text, slot) in texts.iter().zip(slots.iter_mut()) {
                if slot.is_none() {
                    let position = misses.iter().position(|m| m == text);
                    *slot = position.and_then(|i| fresh.get(i).cloned());
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
