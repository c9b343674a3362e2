//! Brute-force in-process vector index, used by tests and `vector_backend = "memory"`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{IndexPayload, VectorHit, VectorIndex};
use crate::embedding::cosine_distance;
use crate::error::{MemvaultError, Result};
use crate::record::ValidationError;

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
struct Entry {
    vector: Vec<f32>,
    inserted_at: DateTime<Utc>,
    /// Write order, for ties on identical timestamps
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Uuid, Entry>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimension: usize,
    inner: RwLock<Inner>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(ValidationError::new(
                "embedding",
                format!("expected {} dimensions, got {}", self.dimension, vector.len()),
            )
            .into());
        }
        Ok(())
    }

    fn poisoned() -> MemvaultError {
        MemvaultError::Storage {
            backend: BACKEND,
            cause: "index lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, id: Uuid, vector: &[f32], payload: IndexPayload) -> Result<()> {
        self.check_dimension(vector)?;
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id,
            Entry {
                vector: vector.to_vec(),
                inserted_at: payload.inserted_at,
                seq,
            },
        );
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        Ok(inner.entries.remove(&id).is_some())
    }

    async fn search(&self, query: &[f32], k: usize, max_distance: f32) -> Result<Vec<VectorHit>> {
        self.check_dimension(query)?;
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;

        let mut scored: Vec<(VectorHit, DateTime<Utc>, u64)> = inner
            .entries
            .iter()
            .map(|(id, entry)| {
                (
                    VectorHit {
                        id: *id,
                        distance: cosine_distance(query, &entry.vector),
                    },
                    entry.inserted_at,
                    entry.seq,
                )
            })
            .filter(|(hit, _, _)| hit.distance <= max_distance)
            .collect();

        scored.sort_by(|(a, a_at, a_seq), (b, b_at, b_seq)| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| b_at.cmp(a_at))
                .then_with(|| b_seq.cmp(a_seq))
        });
        scored.truncate(k);
        Ok(scored.into_iter().map(|(hit, _, _)| hit).collect())
    }

    async fn contains(&self, id: Uuid) -> Result<bool> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner.entries.contains_key(&id))
    }

    async fn ids(&self) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        Ok(inner.entries.keys().copied().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        inner.entries.clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_respects_k_and_threshold() {
        let index = InMemoryVectorIndex::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        index.upsert(a, &[1.0, 0.0], IndexPayload::now()).await.unwrap();
        index.upsert(b, &[0.9, 0.1], IndexPayload::now()).await.unwrap();
        index.upsert(c, &[-1.0, 0.0], IndexPayload::now()).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![a, b]);

        let top = index.search(&[1.0, 0.0], 1, 2.0).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, a);
    }

    #[tokio::test]
    async fn test_ties_prefer_most_recent_write() {
        let index = InMemoryVectorIndex::new(2);
        let payload = IndexPayload::now();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        index.upsert(first, &[0.0, 1.0], payload).await.unwrap();
        index.upsert(second, &[0.0, 1.0], payload).await.unwrap();

        let hits = index.search(&[0.0, 1.0], 2, 2.0).await.unwrap();
        assert_eq!(hits[0].id, second);
        assert_eq!(hits[1].id, first);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let index = InMemoryVectorIndex::new(2);
        let id = Uuid::new_v4();
        index.upsert(id, &[1.0, 1.0], IndexPayload::now()).await.unwrap();

        assert!(index.delete(id).await.unwrap());
        assert!(!index.delete(id).await.unwrap());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = InMemoryVectorIndex::new(3);
        assert!(index.upsert(Uuid::new_v4(), &[1.0], IndexPayload::now()).await.is_err());
        assert!(index.search(&[1.0], 1, 1.0).await.is_err());
    }
}
