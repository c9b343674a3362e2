//! Embedding, candidate retrieval and caller-facing search

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::MemoryEngine;
use crate::config::EmbeddingFallback;
use crate::embedding::check_batch;
use crate::error::{MemvaultError, Result};
use crate::record::{Record, sanitize_content, validate_content};
use crate::storage::RecordFilter;

/// Vector hits fetched per requested result when a filter may discard some
const CANDIDATE_MULTIPLIER: usize = 3;

/// A search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub record: Record,
    /// Raw cosine distance; `None` for keyword matches
    pub distance: Option<f32>,
}

impl SearchHit {
    /// Cosine similarity (`1 - distance`)
    pub fn similarity(&self) -> Option<f32> {
        self.distance.map(|d| 1.0 - d)
    }
}

/// Candidates for triage plus the vector of the input itself
pub(super) struct Retrieval {
    pub candidates: Vec<(Record, Option<f32>)>,
    /// `None` when retrieval fell back to keywords
    pub content_vector: Option<Vec<f32>>,
}

impl MemoryEngine {
    /// Embed `texts`, or `Ok(None)` when the embedder is down and the
    /// keyword fallback is configured.
    pub(super) async fn embed_texts(&self, texts: &[String]) -> Result<Option<Vec<Vec<f32>>>> {
        let policy = self
            .coordinator
            .retry_policy()
            .with_timeout(self.config.embedding_timeout());
        let result = policy
            .run("embedding", || self.embedder.embed_batch(texts))
            .await;

        match result {
            Ok(vectors) => {
                check_batch(
                    self.embedder.name(),
                    texts.len(),
                    self.embedder.dimension(),
                    &vectors,
                )?;
                Ok(Some(vectors))
            }
            Err(e @ (MemvaultError::EmbeddingUnavailable(_) | MemvaultError::Timeout { .. }))
                if self.config.embedding_fallback == EmbeddingFallback::Keyword =>
            {
                warn!("Embedding unavailable, falling back to keyword retrieval: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// RETRIEVE stage: union of nearest neighbours across all queries, each
    /// id at its smallest distance, hydrated and filtered.
    pub(super) async fn retrieve(
        &self,
        queries: &[String],
        filter: &RecordFilter,
    ) -> Result<Retrieval> {
        let k = self.config.top_k;

        let Some(vectors) = self.embed_texts(queries).await? else {
            let records = self
                .metadata()
                .keyword_search(&queries.join(" "), filter, k)
                .await?;
            debug!(candidates = records.len(), "Retrieved candidates by keyword");
            return Ok(Retrieval {
                candidates: records.into_iter().map(|r| (r, None)).collect(),
                content_vector: None,
            });
        };

        let fetch = k.saturating_mul(CANDIDATE_MULTIPLIER);
        let mut nearest: HashMap<Uuid, f32> = HashMap::new();
        for vector in &vectors {
            let hits = self.search_index(vector, fetch).await?;
            for hit in hits {
                nearest
                    .entry(hit.id)
                    .and_modify(|d| *d = d.min(hit.distance))
                    .or_insert(hit.distance);
            }
        }

        let candidates = self.hydrate(nearest, filter, k).await?;
        debug!(
            queries = queries.len(),
            candidates = candidates.len(),
            "Retrieved candidates by vector"
        );

        Ok(Retrieval {
            candidates: candidates
                .into_iter()
                .map(|hit| (hit.record, hit.distance))
                .collect(),
            content_vector: vectors.into_iter().next(),
        })
    }

    /// Semantic search over active records, most relevant first.
    ///
    /// With the keyword fallback configured and the embedder down, this
    /// degrades to a keyword match and hits carry no distance.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<SearchHit>> {
        let query = sanitize_content(query);
        validate_content(&query)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let hits = match self.embed_texts(std::slice::from_ref(&query)).await? {
            Some(vectors) => {
                let mut nearest = HashMap::new();
                for vector in &vectors {
                    let fetch = limit.saturating_mul(CANDIDATE_MULTIPLIER);
                    for hit in self.search_index(vector, fetch).await? {
                        nearest.insert(hit.id, hit.distance);
                    }
                }
                self.hydrate(nearest, filter, limit).await?
            }
            None => self
                .metadata()
                .keyword_search(&query, filter, limit)
                .await?
                .into_iter()
                .map(|record| SearchHit {
                    record,
                    distance: None,
                })
                .collect(),
        };

        if self.config.touch_on_search {
            let now = crate::record::now();
            for hit in &hits {
                self.coordinator.touch(hit.record.id, now).await?;
            }
        }

        debug!(query = %self.describe(&query), hits = hits.len(), "Search complete");
        Ok(hits)
    }

    async fn search_index(&self, vector: &[f32], k: usize) -> Result<Vec<crate::storage::VectorHit>> {
        let max_distance = self.config.max_distance;
        self.coordinator
            .retry_policy()
            .run("vector search", || {
                self.coordinator.index().search(vector, k, max_distance)
            })
            .await
    }

    /// Load hit records, keep the active ones matching `filter`, and order by
    /// distance (then most recently updated).
    async fn hydrate(
        &self,
        nearest: HashMap<Uuid, f32>,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::with_capacity(nearest.len());
        for (id, distance) in nearest {
            let record = self
                .coordinator
                .retry_policy()
                .run("metadata get", || self.metadata().get(id))
                .await?;
            match record {
                Some(record) if record.is_active() && filter.matches(&record) => {
                    hits.push(SearchHit {
                        record,
                        distance: Some(distance),
                    });
                }
                Some(_) => {}
                None => warn!(%id, "Vector hit has no metadata record"),
            }
        }

        hits.sort_by(|a, b| {
            let da = a.distance.unwrap_or(f32::MAX);
            let db = b.distance.unwrap_or(f32::MAX);
            da.total_cmp(&db)
                .then_with(|| b.record.updated_at.cmp(&a.record.updated_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_translation() {
        let record = Record::new("x", crate::record::Importance::new(1).unwrap());
        let hit = SearchHit {
            record: record.clone(),
            distance: Some(0.25),
        };
        assert_eq!(hit.similarity(), Some(0.75));

        let keyword = SearchHit {
            record,
            distance: None,
        };
        assert_eq!(keyword.similarity(), None);
    }
}
