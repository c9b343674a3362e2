//! Test utilities for memvault - deterministic ports and fault injection
//!
//! - [`HashingEmbedder`]: bag-of-words embedder, no model download
//! - [`ScriptedOracle`]: closure-driven decision oracle
//! - [`UnavailableEmbedder`]: an embedding port that is always down
//! - [`FlakyVectorIndex`] / [`FlakyMetadataStore`]: wrappers that fail on demand

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::error::{MemvaultError, Result};
use crate::oracle::{Candidate, Decision, DecisionOracle, OracleError};
use crate::record::{HistoryEntry, Importance, NewHistoryEntry, Record};
use crate::storage::{
    IndexPayload, MetadataStore, MetadataWrite, RecordFilter, VectorHit, VectorIndex,
};

const STOPWORDS: &[&str] = &[
    "is", "the", "an", "of", "to", "and", "in", "on", "for", "with", "my", "it", "at", "be",
    "was", "are", "that", "this",
];

/// Deterministic embedder: hashed bag of 5-character word stems, L2-normalized.
///
/// Texts sharing words land close together, which is enough to exercise
/// retrieval without a model.
#[derive(Debug)]
pub struct HashingEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_batch` calls served
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        let stems = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() >= 2 && !STOPWORDS.contains(token))
            .map(|token| token.chars().take(5).collect::<String>());

        for stem in stems {
            let mut hasher = DefaultHasher::new();
            stem.hash(&mut hasher);
            vector[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.vector(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}

/// Embedding port that always fails with `EmbeddingUnavailable`
#[derive(Debug)]
pub struct UnavailableEmbedder {
    dimension: usize,
}

impl UnavailableEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedder {
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(MemvaultError::EmbeddingUnavailable(
            "embedding service unreachable".to_string(),
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

type TriageFn = dyn Fn(&str, &[Candidate]) -> std::result::Result<Decision, OracleError> + Send + Sync;
type ExtractFn = dyn Fn(&str) -> std::result::Result<Vec<String>, OracleError> + Send + Sync;

/// Decision oracle driven by a closure
pub struct ScriptedOracle {
    triage: Box<TriageFn>,
    extract: Option<Box<ExtractFn>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new<F>(triage: F) -> Self
    where
        F: Fn(&str, &[Candidate]) -> std::result::Result<Decision, OracleError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            triage: Box::new(triage),
            extract: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Stable rules for end-to-end tests:
    /// identical content is a NOOP, "forget ..." deletes the closest
    /// candidate, any other related content updates it, and everything
    /// else is an ADD.
    pub fn deterministic(importance: Importance) -> Self {
        Self::new(move |content, candidates| {
            let normalized = content.trim().to_lowercase();
            if let Some(same) = candidates
                .iter()
                .find(|c| c.content.trim().to_lowercase() == normalized)
            {
                return Ok(Decision::noop(Some(same.id), importance).because("already known"));
            }
            match candidates.first() {
                Some(closest) if normalized.starts_with("forget") => {
                    Ok(Decision::delete(closest.id, importance).because("user retracted it"))
                }
                Some(closest) => {
                    Ok(Decision::update(closest.id, importance).because("newer information"))
                }
                None => Ok(Decision::add(importance).because("new information")),
            }
        })
    }

    pub fn with_extraction<F>(mut self, extract: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<Vec<String>, OracleError> + Send + Sync + 'static,
    {
        self.extract = Some(Box::new(extract));
        self
    }

    /// Number of triage calls served
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn triage(
        &self,
        content: &str,
        candidates: &[Candidate],
    ) -> std::result::Result<Decision, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.triage)(content, candidates)
    }

    async fn extract_facts(&self, content: &str) -> std::result::Result<Vec<String>, OracleError> {
        match &self.extract {
            Some(extract) => extract(content),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Whether an injected failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Surfaces as `StoreUnavailable`
    Transient,
    /// Surfaces as `Storage`
    Permanent,
}

/// A countdown of injected failures
#[derive(Debug, Default)]
struct FailurePlan {
    remaining: AtomicUsize,
    transient: AtomicBool,
}

impl FailurePlan {
    fn arm(&self, times: usize, mode: FailureMode) {
        self.transient
            .store(mode == FailureMode::Transient, Ordering::SeqCst);
        self.remaining.store(times, Ordering::SeqCst);
    }

    fn trip(&self, backend: &'static str, operation: &str) -> Result<()> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !tripped {
            return Ok(());
        }
        let cause = format!("injected {operation} failure");
        if self.transient.load(Ordering::SeqCst) {
            Err(MemvaultError::StoreUnavailable { backend, cause })
        } else {
            Err(MemvaultError::Storage { backend, cause })
        }
    }
}

/// Vector index wrapper that fails upserts or deletes on demand
pub struct FlakyVectorIndex {
    inner: Arc<dyn VectorIndex>,
    upserts: FailurePlan,
    deletes: FailurePlan,
}

impl FlakyVectorIndex {
    pub fn new(inner: Arc<dyn VectorIndex>) -> Self {
        Self {
            inner,
            upserts: FailurePlan::default(),
            deletes: FailurePlan::default(),
        }
    }

    /// Fail the next `times` upserts (`usize::MAX` for always)
    pub fn fail_upserts(&self, times: usize, mode: FailureMode) {
        self.upserts.arm(times, mode);
    }

    pub fn fail_deletes(&self, times: usize, mode: FailureMode) {
        self.deletes.arm(times, mode);
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.upserts.arm(0, FailureMode::Permanent);
        self.deletes.arm(0, FailureMode::Permanent);
    }
}

#[async_trait]
impl VectorIndex for FlakyVectorIndex {
    async fn upsert(&self, id: Uuid, vector: &[f32], payload: IndexPayload) -> Result<()> {
        self.upserts.trip(self.backend(), "upsert")?;
        self.inner.upsert(id, vector, payload).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.deletes.trip(self.backend(), "delete")?;
        self.inner.delete(id).await
    }

    async fn search(&self, query: &[f32], k: usize, max_distance: f32) -> Result<Vec<VectorHit>> {
        self.inner.search(query, k, max_distance).await
    }

    async fn contains(&self, id: Uuid) -> Result<bool> {
        self.inner.contains(id).await
    }

    async fn ids(&self) -> Result<Vec<Uuid>> {
        self.inner.ids().await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    fn backend(&self) -> &'static str {
        self.inner.backend()
    }
}

/// Metadata store wrapper that fails, delays or slows calls on demand
pub struct FlakyMetadataStore {
    inner: Arc<dyn MetadataStore>,
    commits: FailurePlan,
    deletes: FailurePlan,
    appends: FailurePlan,
    late_commits: AtomicUsize,
    late_by_ms: AtomicU64,
    list_delay_ms: AtomicU64,
    lists_in_flight: AtomicUsize,
    max_lists_in_flight: AtomicUsize,
}

impl FlakyMetadataStore {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            commits: FailurePlan::default(),
            deletes: FailurePlan::default(),
            appends: FailurePlan::default(),
            late_commits: AtomicUsize::new(0),
            late_by_ms: AtomicU64::new(0),
            list_delay_ms: AtomicU64::new(0),
            lists_in_flight: AtomicUsize::new(0),
            max_lists_in_flight: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` commits that only append history
    pub fn fail_history_appends(&self, times: usize, mode: FailureMode) {
        self.appends.arm(times, mode);
    }

    /// Apply the next `times` commits that carry history, then answer only
    /// after `delay`
    pub fn answer_late(&self, times: usize, delay: Duration) {
        self.late_by_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self.late_commits.store(times, Ordering::SeqCst);
    }

    /// Hold every `list` call for `delay` before reading
    pub fn slow_lists(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Most `list` calls seen running at the same time
    pub fn max_concurrent_lists(&self) -> usize {
        self.max_lists_in_flight.load(Ordering::SeqCst)
    }

    /// Fail the next `times` commits of any kind
    pub fn fail_commits(&self, times: usize, mode: FailureMode) {
        self.commits.arm(times, mode);
    }

    /// Fail the next `times` commits that delete a record
    pub fn fail_deletes(&self, times: usize, mode: FailureMode) {
        self.deletes.arm(times, mode);
    }

    pub fn heal(&self) {
        self.commits.arm(0, FailureMode::Permanent);
        self.deletes.arm(0, FailureMode::Permanent);
        self.appends.arm(0, FailureMode::Permanent);
        self.late_commits.store(0, Ordering::SeqCst);
        self.list_delay_ms.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn get(&self, id: Uuid) -> Result<Option<Record>> {
        self.inner.get(id).await
    }

    async fn commit(
        &self,
        writes: Vec<MetadataWrite>,
        history: Vec<NewHistoryEntry>,
    ) -> Result<Vec<HistoryEntry>> {
        if writes.iter().any(|w| matches!(w, MetadataWrite::Delete(_))) {
            self.deletes.trip(self.backend(), "delete")?;
        }
        if writes.is_empty() && !history.is_empty() {
            self.appends.trip(self.backend(), "history append")?;
        }
        self.commits.trip(self.backend(), "commit")?;

        let late = !history.is_empty()
            && self
                .late_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        let result = self.inner.commit(writes, history).await;
        if late {
            let delay = self.late_by_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        result
    }

    async fn list(&self, filter: &RecordFilter, limit: usize, offset: usize) -> Result<Vec<Record>> {
        let running = self.lists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_lists_in_flight
            .fetch_max(running, Ordering::SeqCst);

        let delay = self.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let result = self.inner.list(filter, limit, offset).await;
        self.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn count(&self, filter: &RecordFilter) -> Result<usize> {
        self.inner.count(filter).await
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<Record>> {
        self.inner.keyword_search(query, filter, limit).await
    }

    async fn history(&self, id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.inner.history(id).await
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.inner.touch(id, at).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    fn backend(&self) -> &'static str {
        self.inner.backend()
    }
}
