//! Decision engine: the public surface of memvault
//!
//! `infer` runs each input through EXTRACT -> RETRIEVE -> TRIAGE -> APPLY and
//! returns the resulting record. The engine depends only on the port traits;
//! concrete backends are injected through [`MemoryEngineBuilder`].

mod ingestion;
mod retrieval;

pub use ingestion::{AddOptions, InferOptions};
pub use retrieval::SearchHit;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, RetryPolicy};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemvaultError, Result};
use crate::oracle::DecisionOracle;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::record::{
    Actor, DEFAULT_DECAY_RATE, HistoryEntry, Importance, Record, ValidationError,
};
use crate::storage::{MetadataStore, RecordFilter, VectorIndex};

/// Metadata keys that scope retrieval to one user, agent or run
pub const SCOPE_KEYS: &[&str] = &["user_id", "agent_id", "run_id"];

const DELETE_PAGE_SIZE: usize = 500;

/// Long-term memory over a metadata store and a vector index.
pub struct MemoryEngine {
    coordinator: Arc<Coordinator>,
    embedder: Arc<dyn EmbeddingProvider>,
    oracle: Option<Arc<dyn DecisionOracle>>,
    config: EngineConfig,
    default_importance: Importance,
    default_decay_rate: f64,
}

/// Explicit wiring of the engine's collaborators
#[derive(Default)]
pub struct MemoryEngineBuilder {
    index: Option<Arc<dyn VectorIndex>>,
    metadata: Option<Arc<dyn MetadataStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    oracle: Option<Arc<dyn DecisionOracle>>,
    config: EngineConfig,
    retry: RetryPolicy,
    default_decay_rate: Option<f64>,
}

impl MemoryEngineBuilder {
    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Without an oracle, `infer` fails with `OracleUnavailable`; everything
    /// else works.
    pub fn oracle(mut self, oracle: Arc<dyn DecisionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn default_decay_rate(mut self, rate: f64) -> Self {
        self.default_decay_rate = Some(rate);
        self
    }

    pub fn build(self) -> Result<MemoryEngine> {
        let index = self
            .index
            .ok_or_else(|| MemvaultError::Config("a vector index is required".to_string()))?;
        let metadata = self
            .metadata
            .ok_or_else(|| MemvaultError::Config("a metadata store is required".to_string()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| MemvaultError::Config("an embedding provider is required".to_string()))?;

        if self.config.top_k == 0 {
            return Err(MemvaultError::Config("engine.top_k must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.config.max_distance) {
            return Err(MemvaultError::Config(format!(
                "engine.max_distance {} is outside [0, 2]",
                self.config.max_distance
            )));
        }
        let default_importance = Importance::new(i64::from(self.config.default_importance))
            .map_err(|e| MemvaultError::Config(format!("engine.default_importance: {e}")))?;
        let default_decay_rate = self.default_decay_rate.unwrap_or(DEFAULT_DECAY_RATE);
        if !(default_decay_rate.is_finite() && default_decay_rate > 0.0) {
            return Err(MemvaultError::Config(format!(
                "decay rate {default_decay_rate} must be positive"
            )));
        }

        debug!(
            embedder = embedder.name(),
            index = index.backend(),
            metadata = metadata.backend(),
            oracle = self.oracle.as_ref().map(|o| o.name()),
            "Building memory engine"
        );

        Ok(MemoryEngine {
            coordinator: Arc::new(Coordinator::new(index, metadata, self.retry)),
            embedder,
            oracle: self.oracle,
            config: self.config,
            default_importance,
            default_decay_rate,
        })
    }
}

impl MemoryEngine {
    pub fn builder() -> MemoryEngineBuilder {
        MemoryEngineBuilder::default()
    }

    /// Shared coordinator, for the decay scheduler and reconciliation sweep
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn metadata(&self) -> &Arc<dyn MetadataStore> {
        self.coordinator.metadata()
    }

    /// Fetch a record without counting it as an access.
    pub async fn get(&self, id: Uuid) -> Result<Record> {
        self.coordinator
            .retry_policy()
            .run("metadata get", || self.metadata().get(id))
            .await?
            .ok_or(MemvaultError::NotFound(id))
    }

    /// Fetch a record and count the read as an access.
    pub async fn recall(&self, id: Uuid) -> Result<Record> {
        if !self.coordinator.touch(id, crate::record::now()).await? {
            return Err(MemvaultError::NotFound(id));
        }
        self.get(id).await
    }

    /// Records matching `filter`, newest first
    pub async fn list(
        &self,
        filter: &RecordFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Record>> {
        self.coordinator
            .retry_policy()
            .run("metadata list", || self.metadata().list(filter, limit, offset))
            .await
    }

    pub async fn count(&self, filter: &RecordFilter) -> Result<usize> {
        self.metadata().count(filter).await
    }

    /// Audit trail of one record id, oldest first. Survives deletion.
    pub async fn history(&self, id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.coordinator
            .retry_policy()
            .run("metadata history", || self.metadata().history(id))
            .await
    }

    /// Delete on behalf of a caller (history actor `user`).
    pub async fn delete(&self, id: Uuid) -> Result<Record> {
        self.coordinator.delete(id, Actor::User).await
    }

    /// Delete every record matching `filter` on behalf of a caller.
    ///
    /// Each match is removed as its own unit of work with a `user` history
    /// entry. An empty filter is refused; use [`reset`](Self::reset) to
    /// clear everything. Returns how many records were deleted.
    pub async fn delete_all(&self, filter: &RecordFilter) -> Result<usize> {
        if filter.is_empty() {
            return Err(ValidationError::new(
                "filter",
                "delete_all needs at least one condition; use reset to clear everything",
            )
            .into());
        }

        let mut ids = Vec::new();
        loop {
            let page = self.list(filter, DELETE_PAGE_SIZE, ids.len()).await?;
            let done = page.len() < DELETE_PAGE_SIZE;
            ids.extend(page.into_iter().map(|r| r.id));
            if done {
                break;
            }
        }

        let mut deleted = 0;
        for id in ids {
            match self.coordinator.delete(id, Actor::User).await {
                Ok(_) => deleted += 1,
                Err(MemvaultError::NotFound(_)) => debug!(%id, "Record already gone"),
                Err(e) => return Err(e),
            }
        }
        info!(deleted, "Deleted matching records");
        Ok(deleted)
    }

    /// Clear both stores and all history.
    pub async fn reset(&self) -> Result<()> {
        self.coordinator.reset().await
    }

    /// Run one reconciliation sweep over both stores.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        Reconciler::new(Arc::clone(&self.coordinator))
            .with_embedder(Arc::clone(&self.embedder))
            .sweep()
            .await
    }

    /// Log text for a record body, honouring `log_content`
    fn describe(&self, content: &str) -> String {
        if self.config.log_content {
            content.to_string()
        } else {
            format!("<{} chars>", content.chars().count())
        }
    }

    fn scope_filter(metadata: &Map<String, Value>) -> RecordFilter {
        SCOPE_KEYS
            .iter()
            .filter_map(|key| metadata.get(*key).map(|value| (*key, value.clone())))
            .fold(RecordFilter::active(), |filter, (key, value)| {
                filter.with_metadata(key, value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryVectorIndex, SqliteStore};
    use crate::testing::HashingEmbedder;
    use serde_json::json;

    fn builder() -> MemoryEngineBuilder {
        MemoryEngine::builder()
            .index(Arc::new(InMemoryVectorIndex::new(64)))
            .metadata(Arc::new(SqliteStore::in_memory().unwrap()))
            .embedder(Arc::new(HashingEmbedder::new(64)))
    }

    #[test]
    fn test_builder_requires_ports() {
        let err = MemoryEngine::builder().build().err().unwrap();
        assert!(matches!(err, MemvaultError::Config(_)));
    }

    #[test]
    fn test_builder_validates_config() {
        let config = EngineConfig {
            top_k: 0,
            ..EngineConfig::default()
        };
        assert!(builder().config(config).build().is_err());

        let config = EngineConfig {
            default_importance: 11,
            ..EngineConfig::default()
        };
        assert!(builder().config(config).build().is_err());

        assert!(builder().default_decay_rate(0.0).build().is_err());
        assert!(builder().build().is_ok());
    }

    #[test]
    fn test_scope_filter_uses_scope_keys_only() {
        let mut metadata = Map::new();
        metadata.insert("user_id".to_string(), json!("alice"));
        metadata.insert("source".to_string(), json!("chat"));

        let filter = MemoryEngine::scope_filter(&metadata);
        assert_eq!(filter.metadata, vec![("user_id".to_string(), json!("alice"))]);
        assert_eq!(filter.states, Some(vec![crate::record::RecordState::Active]));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let engine = builder().build().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(engine.get(id).await, Err(MemvaultError::NotFound(found)) if found == id));
        assert!(matches!(engine.recall(id).await, Err(MemvaultError::NotFound(_))));
    }
}
