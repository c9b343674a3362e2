//! Reconciliation sweep
//!
//! Brings the metadata store and the vector index back into agreement after
//! failed rollbacks, keyword-fallback inserts and interrupted writes. The sweep
//! only runs when asked; nothing schedules it.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coordinator::{Coordinator, Repaired};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemvaultError, Result};
use crate::record::{Actor, Record, RecordState, RepairAction};
use crate::storage::RecordFilter;

/// Records fetched per metadata page
const PAGE_SIZE: usize = 500;

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Inconsistent records rolled forward
    pub repaired: usize,
    /// Active records whose vector was missing from the index
    pub reindexed: usize,
    /// Active records that were stored without an embedding
    pub embedded: usize,
    /// Index entries with no metadata record
    pub dangling_removed: usize,
    /// Records the sweep could not fix; they are picked up again next time
    pub failed: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> usize {
        self.repaired + self.reindexed + self.embedded + self.dangling_removed
    }
}

pub struct Reconciler {
    coordinator: Arc<Coordinator>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Reconciler {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            embedder: None,
        }
    }

    /// Needed to index records that have no embedding yet
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Run every repair step once. Per-record failures are counted and
    /// logged; only failures to enumerate the stores abort the sweep.
    pub async fn sweep(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        self.repair_inconsistent(&mut report).await?;
        self.index_active(&mut report).await?;
        self.remove_dangling(&mut report).await?;

        if report.changed() > 0 || report.failed > 0 {
            info!(
                repaired = report.repaired,
                reindexed = report.reindexed,
                embedded = report.embedded,
                dangling_removed = report.dangling_removed,
                failed = report.failed,
                "Reconciliation sweep complete"
            );
        } else {
            debug!("Reconciliation sweep found nothing to do");
        }
        Ok(report)
    }

    async fn repair_inconsistent(&self, report: &mut ReconcileReport) -> Result<()> {
        let filter = RecordFilter::new().with_states(vec![RecordState::Inconsistent]);
        for record in self.collect(&filter).await? {
            let embedding = match (record.repair(), record.embedding.is_some()) {
                (Some(RepairAction::Index), false) => match self.embed(&record).await {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        warn!(id = %record.id, "Cannot re-embed record for repair: {e}");
                        report.failed += 1;
                        continue;
                    }
                },
                _ => None,
            };

            match self
                .coordinator
                .repair(record.id, embedding, Actor::Reconciler)
                .await
            {
                Ok(Repaired::Restored(_) | Repaired::Purged(_)) => report.repaired += 1,
                Err(MemvaultError::NotFound(_) | MemvaultError::Conflict { .. }) => {
                    debug!(id = %record.id, "Record changed before repair, skipping");
                }
                Err(e) => {
                    warn!(id = %record.id, "Repair failed: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn index_active(&self, report: &mut ReconcileReport) -> Result<()> {
        for record in self.collect(&RecordFilter::active()).await? {
            if record.is_indexed() {
                match self.coordinator.restore_vector(record.id).await {
                    Ok(true) => report.reindexed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(id = %record.id, "Re-indexing failed: {e}");
                        report.failed += 1;
                    }
                }
                continue;
            }

            let result = match self.embed(&record).await {
                Ok(vector) => {
                    self.coordinator
                        .attach_embedding(record.id, vector, Actor::Reconciler)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => report.embedded += 1,
                Err(MemvaultError::NotFound(_) | MemvaultError::Conflict { .. }) => {}
                Err(e) => {
                    warn!(id = %record.id, "Embedding unindexed record failed: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    async fn remove_dangling(&self, report: &mut ReconcileReport) -> Result<()> {
        let retry = self.coordinator.retry_policy();
        let indexed: HashSet<Uuid> = retry
            .run("vector ids", || self.coordinator.index().ids())
            .await?
            .into_iter()
            .collect();

        for id in indexed {
            match self.coordinator.remove_dangling(id).await {
                Ok(true) => {
                    debug!(%id, "Removed dangling vector");
                    report.dangling_removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(%id, "Removing dangling vector failed: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Snapshot every matching record before changing any of them, so repairs
    /// that move records out of `filter` do not shift later pages.
    async fn collect(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let retry = self.coordinator.retry_policy();
        let metadata = self.coordinator.metadata();
        let mut records = Vec::new();
        loop {
            let offset = records.len();
            let page = retry
                .run("metadata list", || metadata.list(filter, PAGE_SIZE, offset))
                .await?;
            let done = page.len() < PAGE_SIZE;
            records.extend(page);
            if done {
                return Ok(records);
            }
        }
    }

    async fn embed(&self, record: &Record) -> Result<Vec<f32>> {
        let embedder = self.embedder.as_ref().ok_or_else(|| {
            MemvaultError::EmbeddingUnavailable("reconciliation has no embedder".to_string())
        })?;
        let vector = self
            .coordinator
            .retry_policy()
            .run("embedding", || embedder.embed(&record.content))
            .await?;
        crate::embedding::check_batch(
            embedder.name(),
            1,
            embedder.dimension(),
            std::slice::from_ref(&vector),
        )?;
        Ok(vector)
    }
}
