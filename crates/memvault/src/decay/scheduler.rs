//! Periodic decay ticks

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::policy::{DecayOutcome, DecayPolicy};
use crate::coordinator::Coordinator;
use crate::error::{MemvaultError, Result};
use crate::record::{Actor, Record};
use crate::storage::RecordFilter;

const PAGE_SIZE: usize = 500;

/// Counts from one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecayReport {
    pub examined: usize,
    /// Importance lowered
    pub decayed: usize,
    /// Deleted for falling below the floor
    pub expired: usize,
    /// Not due, unchanged, or changed by someone else mid-tick
    pub skipped: usize,
    pub failed: usize,
}

pub struct DecayScheduler {
    coordinator: Arc<Coordinator>,
    policy: DecayPolicy,
    tick: Mutex<()>,
}

impl DecayScheduler {
    pub fn new(coordinator: Arc<Coordinator>, policy: DecayPolicy) -> Self {
        Self {
            coordinator,
            policy,
            tick: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &DecayPolicy {
        &self.policy
    }

    pub async fn run_tick(&self) -> Result<DecayReport> {
        self.run_tick_at(crate::record::now()).await
    }

    /// Decay every eligible record as of `now`.
    ///
    /// Ticks never overlap. A second tick inside the same window finds
    /// nothing to do.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<DecayReport> {
        let _tick = self.tick.lock().await;
        let mut report = DecayReport::default();

        for record in self.active_records().await? {
            report.examined += 1;
            match self.policy.evaluate(&record, now) {
                DecayOutcome::Unchanged => report.skipped += 1,
                DecayOutcome::Decayed(importance) => {
                    let result = self
                        .coordinator
                        .revise_importance(
                            record.id,
                            importance,
                            &record,
                            now,
                            Actor::Scheduler,
                        )
                        .await;
                    match result {
                        Ok(_) => report.decayed += 1,
                        Err(MemvaultError::Conflict { .. } | MemvaultError::NotFound(_)) => {
                            debug!(id = %record.id, "Record changed during decay tick");
                            report.skipped += 1;
                        }
                        Err(e) => {
                            warn!(id = %record.id, "Decay failed: {e}");
                            report.failed += 1;
                        }
                    }
                }
                DecayOutcome::Expired { decayed } => {
                    let result = self
                        .coordinator
                        .expire(record.id, &record, Actor::Scheduler)
                        .await;
                    match result {
                        Ok(_) => {
                            debug!(id = %record.id, decayed, "Expired record");
                            report.expired += 1;
                        }
                        Err(MemvaultError::Conflict { .. } | MemvaultError::NotFound(_)) => {
                            debug!(id = %record.id, "Record changed during decay tick");
                            report.skipped += 1;
                        }
                        Err(e) => {
                            warn!(id = %record.id, "Expiry failed: {e}");
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        info!(
            examined = report.examined,
            decayed = report.decayed,
            expired = report.expired,
            failed = report.failed,
            "Decay tick complete"
        );
        Ok(report)
    }

    /// Run a tick every `policy.interval` until the handle is shut down.
    pub fn spawn(self: Arc<Self>) -> DecayHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let period = self
            .policy
            .interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(3600));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(?period, "Decay scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_tick().await {
                            error!("Decay tick failed: {e}");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Decay scheduler stopped");
        });

        DecayHandle { shutdown, task }
    }

    async fn active_records(&self) -> Result<Vec<Record>> {
        let retry = self.coordinator.retry_policy();
        let metadata = self.coordinator.metadata();
        let filter = RecordFilter::active();
        let mut records = Vec::new();
        loop {
            let offset = records.len();
            let page = retry
                .run("metadata list", || metadata.list(&filter, PAGE_SIZE, offset))
                .await?;
            let done = page.len() < PAGE_SIZE;
            records.extend(page);
            if done {
                return Ok(records);
            }
        }
    }
}

/// Running scheduler task
pub struct DecayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DecayHandle {
    /// Stop after any tick in progress finishes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Decay scheduler task panicked: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RetryPolicy;
    use crate::record::{Importance, Operation};
    use crate::storage::{InMemoryVectorIndex, SqliteStore};
    use chrono::Duration;

    fn scheduler() -> Arc<DecayScheduler> {
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(InMemoryVectorIndex::new(4)),
            Arc::new(SqliteStore::in_memory().unwrap()),
            RetryPolicy::once(std::time::Duration::from_secs(5)),
        ));
        Arc::new(DecayScheduler::new(coordinator, DecayPolicy::default()))
    }

    async fn seed(scheduler: &DecayScheduler, importance: i64, idle_days: i64) -> Record {
        let then = crate::record::now() - Duration::days(idle_days);
        let mut record = Record::new("walks the dog at six", Importance::new(importance).unwrap());
        record.created_at = then;
        record.updated_at = then;
        record.accessed_at = then;
        scheduler
            .coordinator
            .add(record, Actor::User)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_tick_decays_and_expires() {
        let scheduler = scheduler();
        let kept = seed(&scheduler, 9, 5).await;
        let expired = seed(&scheduler, 1, 40).await;
        let fresh = seed(&scheduler, 5, 0).await;

        let report = scheduler.run_tick().await.unwrap();
        assert_eq!(report.examined, 3);
        assert_eq!(report.decayed, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(report.skipped, 1);

        let metadata = scheduler.coordinator.metadata();
        let after = metadata.get(kept.id).await.unwrap().unwrap();
        assert!(after.importance < kept.importance);
        assert!(metadata.get(expired.id).await.unwrap().is_none());
        assert_eq!(
            metadata.get(fresh.id).await.unwrap().unwrap().importance,
            fresh.importance
        );

        let trail = metadata.history(expired.id).await.unwrap();
        let last = trail.last().unwrap();
        assert_eq!(last.operation, Operation::Delete);
        assert_eq!(last.actor, Actor::Scheduler);
    }

    #[tokio::test]
    async fn test_spawned_scheduler_shuts_down() {
        let handle = scheduler().spawn();
        handle.shutdown().await;
    }
}
