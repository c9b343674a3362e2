//! Consistency coordinator
//!
//! Every mutation runs as one unit of work over both stores:
//!
//! - ADD and UPDATE write the metadata store first, then the vector index, so
//!   a record is discoverable before it is searchable.
//! - DELETE removes the vector first, then the metadata and history together,
//!   so a record on its way out never surfaces from search.
//!
//! When the second store fails, the applied steps are compensated in reverse.
//! If compensation fails too, the touched records are flagged
//! [`RecordState::Inconsistent`] with the roll-forward step that repairs them,
//! and the history records the inconsistent outcome.

mod locks;
mod retry;

pub use locks::{LockSet, RecordLocks};
pub use retry::RetryPolicy;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{MemvaultError, Result};
use crate::record::{
    Actor, HistoryEntry, Importance, NewHistoryEntry, Operation, Record, RecordState,
    RepairAction, ValidationError,
};
use crate::storage::{IndexPayload, MetadataStore, MetadataWrite, VectorIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOrder {
    MetadataFirst,
    IndexFirst,
}

#[derive(Debug, Clone)]
enum IndexStep {
    Upsert { id: Uuid, vector: Vec<f32> },
    /// `restore` is the vector to put back if the unit is compensated
    Delete { id: Uuid, restore: Option<Vec<f32>> },
}

/// A planned multi-store mutation
struct UnitOfWork {
    operation: Operation,
    primary: Uuid,
    order: WriteOrder,
    writes: Vec<MetadataWrite>,
    undo: Vec<MetadataWrite>,
    index: Vec<IndexStep>,
    history: Vec<NewHistoryEntry>,
    /// Record versions to persist, already flagged, if compensation fails
    flagged: Vec<Record>,
}

impl UnitOfWork {
    fn failed(&self, cause: MemvaultError) -> MemvaultError {
        MemvaultError::MemoryOperationFailed {
            operation: self.operation,
            record_id: Some(self.primary),
            cause: Box::new(cause),
        }
    }
}

/// Result of a [`Coordinator::repair`] call
#[derive(Debug, Clone, PartialEq)]
pub enum Repaired {
    /// The record is back in a consistent state
    Restored(Record),
    /// The record was purged from both stores
    Purged(Uuid),
}

/// Serializes per-record mutations and keeps both stores in step.
pub struct Coordinator {
    index: Arc<dyn VectorIndex>,
    metadata: Arc<dyn MetadataStore>,
    retry: RetryPolicy,
    locks: RecordLocks,
    /// Shared by units of work, exclusive for reset
    gate: RwLock<()>,
}

impl Coordinator {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        metadata: Arc<dyn MetadataStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            index,
            metadata,
            retry,
            locks: RecordLocks::new(),
            gate: RwLock::new(()),
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Insert a new record into both stores.
    pub async fn add(&self, record: Record, actor: Actor) -> Result<Record> {
        record.validate()?;
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[record.id]).await;

        if self.load(record.id).await?.is_some() {
            return Err(MemvaultError::Conflict {
                id: record.id,
                reason: "a record with this id already exists".to_string(),
            });
        }

        let mut record = record;
        record.set_operation(Operation::Add);

        let history = vec![
            NewHistoryEntry::new(record.id, Operation::Add, actor)
                .new_content(record.content.clone())
                .at(record.updated_at),
        ];
        let mut flagged_version = record.clone();
        flagged_version.mark_inconsistent(RepairAction::Index);

        let unit = UnitOfWork {
            operation: Operation::Add,
            primary: record.id,
            order: WriteOrder::MetadataFirst,
            writes: vec![MetadataWrite::Put(record.clone())],
            undo: vec![MetadataWrite::Delete(record.id)],
            index: record
                .embedding
                .clone()
                .map(|vector| IndexStep::Upsert {
                    id: record.id,
                    vector,
                })
                .into_iter()
                .collect(),
            history,
            flagged: vec![flagged_version],
        };

        self.execute(unit).await?;
        info!(id = %record.id, indexed = record.is_indexed(), "Added record");
        Ok(record)
    }

    /// Replace `previous_id` with `replacement`.
    ///
    /// The old record stays in the metadata store as `Superseded` (so the
    /// `previous_id` chain resolves) and leaves the vector index.
    pub async fn supersede(
        &self,
        previous_id: Uuid,
        replacement: Record,
        actor: Actor,
    ) -> Result<Record> {
        let mut next = replacement;
        next.previous_id = Some(previous_id);
        next.set_operation(Operation::Update);
        next.validate()?;

        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[previous_id, next.id]).await;

        let previous = self
            .load(previous_id)
            .await?
            .ok_or(MemvaultError::NotFound(previous_id))?;
        if !previous.is_active() {
            return Err(MemvaultError::Conflict {
                id: previous_id,
                reason: format!("record is {}, not active", previous.state()),
            });
        }

        let now = crate::record::now();
        next.stamp_updated(now);
        let mut superseded = previous.clone();
        superseded.mark_superseded(next.id, now);

        let history = vec![
            NewHistoryEntry::new(next.id, Operation::Update, actor)
                .old_content(previous.content.clone())
                .new_content(next.content.clone())
                .related(previous.id)
                .at(now),
            NewHistoryEntry::new(previous.id, Operation::Update, actor)
                .old_content(previous.content.clone())
                .new_content(next.content.clone())
                .related(next.id)
                .detail("superseded")
                .at(now),
        ];

        let mut index = Vec::new();
        if let Some(vector) = next.embedding.clone() {
            index.push(IndexStep::Upsert {
                id: next.id,
                vector,
            });
        }
        index.push(IndexStep::Delete {
            id: previous.id,
            restore: previous.embedding.clone(),
        });

        let mut flagged_next = next.clone();
        flagged_next.mark_inconsistent(RepairAction::Index);
        let mut flagged_previous = superseded.clone();
        flagged_previous.mark_inconsistent(RepairAction::Unindex);

        let unit = UnitOfWork {
            operation: Operation::Update,
            primary: next.id,
            order: WriteOrder::MetadataFirst,
            writes: vec![
                MetadataWrite::Put(next.clone()),
                MetadataWrite::Put(superseded),
            ],
            undo: vec![
                MetadataWrite::Delete(next.id),
                MetadataWrite::Put(previous),
            ],
            index,
            history,
            flagged: vec![flagged_next, flagged_previous],
        };

        self.execute(unit).await?;
        info!(id = %next.id, previous = %previous_id, "Superseded record");
        Ok(next)
    }

    /// Remove a record from both stores; returns the removed record.
    pub async fn delete(&self, id: Uuid, actor: Actor) -> Result<Record> {
        self.remove(id, actor, None).await
    }

    /// Remove a record only if it is still exactly as `observed`: active,
    /// not rewritten and not read since. Otherwise fails with `Conflict`.
    pub async fn expire(&self, id: Uuid, observed: &Record, actor: Actor) -> Result<Record> {
        self.remove(id, actor, Some(observed)).await
    }

    async fn remove(&self, id: Uuid, actor: Actor, observed: Option<&Record>) -> Result<Record> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;

        let existing = self.load(id).await?.ok_or(MemvaultError::NotFound(id))?;
        if let Some(observed) = observed {
            ensure_unchanged(&existing, observed)?;
        }
        let now = crate::record::now();

        let restore = if existing.is_active() {
            existing.embedding.clone()
        } else {
            None
        };
        let mut flagged = existing.clone();
        flagged.mark_inconsistent(RepairAction::Purge);

        let unit = UnitOfWork {
            operation: Operation::Delete,
            primary: id,
            order: WriteOrder::IndexFirst,
            writes: vec![MetadataWrite::Delete(id)],
            undo: Vec::new(),
            index: vec![IndexStep::Delete { id, restore }],
            history: vec![
                NewHistoryEntry::new(id, Operation::Delete, actor)
                    .old_content(existing.content.clone())
                    .at(now),
            ],
            flagged: vec![flagged],
        };

        self.execute(unit).await?;
        info!(%id, %actor, "Deleted record");
        Ok(existing)
    }

    /// Change only the importance of an active record.
    ///
    /// Fails with `Conflict` if the record was written or read since the
    /// caller took `observed`.
    pub async fn revise_importance(
        &self,
        id: Uuid,
        importance: Importance,
        observed: &Record,
        at: DateTime<Utc>,
        actor: Actor,
    ) -> Result<Record> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;

        let current = self.load(id).await?.ok_or(MemvaultError::NotFound(id))?;
        ensure_unchanged(&current, observed)?;

        let mut revised = current.clone();
        revised.importance = importance;
        revised.set_operation(Operation::Update);
        revised.stamp_updated(at);

        let entry = NewHistoryEntry::new(id, Operation::Update, actor)
            .detail(format!("importance {} -> {}", current.importance, importance))
            .at(revised.updated_at);

        self.commit(vec![MetadataWrite::Put(revised.clone())], vec![entry])
            .await
            .map_err(|e| MemvaultError::MemoryOperationFailed {
                operation: Operation::Update,
                record_id: Some(id),
                cause: Box::new(e),
            })?;
        debug!(%id, %actor, "Revised importance");
        Ok(revised)
    }

    /// Index an active record that was stored without an embedding.
    pub async fn attach_embedding(
        &self,
        id: Uuid,
        embedding: Vec<f32>,
        actor: Actor,
    ) -> Result<Record> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;

        let current = self.load(id).await?.ok_or(MemvaultError::NotFound(id))?;
        if !current.is_active() || current.is_indexed() {
            return Err(MemvaultError::Conflict {
                id,
                reason: "only active, unindexed records take an embedding".to_string(),
            });
        }

        let now = crate::record::now();
        let mut indexed = current.clone().with_embedding(embedding.clone());
        indexed.stamp_updated(now);
        indexed.validate()?;
        let mut flagged = indexed.clone();
        flagged.mark_inconsistent(RepairAction::Index);

        let unit = UnitOfWork {
            operation: Operation::Update,
            primary: id,
            order: WriteOrder::MetadataFirst,
            writes: vec![MetadataWrite::Put(indexed.clone())],
            undo: vec![MetadataWrite::Put(current)],
            index: vec![IndexStep::Upsert {
                id,
                vector: embedding,
            }],
            history: vec![
                NewHistoryEntry::new(id, Operation::Update, actor)
                    .detail("embedding attached")
                    .at(now),
            ],
            flagged: vec![flagged],
        };

        self.execute(unit).await?;
        Ok(indexed)
    }

    /// Roll an inconsistent record forward along its repair action.
    ///
    /// `embedding` is only used by `Index` repairs of records that lack one.
    pub async fn repair(
        &self,
        id: Uuid,
        embedding: Option<Vec<f32>>,
        actor: Actor,
    ) -> Result<Repaired> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;

        let record = self.load(id).await?.ok_or(MemvaultError::NotFound(id))?;
        let Some(action) = record.repair().filter(|_| record.state() == RecordState::Inconsistent)
        else {
            return Err(MemvaultError::Conflict {
                id,
                reason: format!("record is {}, nothing to repair", record.state()),
            });
        };

        let now = crate::record::now();
        let detail = format!("repaired: {action}");
        match action {
            RepairAction::Index => {
                let vector = record
                    .embedding
                    .clone()
                    .or(embedding)
                    .ok_or_else(|| ValidationError::new("embedding", "required to re-index"))?;
                self.retry
                    .run("vector upsert", || {
                        self.index.upsert(id, &vector, IndexPayload::now())
                    })
                    .await?;

                let mut repaired = record.clone().with_embedding(vector.clone());
                repaired.mark_repaired(RecordState::Active, now);
                let entry = NewHistoryEntry::new(id, record.operation(), actor)
                    .detail(detail)
                    .at(now);
                self.commit(vec![MetadataWrite::Put(repaired.clone())], vec![entry])
                    .await?;
                info!(%id, "Repaired record by re-indexing");
                Ok(Repaired::Restored(repaired))
            }
            RepairAction::Unindex => {
                self.retry
                    .run("vector delete", || self.index.delete(id))
                    .await?;

                let mut repaired = record.clone();
                repaired.mark_repaired(RecordState::Superseded, now);
                let entry = NewHistoryEntry::new(id, record.operation(), actor)
                    .detail(detail)
                    .at(now);
                self.commit(vec![MetadataWrite::Put(repaired.clone())], vec![entry])
                    .await?;
                info!(%id, "Repaired record by un-indexing");
                Ok(Repaired::Restored(repaired))
            }
            RepairAction::Purge => {
                self.retry
                    .run("vector delete", || self.index.delete(id))
                    .await?;

                let entry = NewHistoryEntry::new(id, Operation::Delete, actor)
                    .old_content(record.content.clone())
                    .detail(detail)
                    .at(now);
                self.commit(vec![MetadataWrite::Delete(id)], vec![entry])
                    .await?;
                info!(%id, "Repaired record by purging");
                Ok(Repaired::Purged(id))
            }
        }
    }

    /// Append a NOOP entry. Without a target the entry goes on a fresh id
    /// that is never stored as a record.
    pub async fn record_noop(
        &self,
        record_id: Option<Uuid>,
        content: &str,
        actor: Actor,
    ) -> Result<HistoryEntry> {
        let _gate = self.gate.read().await;
        let id = record_id.unwrap_or_else(crate::record::new_id);
        let _locks = self.locks.acquire(&[id]).await;

        let entry = NewHistoryEntry::new(id, Operation::Noop, actor).new_content(content);
        let mut appended = self.commit(Vec::new(), vec![entry]).await?;
        appended.pop().ok_or_else(|| MemvaultError::Storage {
            backend: self.metadata.backend(),
            cause: "history append returned no entry".to_string(),
        })
    }

    /// Count a touching read without changing `updated_at`.
    pub async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;
        self.retry
            .run("metadata touch", || self.metadata.touch(id, at))
            .await
    }

    /// Put back the vector of an active, embedded record missing from the index.
    pub async fn restore_vector(&self, id: Uuid) -> Result<bool> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;

        let Some(record) = self.load(id).await? else {
            return Ok(false);
        };
        let Some(vector) = record.embedding.as_ref().filter(|_| record.is_active()) else {
            return Ok(false);
        };
        if self
            .retry
            .run("vector lookup", || self.index.contains(id))
            .await?
        {
            return Ok(false);
        }

        let payload = IndexPayload {
            inserted_at: record.updated_at,
        };
        self.retry
            .run("vector upsert", || self.index.upsert(id, vector, payload))
            .await?;
        Ok(true)
    }

    /// Drop an index entry that has no metadata record behind it.
    pub async fn remove_dangling(&self, id: Uuid) -> Result<bool> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;

        if self.load(id).await?.is_some() {
            return Ok(false);
        }
        self.retry
            .run("vector delete", || self.index.delete(id))
            .await
    }

    /// Clear both stores and all history.
    ///
    /// Both backends are always attempted; success is only reported when both
    /// were cleared.
    pub async fn reset(&self) -> Result<()> {
        let _gate = self.gate.write().await;

        let index = self
            .retry
            .run("vector clear", || self.index.clear())
            .await
            .err()
            .map(|e| e.to_string());
        let metadata = self
            .retry
            .run("metadata clear", || self.metadata.clear())
            .await
            .err()
            .map(|e| e.to_string());

        if index.is_some() || metadata.is_some() {
            error!(?index, ?metadata, "Reset incomplete");
            return Err(MemvaultError::Reset { index, metadata });
        }
        info!("Reset both stores");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Record>> {
        self.retry
            .run("metadata get", || self.metadata.get(id))
            .await
    }

    async fn commit(
        &self,
        writes: Vec<MetadataWrite>,
        history: Vec<NewHistoryEntry>,
    ) -> Result<Vec<HistoryEntry>> {
        self.retry
            .run("metadata commit", || {
                self.metadata.commit(writes.clone(), history.clone())
            })
            .await
    }

    async fn execute(&self, unit: UnitOfWork) -> Result<()> {
        match unit.order {
            WriteOrder::MetadataFirst => self.execute_metadata_first(unit).await,
            WriteOrder::IndexFirst => self.execute_index_first(unit).await,
        }
    }

    async fn execute_metadata_first(&self, unit: UnitOfWork) -> Result<()> {
        if unit.index.is_empty() {
            return self
                .commit(unit.writes.clone(), unit.history.clone())
                .await
                .map(|_| ())
                .map_err(|e| unit.failed(e));
        }

        if let Err(e) = self.commit(unit.writes.clone(), Vec::new()).await {
            // A timed-out commit may still have landed
            if matches!(e, MemvaultError::Timeout { .. })
                && self.commit(unit.undo.clone(), Vec::new()).await.is_err()
            {
                return Err(self.flag_inconsistent(unit, e).await);
            }
            return Err(unit.failed(e));
        }

        if let Err((attempted, e)) = self.apply_index(&unit.index).await {
            let index_restored = self.undo_index(&unit.index[..attempted]).await;
            if index_restored && self.commit(unit.undo.clone(), Vec::new()).await.is_ok() {
                warn!(
                    operation = %unit.operation,
                    id = %unit.primary,
                    "Vector index write failed, unit of work rolled back: {e}"
                );
                return Err(unit.failed(e));
            }
            return Err(self.flag_inconsistent(unit, e).await);
        }

        if let Err(e) = self.commit(Vec::new(), unit.history.clone()).await {
            error!(
                operation = %unit.operation,
                id = %unit.primary,
                "Both stores written but the history entry could not be appended: {e}"
            );
            return Err(MemvaultError::HistoryMissing {
                operation: unit.operation,
                record_id: unit.primary,
                cause: Box::new(e),
            });
        }
        Ok(())
    }

    async fn execute_index_first(&self, unit: UnitOfWork) -> Result<()> {
        if let Err((attempted, e)) = self.apply_index(&unit.index).await {
            if self.undo_index(&unit.index[..attempted]).await {
                return Err(unit.failed(e));
            }
            return Err(self.flag_inconsistent(unit, e).await);
        }

        if let Err(e) = self
            .commit(unit.writes.clone(), unit.history.clone())
            .await
        {
            if self.undo_index(&unit.index).await {
                return Err(unit.failed(e));
            }
            return Err(self.flag_inconsistent(unit, e).await);
        }
        Ok(())
    }

    /// Apply index steps in order. On failure, returns how many steps were
    /// attempted (the failed one included, since a timed-out call may have
    /// landed) and the error.
    async fn apply_index(
        &self,
        steps: &[IndexStep],
    ) -> std::result::Result<(), (usize, MemvaultError)> {
        for (position, step) in steps.iter().enumerate() {
            let result = match step {
                IndexStep::Upsert { id, vector } => self
                    .retry
                    .run("vector upsert", || {
                        self.index.upsert(*id, vector, IndexPayload::now())
                    })
                    .await,
                IndexStep::Delete { id, .. } => self
                    .retry
                    .run("vector delete", || self.index.delete(*id))
                    .await
                    .map(|_| ()),
            };
            result.map_err(|e| (position + 1, e))?;
        }
        Ok(())
    }

    /// Undo index steps in reverse; returns whether every undo succeeded.
    async fn undo_index(&self, steps: &[IndexStep]) -> bool {
        let mut restored = true;
        for step in steps.iter().rev() {
            let result = match step {
                IndexStep::Upsert { id, .. } => self
                    .retry
                    .run("vector delete", || self.index.delete(*id))
                    .await
                    .map(|_| ()),
                IndexStep::Delete {
                    id,
                    restore: Some(vector),
                } => {
                    self.retry
                        .run("vector upsert", || {
                            self.index.upsert(*id, vector, IndexPayload::now())
                        })
                        .await
                }
                IndexStep::Delete { restore: None, .. } => Ok(()),
            };
            if let Err(e) = result {
                warn!("Compensating vector write failed: {e}");
                restored = false;
            }
        }
        restored
    }

    /// Persist the flagged record versions with inconsistent history, then
    /// build the error for the caller.
    async fn flag_inconsistent(&self, unit: UnitOfWork, cause: MemvaultError) -> MemvaultError {
        let record_ids: Vec<Uuid> = unit.flagged.iter().map(|r| r.id).collect();
        let reason = cause.to_string();
        let history = unit
            .history
            .into_iter()
            .map(|entry| {
                let detail = match &entry.detail {
                    Some(detail) => format!("{detail}: {reason}"),
                    None => reason.clone(),
                };
                entry.detail(detail).inconsistent()
            })
            .collect();
        let writes = unit.flagged.into_iter().map(MetadataWrite::Put).collect();

        match self.commit(writes, history).await {
            Ok(_) => error!(
                operation = %unit.operation,
                ?record_ids,
                "Rollback failed, records flagged inconsistent: {reason}"
            ),
            Err(flag_error) => error!(
                operation = %unit.operation,
                ?record_ids,
                "Rollback failed and records could not be flagged ({flag_error}): {reason}"
            ),
        }

        MemvaultError::InconsistentState {
            operation: unit.operation,
            record_ids,
            cause: Box::new(cause),
        }
    }
}

/// `Conflict` unless `current` is active and has been neither written nor
/// read since `observed` was taken.
fn ensure_unchanged(current: &Record, observed: &Record) -> Result<()> {
    let unchanged = current.is_active()
        && current.updated_at.timestamp_micros() == observed.updated_at.timestamp_micros()
        && current.accessed_at.timestamp_micros() == observed.accessed_at.timestamp_micros()
        && current.access_count == observed.access_count;
    if unchanged {
        Ok(())
    } else {
        Err(MemvaultError::Conflict {
            id: current.id,
            reason: "record changed since it was read".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryVectorIndex, RecordFilter, SqliteStore};
    use std::time::Duration;

    fn create_coordinator() -> Coordinator {
        Coordinator::new(
            Arc::new(InMemoryVectorIndex::new(3)),
            Arc::new(SqliteStore::in_memory().unwrap()),
            RetryPolicy::once(Duration::from_secs(5)),
        )
    }

    fn record(content: &str, vector: [f32; 3]) -> Record {
        Record::new(content, Importance::new(5).unwrap()).with_embedding(vector.to_vec())
    }

    #[tokio::test]
    async fn test_add_writes_both_stores_and_history() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(record("likes tea", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();

        assert!(coordinator.index().contains(stored.id).await.unwrap());
        assert!(coordinator.metadata().get(stored.id).await.unwrap().is_some());

        let history = coordinator.metadata().history(stored.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, Operation::Add);
        assert_eq!(history[0].new_content.as_deref(), Some("likes tea"));
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_id() {
        let coordinator = create_coordinator();
        let first = record("likes tea", [1.0, 0.0, 0.0]);
        coordinator.add(first.clone(), Actor::Engine).await.unwrap();

        let err = coordinator.add(first, Actor::Engine).await.unwrap_err();
        assert!(matches!(err, MemvaultError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_supersede_moves_the_index_entry() {
        let coordinator = create_coordinator();
        let old = coordinator
            .add(record("likes blue", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();
        let replacement = old
            .superseding("likes green", Importance::new(6).unwrap())
            .with_embedding(vec![0.0, 1.0, 0.0]);

        let new = coordinator
            .supersede(old.id, replacement, Actor::Engine)
            .await
            .unwrap();

        assert_eq!(new.previous_id, Some(old.id));
        assert!(coordinator.index().contains(new.id).await.unwrap());
        assert!(!coordinator.index().contains(old.id).await.unwrap());

        let old_now = coordinator.metadata().get(old.id).await.unwrap().unwrap();
        assert_eq!(old_now.state(), RecordState::Superseded);
        assert_eq!(old_now.superseded_by(), Some(new.id));

        let new_history = coordinator.metadata().history(new.id).await.unwrap();
        assert_eq!(new_history.len(), 1);
        assert_eq!(new_history[0].related_id, Some(old.id));
        assert_eq!(coordinator.metadata().history(old.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_supersede_of_superseded_record_conflicts() {
        let coordinator = create_coordinator();
        let old = coordinator
            .add(record("likes blue", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();
        let importance = Importance::new(6).unwrap();
        coordinator
            .supersede(old.id, old.superseding("likes green", importance), Actor::Engine)
            .await
            .unwrap();

        let err = coordinator
            .supersede(old.id, old.superseding("likes red", importance), Actor::Engine)
            .await
            .unwrap_err();
        assert!(matches!(err, MemvaultError::Conflict { id, .. } if id == old.id));
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_stores() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(record("likes tea", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();

        coordinator.delete(stored.id, Actor::User).await.unwrap();

        assert!(!coordinator.index().contains(stored.id).await.unwrap());
        assert!(coordinator.metadata().get(stored.id).await.unwrap().is_none());
        let history = coordinator.metadata().history(stored.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].operation, Operation::Delete);
        assert_eq!(history[1].actor, Actor::User);

        let err = coordinator.delete(stored.id, Actor::User).await.unwrap_err();
        assert!(matches!(err, MemvaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_revise_importance_checks_version() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(record("likes tea", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();
        let later = stored.updated_at + chrono::Duration::hours(1);

        let revised = coordinator
            .revise_importance(
                stored.id,
                Importance::new(3).unwrap(),
                &stored,
                later,
                Actor::Scheduler,
            )
            .await
            .unwrap();
        assert_eq!(revised.importance.get(), 3);
        assert_eq!(revised.updated_at, later);

        let stale = coordinator
            .revise_importance(
                stored.id,
                Importance::new(2).unwrap(),
                &stored,
                later,
                Actor::Scheduler,
            )
            .await
            .unwrap_err();
        assert!(matches!(stale, MemvaultError::Conflict { .. }));

        let history = coordinator.metadata().history(stored.id).await.unwrap();
        assert_eq!(history.last().unwrap().detail.as_deref(), Some("importance 5 -> 3"));
    }

    #[tokio::test]
    async fn test_expire_skips_record_read_since_snapshot() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(record("likes tea", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();
        let snapshot = coordinator.metadata().get(stored.id).await.unwrap().unwrap();

        coordinator.touch(stored.id, Utc::now()).await.unwrap();
        let err = coordinator
            .expire(stored.id, &snapshot, Actor::Scheduler)
            .await
            .unwrap_err();
        assert!(matches!(err, MemvaultError::Conflict { .. }));
        assert!(coordinator.index().contains(stored.id).await.unwrap());

        let fresh = coordinator.metadata().get(stored.id).await.unwrap().unwrap();
        coordinator
            .expire(stored.id, &fresh, Actor::Scheduler)
            .await
            .unwrap();
        assert!(coordinator.metadata().get(stored.id).await.unwrap().is_none());
        let history = coordinator.metadata().history(stored.id).await.unwrap();
        assert_eq!(history.last().unwrap().actor, Actor::Scheduler);
    }

    #[tokio::test]
    async fn test_unindexed_add_then_attach_embedding() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(
                Record::new("likes tea", Importance::new(5).unwrap()),
                Actor::Engine,
            )
            .await
            .unwrap();
        assert!(coordinator.index().ids().await.unwrap().is_empty());

        let indexed = coordinator
            .attach_embedding(stored.id, vec![0.0, 0.0, 1.0], Actor::Reconciler)
            .await
            .unwrap();
        assert!(indexed.is_indexed());
        assert!(coordinator.index().contains(stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_noop_without_target_uses_fresh_id() {
        let coordinator = create_coordinator();
        let entry = coordinator
            .record_noop(None, "nothing new", Actor::Engine)
            .await
            .unwrap();

        assert_eq!(entry.operation, Operation::Noop);
        assert!(coordinator.metadata().get(entry.record_id).await.unwrap().is_none());
        assert_eq!(
            coordinator.metadata().history(entry.record_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_touch_does_not_change_updated_at() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(record("likes tea", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();

        assert!(coordinator.touch(stored.id, Utc::now()).await.unwrap());
        let loaded = coordinator.metadata().get(stored.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 1);
        assert_eq!(
            loaded.updated_at.timestamp_micros(),
            stored.updated_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_restore_vector_and_remove_dangling() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(record("likes tea", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();
        coordinator.index().delete(stored.id).await.unwrap();

        assert!(coordinator.restore_vector(stored.id).await.unwrap());
        assert!(!coordinator.restore_vector(stored.id).await.unwrap());

        let stray = Uuid::new_v4();
        coordinator
            .index()
            .upsert(stray, &[0.0, 1.0, 0.0], IndexPayload::now())
            .await
            .unwrap();
        assert!(coordinator.remove_dangling(stray).await.unwrap());
        assert!(!coordinator.remove_dangling(stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let coordinator = create_coordinator();
        let stored = coordinator
            .add(record("likes tea", [1.0, 0.0, 0.0]), Actor::Engine)
            .await
            .unwrap();

        coordinator.reset().await.unwrap();

        assert!(coordinator.index().ids().await.unwrap().is_empty());
        assert_eq!(
            coordinator.metadata().count(&RecordFilter::new()).await.unwrap(),
            0
        );
        assert!(coordinator.metadata().history(stored.id).await.unwrap().is_empty());
    }
}
