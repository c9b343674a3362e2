use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-record async locks.
///
/// Entries are created on demand and dropped once no guard or waiter holds
/// them, so the map only ever contains ids with work in flight.
#[derive(Debug, Default)]
pub struct RecordLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Guards for a set of ids; releases and prunes them on drop
pub struct LockSet<'a> {
    owner: &'a RecordLocks,
    held: Vec<(Uuid, OwnedMutexGuard<()>)>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every id in `ids`, always in sorted order.
    pub async fn acquire(&self, ids: &[Uuid]) -> LockSet<'_> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut held = Vec::with_capacity(sorted.len());
        for id in sorted {
            let lock = self
                .locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            held.push((id, lock.lock_owned().await));
        }

        LockSet { owner: self, held }
    }

    /// Number of ids currently tracked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        for (id, guard) in self.held.drain(..) {
            drop(guard);
            self.owner
                .locks
                .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}
