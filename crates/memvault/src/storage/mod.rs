//! Store ports and their adapters.
//!
//! The metadata store is the system of record: it owns every record field and
//! the audit trail. The vector index holds only vectors plus enough payload to
//! map a hit back to a record id.

pub mod filter;
pub mod lance;
pub mod memory;
pub mod sqlite;

pub use filter::RecordFilter;
pub use lance::LanceIndex;
pub use memory::InMemoryVectorIndex;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::record::{HistoryEntry, NewHistoryEntry, Record};

/// Payload stored next to each vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPayload {
    /// When the vector was written; breaks distance ties, newest first
    pub inserted_at: DateTime<Utc>,
}

impl IndexPayload {
    pub fn now() -> Self {
        Self {
            inserted_at: Utc::now(),
        }
    }
}

/// A nearest-neighbour result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub id: Uuid,
    /// Raw cosine distance in `[0, 2]`
    pub distance: f32,
}

/// Similarity index over record embeddings.
///
/// `search` returns hits ascending by distance, ties broken by insertion
/// recency (most recent first). A missing index searches as empty.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for `id`
    async fn upsert(&self, id: Uuid, vector: &[f32], payload: IndexPayload) -> Result<()>;

    /// Remove `id`; returns whether it was present
    async fn delete(&self, id: Uuid) -> Result<bool>;

    async fn search(&self, query: &[f32], k: usize, max_distance: f32) -> Result<Vec<VectorHit>>;

    async fn contains(&self, id: Uuid) -> Result<bool>;

    /// Every id currently indexed
    async fn ids(&self) -> Result<Vec<Uuid>>;

    async fn clear(&self) -> Result<()>;

    /// Backend name for errors and logs
    fn backend(&self) -> &'static str;
}

/// One staged change to the metadata store
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataWrite {
    /// Insert or replace the full record
    Put(Record),
    Delete(Uuid),
}

impl MetadataWrite {
    pub fn record_id(&self) -> Uuid {
        match self {
            MetadataWrite::Put(record) => record.id,
            MetadataWrite::Delete(id) => *id,
        }
    }
}

/// System of record for record fields and history.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Record>>;

    /// Apply all writes and append all history entries atomically.
    ///
    /// Returns the appended entries with their assigned sequence numbers.
    async fn commit(
        &self,
        writes: Vec<MetadataWrite>,
        history: Vec<NewHistoryEntry>,
    ) -> Result<Vec<HistoryEntry>>;

    /// Records matching `filter`, newest first
    async fn list(&self, filter: &RecordFilter, limit: usize, offset: usize) -> Result<Vec<Record>>;

    async fn count(&self, filter: &RecordFilter) -> Result<usize>;

    /// Active records whose content contains any of the query's terms
    async fn keyword_search(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<Record>>;

    /// History of one record id, oldest first
    async fn history(&self, id: Uuid) -> Result<Vec<HistoryEntry>>;

    /// Count a touching read; returns false when the record does not exist
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Remove every record and history entry
    async fn clear(&self) -> Result<()>;

    /// Backend name for errors and logs
    fn backend(&self) -> &'static str;

    async fn put(&self, record: &Record) -> Result<()> {
        self.commit(vec![MetadataWrite::Put(record.clone())], Vec::new())
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.commit(vec![MetadataWrite::Delete(id)], Vec::new())
            .await
            .map(|_| ())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let mut appended = self.commit(Vec::new(), vec![entry]).await?;
        appended.pop().ok_or_else(|| crate::error::MemvaultError::Storage {
            backend: self.backend(),
            cause: "history append returned no entry".to_string(),
        })
    }
}
