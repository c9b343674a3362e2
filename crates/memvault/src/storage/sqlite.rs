//! SQLite metadata store.
//!
//! One connection behind a mutex; every call runs on the blocking pool, so
//! exactly one statement (or transaction) is in flight at a time. Timestamps
//! are stored as UTC microseconds, embeddings as little-endian `f32` blobs,
//! metadata as JSON text.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};
use uuid::Uuid;

use super::filter::RecordFilter;
use super::{MetadataStore, MetadataWrite};
use crate::error::{MemvaultError, Result};
use crate::record::{HistoryEntry, NewHistoryEntry, Record};

const BACKEND: &str = "sqlite";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id            TEXT PRIMARY KEY,
    content       TEXT NOT NULL,
    embedding     BLOB,
    importance    INTEGER NOT NULL CHECK (importance BETWEEN 1 AND 10),
    memory_type   TEXT NOT NULL,
    sub_type      TEXT NOT NULL,
    metadata      TEXT NOT NULL DEFAULT '{}',
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL,
    accessed_at   INTEGER NOT NULL,
    access_count  INTEGER NOT NULL DEFAULT 0 CHECK (access_count >= 0),
    decay_rate    REAL NOT NULL,
    operation     TEXT NOT NULL,
    previous_id   TEXT,
    superseded_by TEXT,
    state         TEXT NOT NULL,
    repair        TEXT,
    CHECK (updated_at >= created_at)
);
CREATE INDEX IF NOT EXISTS idx_records_created_at ON records (created_at DESC);
CREATE INDEX IF NOT EXISTS idx_records_state ON records (state);

CREATE TABLE IF NOT EXISTS history (
    sequence     INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id    TEXT NOT NULL,
    operation    TEXT NOT NULL,
    actor        TEXT NOT NULL,
    outcome      TEXT NOT NULL,
    timestamp    INTEGER NOT NULL,
    old_content  TEXT,
    new_content  TEXT,
    related_id   TEXT,
    detail       TEXT,
    entry_id     TEXT NOT NULL UNIQUE
);
CREATE INDEX IF NOT EXISTS idx_history_record ON history (record_id, sequence);
"#;

const RECORD_COLUMNS: &str = "id, content, embedding, importance, memory_type, sub_type, \
     metadata, created_at, updated_at, accessed_at, access_count, decay_rate, operation, \
     previous_id, superseded_by, state, repair";

const HISTORY_COLUMNS: &str = "sequence, record_id, operation, actor, outcome, timestamp, \
     old_content, new_content, related_id, detail, entry_id";

/// Metadata store backed by a single SQLite database
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| map_error("open", e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| map_error("enable WAL", e))?;
        info!("Opened metadata store at {}", path.display());
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, gone when the store is dropped.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| map_error("open", e))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_millis(250))
            .map_err(|e| map_error("set busy timeout", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| map_error("apply schema", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| MemvaultError::Storage {
                backend: BACKEND,
                cause: format!("{operation}: connection lock poisoned"),
            })?;
            f(&mut guard).map_err(|e| map_error(operation, e))
        })
        .await
        .map_err(|e| MemvaultError::StoreUnavailable {
            backend: BACKEND,
            cause: format!("{operation}: worker task failed: {e}"),
        })?
    }
}

/// Busy and locked databases are worth retrying; everything else is not.
fn map_error(operation: &str, e: rusqlite::Error) -> MemvaultError {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ) =>
        {
            MemvaultError::StoreUnavailable {
                backend: BACKEND,
                cause: format!("{operation}: {e}"),
            }
        }
        _ => MemvaultError::Storage {
            backend: BACKEND,
            cause: format!("{operation}: {e}"),
        },
    }
}

fn decode_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(column: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_micros(micros).single().ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(column, micros)
    })
}

fn parse_uuid(column: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| decode_error(column, e))
}

fn parse_label<T>(column: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = crate::record::ValidationError>,
{
    value.parse::<T>().map_err(|e| decode_error(column, e))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    let id: String = row.get(0)?;
    let embedding: Option<Vec<u8>> = row.get(2)?;
    let importance: i64 = row.get(3)?;
    let metadata: String = row.get(6)?;
    let operation: String = row.get(12)?;
    let previous_id: Option<String> = row.get(13)?;
    let superseded_by: Option<String> = row.get(14)?;
    let state: String = row.get(15)?;
    let repair: Option<String> = row.get(16)?;

    Ok(Record {
        id: parse_uuid(0, &id)?,
        content: row.get(1)?,
        embedding: embedding.as_deref().map(decode_embedding),
        importance: crate::record::Importance::new(importance)
            .map_err(|e| decode_error(3, e))?,
        memory_type: row.get(4)?,
        sub_type: row.get(5)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| decode_error(6, e))?,
        created_at: from_micros(7, row.get(7)?)?,
        updated_at: from_micros(8, row.get(8)?)?,
        accessed_at: from_micros(9, row.get(9)?)?,
        access_count: row.get(10)?,
        decay_rate: row.get(11)?,
        operation: parse_label(12, &operation)?,
        previous_id: previous_id.map(|v| parse_uuid(13, &v)).transpose()?,
        superseded_by: superseded_by.map(|v| parse_uuid(14, &v)).transpose()?,
        state: parse_label(15, &state)?,
        repair: repair.map(|v| parse_label(16, &v)).transpose()?,
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let record_id: String = row.get(1)?;
    let operation: String = row.get(2)?;
    let actor: String = row.get(3)?;
    let outcome: String = row.get(4)?;
    let related_id: Option<String> = row.get(8)?;
    let entry_id: String = row.get(10)?;

    Ok(HistoryEntry {
        sequence: row.get(0)?,
        entry_id: parse_uuid(10, &entry_id)?,
        record_id: parse_uuid(1, &record_id)?,
        operation: parse_label(2, &operation)?,
        actor: parse_label(3, &actor)?,
        outcome: parse_label(4, &outcome)?,
        timestamp: from_micros(5, row.get(5)?)?,
        old_content: row.get(6)?,
        new_content: row.get(7)?,
        related_id: related_id.map(|v| parse_uuid(8, &v)).transpose()?,
        detail: row.get(9)?,
    })
}

fn put_record(tx: &rusqlite::Transaction<'_>, record: &Record) -> rusqlite::Result<()> {
    let metadata = serde_json::to_string(&record.metadata)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO records ({RECORD_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            record.id.to_string(),
            record.content,
            record.embedding.as_deref().map(encode_embedding),
            i64::from(record.importance.get()),
            record.memory_type,
            record.sub_type,
            metadata,
            to_micros(record.created_at),
            to_micros(record.updated_at),
            to_micros(record.accessed_at),
            record.access_count,
            record.decay_rate,
            record.operation.as_str(),
            record.previous_id.map(|id| id.to_string()),
            record.superseded_by.map(|id| id.to_string()),
            record.state.as_str(),
            record.repair.map(|r| r.as_str()),
        ],
    )?;
    Ok(())
}

/// Append one entry. An entry id that is already present (a retried commit
/// whose first attempt landed) returns the stored row instead.
fn append_history(
    tx: &rusqlite::Transaction<'_>,
    entry: NewHistoryEntry,
) -> rusqlite::Result<HistoryEntry> {
    let inserted = tx.execute(
        "INSERT INTO history \
         (record_id, operation, actor, outcome, timestamp, old_content, new_content, related_id, detail, entry_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT (entry_id) DO NOTHING",
        params![
            entry.record_id.to_string(),
            entry.operation.as_str(),
            entry.actor.as_str(),
            entry.outcome.as_str(),
            to_micros(entry.timestamp),
            entry.old_content,
            entry.new_content,
            entry.related_id.map(|id| id.to_string()),
            entry.detail,
            entry.entry_id.to_string(),
        ],
    )?;
    if inserted == 0 {
        return tx.query_row(
            &format!("SELECT {HISTORY_COLUMNS} FROM history WHERE entry_id = ?1"),
            params![entry.entry_id.to_string()],
            row_to_history,
        );
    }
    Ok(entry.with_sequence(tx.last_insert_rowid()))
}

/// WHERE clause text and parameters for a filter, `1 = 1` when empty.
fn where_clause(filter: &RecordFilter) -> (String, Vec<rusqlite::types::Value>) {
    match filter.to_sql() {
        Some(clause) => (clause.sql, clause.params),
        None => ("1 = 1".to_string(), Vec::new()),
    }
}

/// Escape LIKE wildcards so terms match literally (with `ESCAPE '\'`).
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get(&self, id: Uuid) -> Result<Option<Record>> {
        self.with_conn("get record", move |conn| {
            conn.query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id.to_string()],
                row_to_record,
            )
            .optional()
        })
        .await
    }

    async fn commit(
        &self,
        writes: Vec<MetadataWrite>,
        history: Vec<NewHistoryEntry>,
    ) -> Result<Vec<HistoryEntry>> {
        debug!(
            writes = writes.len(),
            history = history.len(),
            "Committing metadata batch"
        );
        self.with_conn("commit", move |conn| {
            let tx = conn.transaction()?;
            for write in &writes {
                match write {
                    MetadataWrite::Put(record) => put_record(&tx, record)?,
                    MetadataWrite::Delete(id) => {
                        tx.execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])?;
                    }
                }
            }
            let mut appended = Vec::with_capacity(history.len());
            for entry in history {
                appended.push(append_history(&tx, entry)?);
            }
            tx.commit()?;
            Ok(appended)
        })
        .await
    }

    async fn list(&self, filter: &RecordFilter, limit: usize, offset: usize) -> Result<Vec<Record>> {
        let (clause, mut values) = where_clause(filter);
        values.push(rusqlite::types::Value::Integer(sql_limit(limit)));
        values.push(rusqlite::types::Value::Integer(sql_limit(offset)));
        self.with_conn("list records", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records WHERE {clause} \
                 ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?"
            ))?;
            let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
            rows.collect()
        })
        .await
    }

    async fn count(&self, filter: &RecordFilter) -> Result<usize> {
        let (clause, values) = where_clause(filter);
        self.with_conn("count records", move |conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM records WHERE {clause}"),
                params_from_iter(values),
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
        })
        .await
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &RecordFilter,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| {
                t.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|t| t.chars().count() >= 2)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let (clause, mut values) = where_clause(filter);
        let like = vec!["lower(content) LIKE ? ESCAPE '\\'"; terms.len()].join(" OR ");
        values.extend(
            terms
                .iter()
                .map(|t| rusqlite::types::Value::Text(like_pattern(t))),
        );
        values.push(rusqlite::types::Value::Integer(sql_limit(limit)));

        self.with_conn("keyword search", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records \
                 WHERE state = 'active' AND {clause} AND ({like}) \
                 ORDER BY updated_at DESC, id ASC LIMIT ?"
            ))?;
            let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
            rows.collect()
        })
        .await
    }

    async fn history(&self, id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.with_conn("read history", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM history WHERE record_id = ?1 ORDER BY sequence ASC"
            ))?;
            let rows = stmt.query_map(params![id.to_string()], row_to_history)?;
            rows.collect()
        })
        .await
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn("touch record", move |conn| {
            let changed = conn.execute(
                "UPDATE records SET access_count = access_count + 1, \
                 accessed_at = MAX(accessed_at, ?2) WHERE id = ?1",
                params![id.to_string(), to_micros(at)],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn("clear", |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM records", [])?;
            tx.execute("DELETE FROM history", [])?;
            tx.commit()
        })
        .await
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Actor, Importance, Operation, RecordState, RepairAction};
    use serde_json::json;

    fn create_test_record(content: &str) -> Record {
        Record::new(content, Importance::new(5).unwrap()).with_embedding(vec![0.25, -0.5, 1.0])
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut metadata = serde_json::Map::new();
        metadata.insert("user_id".to_string(), json!("alice"));
        metadata.insert("tags".to_string(), json!(["a", "b"]));
        let mut record = create_test_record("User likes tea").with_metadata(metadata);
        record.mark_inconsistent(RepairAction::Index);

        store.put(&record).await.unwrap();
        let loaded = store.get(record.id).await.unwrap().expect("record exists");

        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.content, record.content);
        assert_eq!(loaded.embedding, record.embedding);
        assert_eq!(loaded.metadata, record.metadata);
        assert_eq!(loaded.state(), RecordState::Inconsistent);
        assert_eq!(loaded.repair(), Some(RepairAction::Index));
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            record.created_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces() {
        let store = SqliteStore::in_memory().unwrap();
        let mut record = create_test_record("first");
        store.put(&record).await.unwrap();

        record.content = "second".to_string();
        record.importance = Importance::new(9).unwrap();
        store.put(&record).await.unwrap();

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "second");
        assert_eq!(loaded.importance.get(), 9);
        assert_eq!(store.count(&RecordFilter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_is_atomic() {
        let store = SqliteStore::in_memory().unwrap();
        let good = create_test_record("good");
        let mut bad = create_test_record("bad");
        // Violates the updated_at >= created_at check
        bad.updated_at = bad.created_at - chrono::Duration::seconds(5);

        let result = store
            .commit(
                vec![MetadataWrite::Put(good.clone()), MetadataWrite::Put(bad)],
                vec![NewHistoryEntry::new(good.id, Operation::Add, Actor::Engine)],
            )
            .await;

        assert!(result.is_err());
        assert!(store.get(good.id).await.unwrap().is_none());
        assert!(store.history(good.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_ordered_and_survives_delete() {
        let store = SqliteStore::in_memory().unwrap();
        let record = create_test_record("likes tea");

        store
            .commit(
                vec![MetadataWrite::Put(record.clone())],
                vec![NewHistoryEntry::new(record.id, Operation::Add, Actor::Engine)
                    .new_content("likes tea")],
            )
            .await
            .unwrap();
        store
            .commit(
                vec![MetadataWrite::Delete(record.id)],
                vec![NewHistoryEntry::new(record.id, Operation::Delete, Actor::User)
                    .old_content("likes tea")],
            )
            .await
            .unwrap();

        assert!(store.get(record.id).await.unwrap().is_none());
        let history = store.history(record.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, Operation::Add);
        assert_eq!(history[1].operation, Operation::Delete);
        assert_eq!(history[1].actor, Actor::User);
        assert!(history[0].sequence < history[1].sequence);
    }

    #[tokio::test]
    async fn test_replayed_commit_appends_history_once() {
        let store = SqliteStore::in_memory().unwrap();
        let record = create_test_record("likes tea");
        let entry = NewHistoryEntry::new(record.id, Operation::Add, Actor::Engine);

        let first = store
            .commit(vec![MetadataWrite::Put(record.clone())], vec![entry.clone()])
            .await
            .unwrap();
        let replayed = store
            .commit(vec![MetadataWrite::Put(record.clone())], vec![entry.clone()])
            .await
            .unwrap();

        assert_eq!(replayed, first);
        let history = store.history(record.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entry_id, entry.entry_id);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_with_paging() {
        let store = SqliteStore::in_memory().unwrap();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut record = create_test_record(&format!("record {i}"));
            record.created_at = base + chrono::Duration::seconds(i);
            record.updated_at = record.created_at;
            ids.push(record.id);
            store.put(&record).await.unwrap();
        }

        let first_page = store.list(&RecordFilter::new(), 2, 0).await.unwrap();
        assert_eq!(first_page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let last_page = store.list(&RecordFilter::new(), 2, 4).await.unwrap();
        assert_eq!(last_page.len(), 1);
        assert_eq!(last_page[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_list_filters_by_metadata() {
        let store = SqliteStore::in_memory().unwrap();
        for (content, user) in [("tea", "alice"), ("coffee", "bob"), ("water", "alice")] {
            let mut metadata = serde_json::Map::new();
            metadata.insert("user_id".to_string(), json!(user));
            store
                .put(&create_test_record(content).with_metadata(metadata))
                .await
                .unwrap();
        }

        let filter = RecordFilter::new().with_metadata("user_id", "alice");
        let records = store.list(&filter, 10, 0).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.metadata["user_id"] == json!("alice")));
        assert_eq!(store.count(&filter).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let store = SqliteStore::in_memory().unwrap();
        let tea = create_test_record("User drinks green tea");
        let coffee = create_test_record("User drinks coffee");
        let mut superseded = create_test_record("User hated tea once");
        superseded.mark_superseded(tea.id, Utc::now());
        for record in [&tea, &coffee, &superseded] {
            store.put(record).await.unwrap();
        }

        let hits = store
            .keyword_search("tea?", &RecordFilter::new(), 10)
            .await
            .unwrap();
        assert_eq!(hits.iter().map(|r| r.id).collect::<Vec<_>>(), vec![tea.id]);

        let none = store
            .keyword_search("100%", &RecordFilter::new(), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_touch_updates_access_stats() {
        let store = SqliteStore::in_memory().unwrap();
        let record = create_test_record("likes tea");
        store.put(&record).await.unwrap();

        let later = record.accessed_at + chrono::Duration::minutes(5);
        assert!(store.touch(record.id, later).await.unwrap());
        assert!(!store.touch(Uuid::new_v4(), later).await.unwrap());

        let loaded = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 1);
        assert_eq!(loaded.accessed_at.timestamp_micros(), later.timestamp_micros());
        assert_eq!(loaded.updated_at.timestamp_micros(), record.updated_at.timestamp_micros());
    }

    #[tokio::test]
    async fn test_clear_removes_records_and_history() {
        let store = SqliteStore::in_memory().unwrap();
        let record = create_test_record("likes tea");
        store
            .commit(
                vec![MetadataWrite::Put(record.clone())],
                vec![NewHistoryEntry::new(record.id, Operation::Add, Actor::Engine)],
            )
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.count(&RecordFilter::new()).await.unwrap(), 0);
        assert!(store.history(record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("memvault.db");
        let record = create_test_record("persisted");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(&record).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get(record.id).await.unwrap().is_some());
    }

    #[test]
    fn test_embedding_encoding() {
        let values = vec![0.0, -1.5, 3.25, f32::MIN_POSITIVE];
        assert_eq!(decode_embedding(&encode_embedding(&values)), values);
    }
}
