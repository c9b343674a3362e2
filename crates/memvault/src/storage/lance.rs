use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use super::{IndexPayload, VectorHit, VectorIndex};
use crate::error::{MemvaultError, Result};
use crate::record::ValidationError;

const BACKEND: &str = "lance";
const VECTORS_TABLE: &str = "vectors";

fn storage_error(context: &str, e: impl std::fmt::Display) -> MemvaultError {
    MemvaultError::Storage {
        backend: BACKEND,
        cause: format!("{context}: {e}"),
    }
}

/// Vector index backed by a LanceDB table of `(id, vector, inserted_at)` rows.
///
/// The table is created on the first upsert; until then searches return
/// nothing. Writes are serialized so a delete can report whether the id was
/// present.
pub struct LanceIndex {
    connection: Connection,
    dimension: usize,
    table: RwLock<Option<Table>>,
    write_lock: Mutex<()>,
}

impl LanceIndex {
    pub async fn connect(path: &Path, dimension: usize) -> Result<Self> {
        let uri = path.to_str().ok_or_else(|| MemvaultError::Config(format!(
            "vector path is not valid UTF-8: {}",
            path.display()
        )))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| MemvaultError::StoreUnavailable {
                backend: BACKEND,
                cause: format!("failed to connect to LanceDB: {e}"),
            })?;

        let names = connection
            .table_names()
            .execute()
            .await
            .map_err(|e| storage_error("failed to list tables", e))?;

        let table = if names.iter().any(|n| n == VECTORS_TABLE) {
            let table = connection
                .open_table(VECTORS_TABLE)
                .execute()
                .await
                .map_err(|e| storage_error("failed to open vectors table", e))?;
            info!("Opened vector index at {}", path.display());
            Some(table)
        } else {
            None
        };

        Ok(Self {
            connection,
            dimension,
            table: RwLock::new(table),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
            Field::new(
                "inserted_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
        ]))
    }

    fn to_batch(&self, id: Uuid, vector: &[f32], payload: IndexPayload) -> Result<RecordBatch> {
        let vectors = FixedSizeListArray::from_iter_primitive::<
            arrow_array::types::Float32Type,
            _,
            _,
        >(
            vec![Some(vector.iter().map(|&v| Some(v)).collect::<Vec<_>>())],
            self.dimension as i32,
        );

        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(vec![id.to_string()])),
                Arc::new(vectors),
                Arc::new(
                    TimestampMicrosecondArray::from(vec![payload.inserted_at.timestamp_micros()])
                        .with_timezone("UTC"),
                ),
            ],
        )
        .map_err(|e| storage_error("failed to build record batch", e))
    }

    fn empty_batch(&self) -> Result<RecordBatch> {
        let no_vectors: Vec<Option<Vec<Option<f32>>>> = vec![];
        RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(Vec::<String>::new())),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(no_vectors, self.dimension as i32)),
                Arc::new(TimestampMicrosecondArray::from(Vec::<i64>::new()).with_timezone("UTC")),
            ],
        )
        .map_err(|e| storage_error("failed to build empty batch", e))
    }

    async fn current_table(&self) -> Option<Table> {
        self.table.read().await.clone()
    }

    /// Open or create the table. Callers hold `write_lock`.
    async fn ensure_table(&self) -> Result<Table> {
        if let Some(table) = self.current_table().await {
            return Ok(table);
        }

        let schema = self.schema();
        let batches = RecordBatchIterator::new(vec![Ok(self.empty_batch()?)], schema);
        let table = self
            .connection
            .create_table(VECTORS_TABLE, Box::new(batches))
            .execute()
            .await
            .map_err(|e| storage_error("failed to create vectors table", e))?;
        debug!("Created vectors table");

        *self.table.write().await = Some(table.clone());
        Ok(table)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(ValidationError::new(
                "embedding",
                format!(
                    "expected {} dimensions, got {}",
                    self.dimension,
                    vector.len()
                ),
            )
            .into());
        }
        Ok(())
    }

    async fn count(table: &Table, filter: Option<String>) -> Result<usize> {
        table
            .count_rows(filter)
            .await
            .map_err(|e| storage_error("failed to count rows", e))
    }

    fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| storage_error("malformed result", format!("missing {name} column")))
    }

    fn parse_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw).map_err(|e| storage_error("failed to parse id", e))
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn upsert(&self, id: Uuid, vector: &[f32], payload: IndexPayload) -> Result<()> {
        self.check_dimension(vector)?;
        let _guard = self.write_lock.lock().await;
        let table = self.ensure_table().await?;

        let batch = self.to_batch(id, vector, payload)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], self.schema());

        let mut merge = table.merge_insert(&["id"]);
        merge
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge
            .execute(Box::new(batches))
            .await
            .map_err(|e| storage_error("failed to upsert vector", e))?;

        debug!(%id, "Upserted vector");
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(table) = self.current_table().await else {
            return Ok(false);
        };

        let filter = format!("id = '{id}'");
        let exists = Self::count(&table, Some(filter.clone())).await? > 0;
        if exists {
            table
                .delete(&filter)
                .await
                .map_err(|e| storage_error("failed to delete vector", e))?;
            debug!(%id, "Deleted vector");
        }

        Ok(exists)
    }

    async fn search(&self, query: &[f32], k: usize, max_distance: f32) -> Result<Vec<VectorHit>> {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(table) = self.current_table().await else {
            return Ok(Vec::new());
        };
        let k = k.min(Self::count(&table, None).await?);
        if k == 0 {
            return Ok(Vec::new());
        }

        let stream = table
            .query()
            .nearest_to(query)
            .map_err(|e| storage_error("failed to create vector query", e))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| storage_error("failed to execute search", e))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| storage_error("failed to collect search results", e))?;

        let mut hits = Vec::new();
        for batch in &batches {
            let ids = Self::string_column(batch, "id")?;
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| storage_error("malformed result", "missing _distance column"))?;
            let inserted = batch
                .column_by_name("inserted_at")
                .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
                .ok_or_else(|| storage_error("malformed result", "missing inserted_at column"))?;

            for row in 0..batch.num_rows() {
                let distance = distances.value(row);
                if distance > max_distance {
                    continue;
                }
                hits.push((
                    VectorHit {
                        id: Self::parse_id(ids.value(row))?,
                        distance,
                    },
                    inserted.value(row),
                ));
            }
        }

        hits.sort_by(|(a, a_at), (b, b_at)| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| b_at.cmp(a_at))
        });
        Ok(hits.into_iter().take(k).map(|(hit, _)| hit).collect())
    }

    async fn contains(&self, id: Uuid) -> Result<bool> {
        let Some(table) = self.current_table().await else {
            return Ok(false);
        };
        Ok(Self::count(&table, Some(format!("id = '{id}'"))).await? > 0)
    }

    async fn ids(&self) -> Result<Vec<Uuid>> {
        let Some(table) = self.current_table().await else {
            return Ok(Vec::new());
        };

        let batches: Vec<RecordBatch> = table
            .query()
            .execute()
            .await
            .map_err(|e| storage_error("failed to list ids", e))?
            .try_collect()
            .await
            .map_err(|e| storage_error("failed to collect ids", e))?;

        let mut ids = Vec::new();
        for batch in &batches {
            let column = Self::string_column(batch, "id")?;
            for row in 0..column.len() {
                ids.push(Self::parse_id(column.value(row))?);
            }
        }
        Ok(ids)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(table) = self.current_table().await {
            table
                .delete("true")
                .await
                .map_err(|e| storage_error("failed to clear vectors", e))?;
            info!("Cleared vector index");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const DIM: usize = 4;

    async fn create_index(dir: &tempfile::TempDir) -> LanceIndex {
        LanceIndex::connect(dir.path(), DIM).await.unwrap()
    }

    #[tokio::test]
    async fn test_search_before_first_write_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = create_index(&temp_dir).await;

        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 5, 2.0).await.unwrap();
        assert!(hits.is_empty());
        assert!(index.ids().await.unwrap().is_empty());
        assert!(!index.delete(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_and_search_orders_by_distance() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = create_index(&temp_dir).await;

        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index
            .upsert(near, &[1.0, 0.1, 0.0, 0.0], IndexPayload::now())
            .await
            .unwrap();
        index
            .upsert(far, &[0.0, 1.0, 0.0, 0.0], IndexPayload::now())
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 5, 2.0).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, near);
        assert_eq!(hits[1].id, far);
        assert!(hits[0].distance < hits[1].distance);

        let close_only = index.search(&[1.0, 0.0, 0.0, 0.0], 5, 0.5).await.unwrap();
        assert_eq!(close_only.iter().map(|h| h.id).collect::<Vec<_>>(), vec![near]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_vector() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = create_index(&temp_dir).await;

        let id = Uuid::new_v4();
        index
            .upsert(id, &[1.0, 0.0, 0.0, 0.0], IndexPayload::now())
            .await
            .unwrap();
        index
            .upsert(id, &[0.0, 0.0, 1.0, 0.0], IndexPayload::now())
            .await
            .unwrap();

        assert_eq!(index.ids().await.unwrap(), vec![id]);
        let hits = index.search(&[0.0, 0.0, 1.0, 0.0], 1, 2.0).await.unwrap();
        assert_eq!(hits[0].id, id);
        assert!(hits[0].distance < 1e-4);
    }

    #[tokio::test]
    async fn test_equal_distance_prefers_recent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = create_index(&temp_dir).await;

        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        let now = Utc::now();
        index
            .upsert(
                older,
                &[0.0, 1.0, 0.0, 0.0],
                IndexPayload {
                    inserted_at: now - chrono::Duration::hours(1),
                },
            )
            .await
            .unwrap();
        index
            .upsert(newer, &[0.0, 1.0, 0.0, 0.0], IndexPayload { inserted_at: now })
            .await
            .unwrap();

        let hits = index.search(&[0.0, 1.0, 0.0, 0.0], 2, 2.0).await.unwrap();
        assert_eq!(hits[0].id, newer);
        assert_eq!(hits[1].id, older);
    }

    #[tokio::test]
    async fn test_delete_and_contains() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = create_index(&temp_dir).await;

        let id = Uuid::new_v4();
        index
            .upsert(id, &[1.0, 1.0, 0.0, 0.0], IndexPayload::now())
            .await
            .unwrap();
        assert!(index.contains(id).await.unwrap());

        assert!(index.delete(id).await.unwrap());
        assert!(!index.delete(id).await.unwrap());
        assert!(!index.contains(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = create_index(&temp_dir).await;

        let err = index
            .upsert(Uuid::new_v4(), &[1.0, 0.0], IndexPayload::now())
            .await
            .unwrap_err();
        assert!(matches!(err, MemvaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reopen_and_clear() {
        let temp_dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let index = create_index(&temp_dir).await;
            index
                .upsert(id, &[0.5, 0.5, 0.5, 0.5], IndexPayload::now())
                .await
                .unwrap();
        }

        let reopened = create_index(&temp_dir).await;
        assert!(reopened.contains(id).await.unwrap());

        reopened.clear().await.unwrap();
        assert!(reopened.ids().await.unwrap().is_empty());
    }
}
