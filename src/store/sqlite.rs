//! SQLite-backed [`VectorIndex`].
//!
//! Schema:
//!
//! - `collections(name, dense_name, dense_dims, distance, sparse_name, sparse_modifier, created_at)`
//! - `points(id, collection, video_id, payload_json, dense, sparse_indices, sparse_values)`
//!
//! Vectors are little-endian blobs. Queries load the candidate rows for the
//! collection (and video, when filtered), rank them by cosine similarity and
//! by sparse dot product, and fuse the two top-K lists with RRF. When the
//! collection's sparse modifier is IDF, query term weights are scaled by
//! their IDF over the whole collection first.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{Payload, ScoredPayload, SparseVector, StoredRecord};
use crate::search::rrf_fuse;

use super::{
    idf, CollectionSchema, EnsureOutcome, HybridQuery, SparseModifier, VectorIndex, DENSE_VECTOR, SPARSE_VECTOR,
};

/// Open (creating if needed) a SQLite database in WAL mode.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            dense_name TEXT NOT NULL,
            dense_dims INTEGER NOT NULL,
            distance TEXT NOT NULL,
            sparse_name TEXT NOT NULL,
            sparse_modifier TEXT NOT NULL DEFAULT 'none',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS points (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            video_id TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            dense BLOB NOT NULL,
            sparse_indices BLOB NOT NULL,
            sparse_values BLOB NOT NULL,
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_points_video ON points(collection, video_id)")
        .execute(pool)
        .await?;
    Ok(())
}

/// Local hybrid index over one named collection.
#[derive(Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
    collection: String,
}

impl SqliteIndex {
    pub async fn open(path: &Path, collection: &str) -> Result<Self> {
        let pool = connect(path).await?;
        Self::with_pool(pool, collection).await
    }

    pub async fn with_pool(pool: SqlitePool, collection: &str) -> Result<Self> {
        run_migrations(&pool).await?;
        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn existing_dims(&self, name: &str) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dense_dims FROM collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d as usize))
    }

    async fn sparse_modifier(&self) -> Result<SparseModifier> {
        let modifier: Option<String> =
            sqlx::query_scalar("SELECT sparse_modifier FROM collections WHERE name = ?")
                .bind(&self.collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(modifier
            .map(|m| SparseModifier::parse(&m))
            .unwrap_or(SparseModifier::None))
    }

    /// Scale each query term by its IDF across the collection.
    async fn apply_idf(&self, query: &SparseVector) -> Result<SparseVector> {
        let blobs: Vec<Vec<u8>> = sqlx::query_scalar("SELECT sparse_indices FROM points WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;

        let mut df: HashMap<u32, u64> = query.indices.iter().map(|i| (*i, 0)).collect();
        for blob in &blobs {
            for index in blob_to_indices(blob) {
                if let Some(n) = df.get_mut(&index) {
                    *n += 1;
                }
            }
        }

        let n = blobs.len() as u64;
        Ok(SparseVector {
            indices: query.indices.clone(),
            values: query
                .indices
                .iter()
                .zip(&query.values)
                .map(|(i, v)| v * idf(n, df.get(i).copied().unwrap_or(0)))
                .collect(),
        })
    }

    /// Write `records` in one transaction, first deleting the records of
    /// `replace` when given. Nothing is changed unless every statement
    /// succeeds.
    async fn write_batch(&self, replace: Option<&str>, records: &[StoredRecord]) -> Result<(u64, usize)> {
        let dims = self.existing_dims(&self.collection).await?.ok_or_else(|| {
            Error::backend(
                "sqlite",
                format!("collection '{}' does not exist; run `reel init`", self.collection),
            )
        })?;
        if let Some(record) = records.iter().find(|r| r.dense.len() != dims) {
            return Err(Error::Config(format!(
                "record has {} dense dimensions, collection expects {}",
                record.dense.len(),
                dims
            )));
        }

        let mut tx = self.pool.begin().await?;
        let removed = match replace {
            Some(video_id) => sqlx::query("DELETE FROM points WHERE collection = ? AND video_id = ?")
                .bind(&self.collection)
                .bind(video_id)
                .execute(&mut *tx)
                .await?
                .rows_affected(),
            None => 0,
        };

        for record in records {
            let payload_json = serde_json::to_string(&record.payload)?;
            sqlx::query(
                r#"
                INSERT INTO points (id, collection, video_id, payload_json, dense, sparse_indices, sparse_values)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    collection = excluded.collection,
                    video_id = excluded.video_id,
                    payload_json = excluded.payload_json,
                    dense = excluded.dense,
                    sparse_indices = excluded.sparse_indices,
                    sparse_values = excluded.sparse_values
                "#,
            )
            .bind(record.id.to_string())
            .bind(&self.collection)
            .bind(&record.payload.video_id)
            .bind(&payload_json)
            .bind(vec_to_blob(&record.dense))
            .bind(indices_to_blob(&record.sparse.indices))
            .bind(vec_to_blob(&record.sparse.values))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok((removed, records.len()))
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<EnsureOutcome> {
        if let Some(dims) = self.existing_dims(&schema.name).await? {
            schema.check_dims(dims)?;
            debug!(collection = %schema.name, "collection already exists");
            return Ok(EnsureOutcome::AlreadyExists);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO collections (name, dense_name, dense_dims, distance, sparse_name, sparse_modifier, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&schema.name)
        .bind(DENSE_VECTOR)
        .bind(schema.dense_dims as i64)
        .bind(schema.distance.as_str())
        .bind(SPARSE_VECTOR)
        .bind(schema.sparse_modifier.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            info!(
                collection = %schema.name,
                dims = schema.dense_dims,
                sparse_modifier = schema.sparse_modifier.as_str(),
                "created collection"
            );
            return Ok(EnsureOutcome::Created);
        }

        // Another caller created it between our check and insert.
        if let Some(dims) = self.existing_dims(&schema.name).await? {
            schema.check_dims(dims)?;
        }
        Ok(EnsureOutcome::AlreadyExists)
    }

    async fn upsert(&self, records: &[StoredRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let (_, written) = self.write_batch(None, records).await?;
        debug!(collection = %self.collection, records = written, "upserted batch");
        Ok(written)
    }

    async fn query(&self, query: &HybridQuery) -> Result<Vec<ScoredPayload>> {
        let rows = match &query.video_id {
            Some(video_id) => {
                sqlx::query(
                    "SELECT id, payload_json, dense, sparse_indices, sparse_values FROM points \
                     WHERE collection = ? AND video_id = ? ORDER BY rowid",
                )
                .bind(&self.collection)
                .bind(video_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, payload_json, dense, sparse_indices, sparse_values FROM points \
                     WHERE collection = ? ORDER BY rowid",
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let payload_json: String = row.get("payload_json");
            let dense: Vec<u8> = row.get("dense");
            let sparse_indices: Vec<u8> = row.get("sparse_indices");
            let sparse_values: Vec<u8> = row.get("sparse_values");
            let payload: Payload = serde_json::from_str(&payload_json)
                .map_err(|e| Error::MalformedRecord(format!("point {}: {}", id, e)))?;
            points.push(Point {
                id,
                payload,
                dense: blob_to_vec(&dense),
                sparse: SparseVector {
                    indices: blob_to_indices(&sparse_indices),
                    values: blob_to_vec(&sparse_values),
                },
            });
        }

        let dense_ranked = top_k(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| (i, cosine_similarity(&query.dense, &p.dense))),
            query.prefetch_limit,
        );
        let sparse_ranked = if query.sparse.is_empty() {
            Vec::new()
        } else {
            let weighted = match self.sparse_modifier().await? {
                SparseModifier::Idf => self.apply_idf(&query.sparse).await?,
                SparseModifier::None => query.sparse.clone(),
            };
            top_k(
                points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (i, weighted.dot(&p.sparse)))
                    .filter(|(_, s)| *s > 0.0),
                query.prefetch_limit,
            )
        };

        let fused = rrf_fuse(&[dense_ranked, sparse_ranked], query.rrf_k);
        let results: Vec<ScoredPayload> = fused
            .into_iter()
            .take(query.limit)
            .map(|(i, score)| ScoredPayload {
                id: points[i].id.clone(),
                score,
                payload: points[i].payload.clone(),
            })
            .collect();

        debug!(
            candidates = points.len(),
            returned = results.len(),
            "hybrid query"
        );
        Ok(results)
    }

    async fn count(&self, video_id: Option<&str>) -> Result<u64> {
        let n: i64 = match video_id {
            Some(v) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM points WHERE collection = ? AND video_id = ?")
                    .bind(&self.collection)
                    .bind(v)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM points WHERE collection = ?")
                    .bind(&self.collection)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(n as u64)
    }

    async fn delete_video(&self, video_id: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM points WHERE collection = ? AND video_id = ?")
            .bind(&self.collection)
            .bind(video_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!(video_id, removed, "deleted video records");
        Ok(removed)
    }

    async fn replace_video(&self, video_id: &str, records: &[StoredRecord]) -> Result<(u64, usize)> {
        let (removed, written) = self.write_batch(Some(video_id), records).await?;
        info!(video_id, removed, written, "replaced video records");
        Ok((removed, written))
    }
}

struct Point {
    id: String,
    payload: Payload,
    dense: Vec<f32>,
    sparse: SparseVector,
}

/// Indices of the `k` best scores, best first. Equal scores keep input order.
fn top_k(scores: impl Iterator<Item = (usize, f32)>, k: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = scores.collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().take(k).map(|(i, _)| i).collect()
}

fn indices_to_blob(indices: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(indices.len() * 4);
    for &i in indices {
        bytes.extend_from_slice(&i.to_le_bytes());
    }
    bytes
}

fn blob_to_indices(blob: &[u8]) -> Vec<u32> {
    blob.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
