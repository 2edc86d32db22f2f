//! Local vector index in SQLite.
//!
//! One row per vector:
//!
//! ```sql
//! vectors(id TEXT PRIMARY KEY, source_file_id TEXT, vector BLOB, metadata_json TEXT)
//! ```
//!
//! Vectors are stored as little-endian `f32` blobs. Queries scan every row
//! (narrowed by `source_file_id` when the filter names one) and rank by
//! cosine similarity, which is fine for a single library of documents.

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use docsync_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docsync_core::index::{top_k, MetadataFilter, VectorIndex};
use docsync_core::models::{VectorMatch, VectorMetadata, VectorRecord};
use docsync_core::ProviderError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{info, warn};

pub struct SqliteIndex {
    pool: SqlitePool,
}

fn db_error(err: sqlx::Error) -> ProviderError {
    ProviderError::Other(format!("sqlite: {}", err))
}

impl SqliteIndex {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;
        info!(path = %path.display(), "opened sqlite vector index");
        Ok(Self { pool })
    }

    pub async fn count(&self) -> Result<i64, ProviderError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            id TEXT PRIMARY KEY,
            source_file_id TEXT NOT NULL,
            vector BLOB NOT NULL,
            metadata_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_source_file_id ON vectors(source_file_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, ProviderError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for record in records {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| ProviderError::Other(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO vectors (id, source_file_id, vector, metadata_json)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source_file_id = excluded.source_file_id,
                    vector = excluded.vector,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&record.id)
            .bind(&record.metadata.source_file_id)
            .bind(vec_to_blob(&record.values))
            .bind(metadata)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(records.len())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, ProviderError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for id in ids {
            sqlx::query("DELETE FROM vectors WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(ids.len())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>, ProviderError> {
        let file_id = filter.and_then(|f| f.equals.get("source_file_id"));
        let rows = match file_id {
            Some(id) => {
                sqlx::query("SELECT id, vector, metadata_json FROM vectors WHERE source_file_id = ?")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT id, vector, metadata_json FROM vectors")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_error)?;

        let mut matches = Vec::new();
        for row in rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("vector");
            let metadata_json: String = row.get("metadata_json");
            let metadata: VectorMetadata = match serde_json::from_str(&metadata_json) {
                Ok(m) => m,
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping vector with unreadable metadata");
                    continue;
                }
            };
            if let Some(filter) = filter {
                if !filter.matches(&metadata) {
                    continue;
                }
            }
            let score = cosine_similarity(vector, &blob_to_vec(&blob));
            matches.push(VectorMatch {
                id,
                score,
                metadata,
            });
        }
        Ok(top_k(matches, k))
    }
}
