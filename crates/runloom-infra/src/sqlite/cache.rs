//! SQLite step cache implementation.
//!
//! Implements `StepCacheRepository` from `runloom-core`. Entries are keyed by
//! the opaque cache key; writes are upserts that keep the original
//! `created_at`. Invalidation deletes by `(workflow_name, step_id)` or by
//! workflow, served by the `idx_step_cache_workflow_step` index.

use chrono::{DateTime, Utc};
use runloom_core::repository::cache::StepCacheRepository;
use runloom_types::cache::{CacheEntry, CacheWrite};
use runloom_types::error::RepositoryError;
use runloom_types::workflow::CacheScope;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `StepCacheRepository`.
pub struct SqliteStepCache {
    pool: DatabasePool,
}

impl SqliteStepCache {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct CacheRow {
    cache_key: String,
    workflow_name: String,
    step_id: String,
    input_hash: String,
    artifact_ids: String,
    data: Option<String>,
    scope: String,
    created_at: String,
    updated_at: String,
}

impl CacheRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            cache_key: row.try_get("cache_key")?,
            workflow_name: row.try_get("workflow_name")?,
            step_id: row.try_get("step_id")?,
            input_hash: row.try_get("input_hash")?,
            artifact_ids: row.try_get("artifact_ids")?,
            data: row.try_get("data")?,
            scope: row.try_get("scope")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, RepositoryError> {
        let artifact_ids = serde_json::from_str(&self.artifact_ids)
            .map_err(|e| RepositoryError::Query(format!("invalid artifact_ids: {e}")))?;
        let data = self
            .data
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid cache data: {e}")))
            })
            .transpose()?;
        let scope = self
            .scope
            .parse::<CacheScope>()
            .map_err(RepositoryError::Query)?;

        Ok(CacheEntry {
            cache_key: self.cache_key,
            workflow_name: self.workflow_name,
            step_id: self.step_id,
            input_hash: self.input_hash,
            artifact_ids,
            data,
            scope,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

impl StepCacheRepository for SqliteStepCache {
    async fn get(&self, cache_key: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM step_cache WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = CacheRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_entry()?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, write: &CacheWrite) -> Result<(), RepositoryError> {
        let artifact_ids = serde_json::to_string(&write.artifact_ids)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let data = write
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO step_cache
               (cache_key, workflow_name, step_id, input_hash, artifact_ids, data, scope, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(cache_key) DO UPDATE SET
                 artifact_ids = excluded.artifact_ids,
                 data = excluded.data,
                 scope = excluded.scope,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&write.cache_key)
        .bind(&write.workflow_name)
        .bind(&write.step_id)
        .bind(&write.input_hash)
        .bind(&artifact_ids)
        .bind(&data)
        .bind(write.scope.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            cache_key = write.cache_key.as_str(),
            artifacts = write.artifact_ids.len(),
            "step cache entry written"
        );
        Ok(())
    }

    async fn invalidate_step(&self, workflow_name: &str, step_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM step_cache WHERE workflow_name = ? AND step_id = ?")
            .bind(workflow_name)
            .bind(step_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::info!(
            workflow = workflow_name,
            step_id,
            removed = result.rows_affected(),
            "invalidated step cache"
        );
        Ok(result.rows_affected())
    }

    async fn invalidate_workflow(&self, workflow_name: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM step_cache WHERE workflow_name = ?")
            .bind(workflow_name)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::info!(
            workflow = workflow_name,
            removed = result.rows_affected(),
            "invalidated workflow cache"
        );
        Ok(result.rows_affected())
    }
}
