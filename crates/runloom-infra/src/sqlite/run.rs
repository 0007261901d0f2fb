//! SQLite run repository implementation.
//!
//! Implements `RunRepository` from `runloom-core` using sqlx with split
//! read/write pools. Every statement touches a single row keyed by
//! `(run_id, tenant_id)` or `(run_id, tenant_id, step_id)`. Run status moves
//! are guarded in SQL so a stale writer cannot regress a finished run.

use chrono::{DateTime, Utc};
use runloom_core::repository::run::RunRepository;
use runloom_types::error::RepositoryError;
use runloom_types::run::{Run, RunStatus, RunStep, RunStepStatus, RunStepUpdate, StepErrorRecord};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `RunRepository`.
pub struct SqliteRunRepository {
    pool: DatabasePool,
}

impl SqliteRunRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    tenant_id: String,
    workflow_name: String,
    workflow_version: String,
    trigger_type: String,
    trigger_payload: String,
    base_run_id: Option<String>,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            workflow_name: row.try_get("workflow_name")?,
            workflow_version: row.try_get("workflow_version")?,
            trigger_type: row.try_get("trigger_type")?,
            trigger_payload: row.try_get("trigger_payload")?,
            base_run_id: row.try_get("base_run_id")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
        })
    }

    fn into_run(self) -> Result<Run, RepositoryError> {
        let status = self
            .status
            .parse::<RunStatus>()
            .map_err(RepositoryError::Query)?;
        let trigger_payload = serde_json::from_str(&self.trigger_payload)
            .map_err(|e| RepositoryError::Query(format!("invalid trigger_payload: {e}")))?;

        Ok(Run {
            id: parse_uuid(&self.id)?,
            tenant_id: self.tenant_id,
            workflow_name: self.workflow_name,
            workflow_version: self.workflow_version,
            trigger_type: self.trigger_type,
            trigger_payload,
            base_run_id: self.base_run_id.as_deref().map(parse_uuid).transpose()?,
            status,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            error: self.error,
        })
    }
}

struct RunStepRow {
    id: String,
    run_id: String,
    tenant_id: String,
    step_id: String,
    skill_id: String,
    status: String,
    input_hash: String,
    attempt: i64,
    output_artifact_ids: Option<String>,
    output_data: Option<String>,
    cache_hit: bool,
    duration_ms: Option<i64>,
    error: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RunStepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            tenant_id: row.try_get("tenant_id")?,
            step_id: row.try_get("step_id")?,
            skill_id: row.try_get("skill_id")?,
            status: row.try_get("status")?,
            input_hash: row.try_get("input_hash")?,
            attempt: row.try_get("attempt")?,
            output_artifact_ids: row.try_get("output_artifact_ids")?,
            output_data: row.try_get("output_data")?,
            cache_hit: row.try_get("cache_hit")?,
            duration_ms: row.try_get("duration_ms")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_step(self) -> Result<RunStep, RepositoryError> {
        let status = self
            .status
            .parse::<RunStepStatus>()
            .map_err(RepositoryError::Query)?;
        let output_artifact_ids = self
            .output_artifact_ids
            .as_deref()
            .map(|s| {
                serde_json::from_str::<Vec<String>>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid output_artifact_ids: {e}")))
            })
            .transpose()?;
        let output_data = self
            .output_data
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid output_data: {e}")))
            })
            .transpose()?;
        let error = self
            .error
            .as_deref()
            .map(|s| {
                serde_json::from_str::<StepErrorRecord>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid step error: {e}")))
            })
            .transpose()?;

        Ok(RunStep {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            tenant_id: self.tenant_id,
            step_id: self.step_id,
            skill_id: self.skill_id,
            status,
            input_hash: self.input_hash,
            attempt: self.attempt as u32,
            output_artifact_ids,
            output_data,
            cache_hit: self.cache_hit,
            duration_ms: self.duration_ms.map(|ms| ms as u64),
            error,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ---------------------------------------------------------------------------
// RunRepository impl
// ---------------------------------------------------------------------------

impl RunRepository for SqliteRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO runs
               (id, tenant_id, workflow_name, workflow_version, trigger_type, trigger_payload,
                base_run_id, status, created_at, started_at, completed_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.tenant_id)
        .bind(&run.workflow_name)
        .bind(&run.workflow_version)
        .bind(&run.trigger_type)
        .bind(to_json(&run.trigger_payload)?)
        .bind(run.base_run_id.map(|id| id.to_string()))
        .bind(run.status.as_str())
        .bind(format_datetime(&run.created_at))
        .bind(run.started_at.as_ref().map(format_datetime))
        .bind(run.completed_at.as_ref().map(format_datetime))
        .bind(&run.error)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("run {} already exists", run.id))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid, tenant_id: &str) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ? AND tenant_id = ?")
            .bind(run_id.to_string())
            .bind(tenant_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn update_run_status(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let allowed = status.predecessors();
        let now = format_datetime(&Utc::now());
        let started_at = (status == RunStatus::Running).then(|| now.clone());
        let completed_at = status.is_terminal().then(|| now.clone());

        let mut affected = 0;
        if !allowed.is_empty() {
            let placeholders = vec!["?"; allowed.len()].join(", ");
            let sql = format!(
                "UPDATE runs SET status = ?, error = COALESCE(?, error), \
                 started_at = COALESCE(started_at, ?), completed_at = COALESCE(?, completed_at) \
                 WHERE id = ? AND tenant_id = ? AND status IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql)
                .bind(status.as_str())
                .bind(error)
                .bind(&started_at)
                .bind(&completed_at)
                .bind(run_id.to_string())
                .bind(tenant_id);
            for prev in allowed {
                query = query.bind(prev.as_str());
            }
            affected = query
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?
                .rows_affected();
        }

        if affected == 0 {
            // Distinguish a missing run from a refused transition.
            let current: Option<(String,)> =
                sqlx::query_as("SELECT status FROM runs WHERE id = ? AND tenant_id = ?")
                    .bind(run_id.to_string())
                    .bind(tenant_id)
                    .fetch_optional(&self.pool.writer)
                    .await
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
            return match current {
                None => Err(RepositoryError::NotFound),
                Some((from,)) => Err(RepositoryError::Conflict(format!(
                    "run {run_id} cannot move from {from} to {status}"
                ))),
            };
        }

        tracing::debug!(run_id = %run_id, status = %status, "run status updated");
        Ok(())
    }

    async fn create_run_step(&self, step: &RunStep) -> Result<(), RepositoryError> {
        let artifact_ids = step.output_artifact_ids.as_ref().map(to_json).transpose()?;
        let output_data = step.output_data.as_ref().map(to_json).transpose()?;
        let error = step.error.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO run_steps
               (id, run_id, tenant_id, step_id, skill_id, status, input_hash, attempt,
                output_artifact_ids, output_data, cache_hit, duration_ms, error,
                created_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(step.id.to_string())
        .bind(step.run_id.to_string())
        .bind(&step.tenant_id)
        .bind(&step.step_id)
        .bind(&step.skill_id)
        .bind(step.status.as_str())
        .bind(&step.input_hash)
        .bind(step.attempt as i64)
        .bind(&artifact_ids)
        .bind(&output_data)
        .bind(step.cache_hit)
        .bind(step.duration_ms.map(|ms| ms as i64))
        .bind(&error)
        .bind(format_datetime(&step.created_at))
        .bind(step.started_at.as_ref().map(format_datetime))
        .bind(step.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!(
                    "step '{}' already exists in run {}",
                    step.step_id, step.run_id
                ))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn find_run_step(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        step_id: &str,
    ) -> Result<Option<RunStep>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM run_steps WHERE run_id = ? AND tenant_id = ? AND step_id = ?",
        )
        .bind(run_id.to_string())
        .bind(tenant_id)
        .bind(step_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunStepRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_step()?))
            }
            None => Ok(None),
        }
    }

    async fn update_run_step(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        step_id: &str,
        update: &RunStepUpdate,
    ) -> Result<(), RepositoryError> {
        let artifact_ids = update.output_artifact_ids.as_ref().map(to_json).transpose()?;
        let output_data = update.output_data.as_ref().map(to_json).transpose()?;
        let error = update.error.as_ref().map(to_json).transpose()?;

        let result = sqlx::query(
            r#"UPDATE run_steps SET
                 status = COALESCE(?, status),
                 input_hash = COALESCE(?, input_hash),
                 attempt = COALESCE(?, attempt),
                 output_artifact_ids = COALESCE(?, CASE WHEN ? THEN NULL ELSE output_artifact_ids END),
                 output_data = COALESCE(?, CASE WHEN ? THEN NULL ELSE output_data END),
                 cache_hit = COALESCE(?, cache_hit),
                 duration_ms = COALESCE(?, CASE WHEN ? THEN NULL ELSE duration_ms END),
                 error = COALESCE(?, CASE WHEN ? THEN NULL ELSE error END),
                 started_at = COALESCE(?, started_at),
                 completed_at = COALESCE(?, CASE WHEN ? THEN NULL ELSE completed_at END)
               WHERE run_id = ? AND tenant_id = ? AND step_id = ?"#,
        )
        .bind(update.status.map(RunStepStatus::as_str))
        .bind(&update.input_hash)
        .bind(update.attempt.map(i64::from))
        .bind(&artifact_ids)
        .bind(update.clear_outcome)
        .bind(&output_data)
        .bind(update.clear_outcome)
        .bind(update.cache_hit)
        .bind(update.duration_ms.map(|ms| ms as i64))
        .bind(update.clear_outcome)
        .bind(&error)
        .bind(update.clear_outcome)
        .bind(update.started_at.as_ref().map(format_datetime))
        .bind(update.completed_at.as_ref().map(format_datetime))
        .bind(update.clear_outcome)
        .bind(run_id.to_string())
        .bind(tenant_id)
        .bind(step_id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        tracing::debug!(
            run_id = %run_id,
            step_id,
            status = update.status.map(RunStepStatus::as_str),
            "run step updated"
        );
        Ok(())
    }

    async fn list_run_steps(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
    ) -> Result<Vec<RunStep>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM run_steps WHERE run_id = ? AND tenant_id = ? ORDER BY rowid ASC",
        )
        .bind(run_id.to_string())
        .bind(tenant_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunStepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            steps.push(r.into_step()?);
        }
        Ok(steps)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
