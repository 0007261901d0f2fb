//! Run repository trait definition.
//!
//! Defines the storage interface for runs and their per-step rows. Every
//! access is scoped by `(run_id, tenant_id)` and every mutation is a
//! single-row insert or update, so concurrent runs never contend on shared
//! rows. The infrastructure layer (runloom-infra) implements this trait with
//! SQLite persistence.

use runloom_types::error::RepositoryError;
use runloom_types::run::{Run, RunStatus, RunStep, RunStepUpdate};
use uuid::Uuid;

/// Repository trait for run and run-step persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a new run record.
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by ID within a tenant.
    fn get_run(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// Move a run to `status`.
    ///
    /// Implementations reject transitions that `RunStatus::can_transition_to`
    /// forbids with `RepositoryError::Conflict`, stamp `started_at` on the
    /// first move to `running` and `completed_at` on any terminal move.
    fn update_run_status(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Insert one step row. Fails with `Conflict` if `(run_id, step_id)` exists.
    fn create_run_step(
        &self,
        step: &RunStep,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Find the step row for `(run_id, step_id)`.
    fn find_run_step(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        step_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<RunStep>, RepositoryError>> + Send;

    /// Apply a patch to the step row for `(run_id, step_id)`.
    ///
    /// Returns `RepositoryError::NotFound` if the row does not exist.
    fn update_run_step(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
        step_id: &str,
        update: &RunStepUpdate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all step rows for a run, in creation (topological) order.
    fn list_run_steps(
        &self,
        run_id: &Uuid,
        tenant_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<RunStep>, RepositoryError>> + Send;
}
