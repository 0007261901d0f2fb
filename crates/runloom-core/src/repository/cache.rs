//! Step cache repository trait definition.
//!
//! The cache is content-addressed by step input, not time-addressed: there
//! is no TTL, entries are overwritten on re-execution of the same key and
//! removed only by explicit invalidation.

use runloom_types::cache::{CacheEntry, CacheWrite};
use runloom_types::error::RepositoryError;

/// Repository trait for the step cache.
pub trait StepCacheRepository: Send + Sync {
    /// Look up an entry by its cache key.
    fn get(
        &self,
        cache_key: &str,
    ) -> impl std::future::Future<Output = Result<Option<CacheEntry>, RepositoryError>> + Send;

    /// Upsert: overwrite artifact ids, data and scope if the key exists,
    /// otherwise insert.
    fn set(
        &self,
        write: &CacheWrite,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete every entry for `(workflow_name, step_id)`. Returns the count removed.
    fn invalidate_step(
        &self,
        workflow_name: &str,
        step_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete every entry for `workflow_name`. Returns the count removed.
    fn invalidate_workflow(
        &self,
        workflow_name: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
