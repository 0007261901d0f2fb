//! Application state for commands that need storage.
//!
//! Resolves the data directory, loads `config.toml` and opens the SQLite
//! pool. Repositories are created from the pool on demand.

use runloom_infra::config::{data_dir, database_url, load_engine_config};
use runloom_infra::sqlite::cache::SqliteStepCache;
use runloom_infra::sqlite::pool::DatabasePool;
use runloom_infra::sqlite::run::SqliteRunRepository;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data dir, load config and connect to the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&config, &data_dir)).await?;

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self { db_pool })
    }

    pub fn run_repository(&self) -> SqliteRunRepository {
        SqliteRunRepository::new(self.db_pool.clone())
    }

    pub fn step_cache(&self) -> SqliteStepCache {
        SqliteStepCache::new(self.db_pool.clone())
    }
}
