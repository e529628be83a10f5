//! Storage Layer - PostgreSQL persistence for the progression engine
//!
//! Implements the engine's repository traits over a single PostgreSQL pool.
//!
//! ## Architecture
//! ```text
//! [ProgressionEngine]
//!       ↓
//! [Repository traits (academy_core::store)]
//!       ↓
//! [Pg*Repo adapters] → [PostgresStore] → PostgreSQL
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let storage = init_storage("postgres://...", 10).await?;
//! let engine = ProgressionEngine::new(storage, EngineConfig::default());
//! ```

pub mod migrations;
pub mod postgres;
pub mod postgres_repo_adapter;

use std::sync::Arc;
use tracing::info;

use academy_core::store::StorageManager;

use self::postgres::{PostgresError, PostgresStore};
use self::postgres_repo_adapter::*;

/// Build a StorageManager with every repository backed by PostgreSQL
pub fn storage_manager(pg: Arc<PostgresStore>) -> StorageManager {
    StorageManager {
        students: Box::new(PgStudentRepo::new(pg.clone())),
        courses: Box::new(PgCourseRepo::new(pg.clone())),
        ledger: Box::new(PgLedgerRepo::new(pg.clone())),
        achievements: Box::new(PgAchievementRepo::new(pg.clone())),
        activity: Box::new(PgActivityRepo::new(pg.clone())),
        graduation: Box::new(PgGraduationRepo::new(pg)),
    }
}

/// Initialize the storage layer
///
/// Connects to PostgreSQL, applies pending migrations and returns the
/// unified StorageManager.
pub async fn init_storage(postgres_url: &str, pg_max_connections: u32) -> Result<StorageManager, PostgresError> {
    let pg = Arc::new(PostgresStore::new(postgres_url, pg_max_connections).await?);
    info!("PostgreSQL progression store initialized");

    let manager = storage_manager(pg);
    info!("StorageManager initialized with 6 PostgreSQL repositories");
    Ok(manager)
}
