//! Academy Progression Store
//!
//! PostgreSQL backend for the progression engine:
//! - Schema migrations tracked in a `_migrations` table
//! - `PostgresStore` with transactional ledger appends and graduations
//! - Repository adapters implementing the engine's storage traits

pub mod storage;

pub use storage::postgres::{PostgresError, PostgresStore};
pub use storage::{init_storage, storage_manager};
