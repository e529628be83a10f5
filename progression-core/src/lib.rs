//! Academy Progression - Core Library
//!
//! Gamified progression for martial-arts academy students:
//! - Metric adjustment by category, gender and physical condition
//! - Append-only XP ledger with levels and idempotent awards
//! - Achievements (typed unlock criteria) and instructor badges
//! - Weekly course challenges with per-student targets
//! - Attendance streaks, technique progress and checkpoint evaluations
//! - Belt degrees, graduation eligibility and course completion
//! - Dropout-risk estimation, recommendations and leaderboards
//! - Storage seam (repository traits) with an in-memory backend

pub mod achievements;
pub mod adjuster;
pub mod attendance;
pub mod badges;
pub mod challenges;
pub mod clock;
pub mod constants;
pub mod course;
pub mod engine;
pub mod error;
pub mod evaluations;
pub mod graduation;
pub mod leaderboard;
pub mod ledger;
pub mod logging;
pub mod recommendations;
pub mod risk;
pub mod store;
pub mod student;
pub mod techniques;

pub use engine::{EngineConfig, ProgressionEngine};
pub use error::{Processed, ProgressionError, ProgressionResult, StoreError};
