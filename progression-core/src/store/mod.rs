//! Storage seam for the progression engine.
//!
//! `repository` holds the async traits every backend implements;
//! `memory` is the in-process backend used by tests and tooling.

pub mod memory;
pub mod repository;

pub use memory::MemoryStore;
pub use repository::*;
