//! Per-student write serialization.
//!
//! Every write path for a student holds that student's `StudentGuard`.
//! Helpers that need the lock take `&StudentGuard` instead of locking
//! again, so nested steps (credit, then unlock, then credit) never
//! deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct StudentLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Proof that the holder owns the write lock for `student_id`.
pub struct StudentGuard {
    student_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl StudentGuard {
    pub fn student_id(&self) -> &str {
        &self.student_id
    }
}

impl StudentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, student_id: &str) -> StudentGuard {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(student_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        StudentGuard {
            student_id: student_id.to_string(),
            _guard: slot.lock_owned().await,
        }
    }

    /// Drop slots nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
