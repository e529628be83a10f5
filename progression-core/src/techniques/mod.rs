//! Technique progress per enrollment.
//!
//! Practice count only grows. Status may move in either direction, but
//! `mastered_at` is stamped on the first transition into `Mastered` and kept
//! from then on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TechniqueStatus {
    Learning,
    Practicing,
    Competent,
    Proficient,
    Expert,
    Mastered,
}

impl TechniqueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechniqueStatus::Learning => "LEARNING",
            TechniqueStatus::Practicing => "PRACTICING",
            TechniqueStatus::Competent => "COMPETENT",
            TechniqueStatus::Proficient => "PROFICIENT",
            TechniqueStatus::Expert => "EXPERT",
            TechniqueStatus::Mastered => "MASTERED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LEARNING" => Some(TechniqueStatus::Learning),
            "PRACTICING" => Some(TechniqueStatus::Practicing),
            "COMPETENT" => Some(TechniqueStatus::Competent),
            "PROFICIENT" => Some(TechniqueStatus::Proficient),
            "EXPERT" => Some(TechniqueStatus::Expert),
            "MASTERED" => Some(TechniqueStatus::Mastered),
            _ => None,
        }
    }

    /// Proficient, Expert or Mastered.
    pub fn is_proficient(&self) -> bool {
        *self >= TechniqueStatus::Proficient
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueProgress {
    pub enrollment_id: String,
    pub technique_id: String,
    pub technique_category: String,
    pub status: TechniqueStatus,
    /// 0-100
    pub accuracy: f64,
    pub attempts: u32,
    pub practice_count: u32,
    pub validated_by: Option<String>,
    pub mastered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Changes reported by an instructor or an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PracticeUpdate {
    pub technique_category: Option<String>,
    pub status: Option<TechniqueStatus>,
    pub accuracy: Option<f64>,
    pub repetitions: u32,
    pub validated_by: Option<String>,
}

impl TechniqueProgress {
    pub fn new(
        enrollment_id: impl Into<String>,
        technique_id: impl Into<String>,
        technique_category: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            enrollment_id: enrollment_id.into(),
            technique_id: technique_id.into(),
            technique_category: technique_category.into(),
            status: TechniqueStatus::Learning,
            accuracy: 0.0,
            attempts: 0,
            practice_count: 0,
            validated_by: None,
            mastered_at: None,
            updated_at: now,
        }
    }

    /// Apply an update. Returns true when this is the first time the
    /// technique reached `Mastered`.
    pub fn apply(&mut self, update: &PracticeUpdate, now: DateTime<Utc>) -> bool {
        if let Some(category) = &update.technique_category {
            self.technique_category = category.clone();
        }
        if let Some(accuracy) = update.accuracy {
            self.accuracy = accuracy.clamp(0.0, 100.0);
            self.attempts += 1;
        }
        self.practice_count = self.practice_count.saturating_add(update.repetitions);
        if update.validated_by.is_some() {
            self.validated_by = update.validated_by.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.updated_at = now;

        if self.status == TechniqueStatus::Mastered && self.mastered_at.is_none() {
            self.mastered_at = Some(now);
            return true;
        }
        false
    }

    pub fn is_mastered(&self) -> bool {
        self.mastered_at.is_some()
    }
}

/// Share of `required` techniques at Proficient or above. An empty
/// requirement list counts as fully covered.
pub fn technique_coverage(required: &[String], progress: &[TechniqueProgress]) -> f64 {
    if required.is_empty() {
        return 1.0;
    }
    let covered = required
        .iter()
        .filter(|id| {
            progress
                .iter()
                .any(|p| &p.technique_id == *id && p.status.is_proficient())
        })
        .count();
    covered as f64 / required.len() as f64
}
