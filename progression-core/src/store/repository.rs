//! Repository traits - abstraction layer for data access
//!
//! Engine services only talk to storage through these traits, so the
//! in-memory store and the PostgreSQL backend are interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::achievements::{Achievement, StudentAchievement};
use crate::badges::{Badge, BadgeUnlock};
use crate::challenges::{ChallengeProgress, CourseChallenge};
use crate::course::Course;
use crate::error::StoreError;
use crate::evaluations::Evaluation;
use crate::graduation::{DegreeRecord, GraduationRecord};
use crate::ledger::{AppendOutcome, IdempotencyKey, NewTransaction, PointsTransaction, XpProjection};
use crate::student::{Attendance, CourseEnrollment, Student};
use crate::techniques::TechniqueProgress;

/// Result type for repository operations
pub type RepoResult<T> = Result<T, StoreError>;

// ============================================================================
// People & Courses
// ============================================================================

#[async_trait]
pub trait StudentRepo: Send + Sync {
    async fn get(&self, id: &str) -> RepoResult<Option<Student>>;
    async fn list_by_organization(&self, organization_id: &str, active_only: bool) -> RepoResult<Vec<Student>>;
    async fn upsert(&self, student: &Student) -> RepoResult<()>;
    async fn update_streak(
        &self,
        id: &str,
        current: u32,
        longest: u32,
        last_check_in: DateTime<Utc>,
    ) -> RepoResult<()>;
}

#[async_trait]
pub trait CourseRepo: Send + Sync {
    async fn get(&self, id: &str) -> RepoResult<Option<Course>>;
    async fn upsert(&self, course: &Course) -> RepoResult<()>;

    async fn get_enrollment(&self, id: &str) -> RepoResult<Option<CourseEnrollment>>;
    /// The student's enrollment in a course, preferring an active one
    async fn find_enrollment(&self, student_id: &str, course_id: &str) -> RepoResult<Option<CourseEnrollment>>;
    async fn enrollments_for_student(&self, student_id: &str) -> RepoResult<Vec<CourseEnrollment>>;
    async fn enrollments_for_course(&self, course_id: &str) -> RepoResult<Vec<CourseEnrollment>>;
    async fn upsert_enrollment(&self, enrollment: &CourseEnrollment) -> RepoResult<()>;
    /// Adds one completed lesson and returns the new count
    async fn increment_lessons(&self, enrollment_id: &str) -> RepoResult<u32>;

    async fn get_challenge(&self, id: &str) -> RepoResult<Option<CourseChallenge>>;
    async fn challenges_for_course(&self, course_id: &str) -> RepoResult<Vec<CourseChallenge>>;
    /// False when the course already has a challenge for that week
    async fn insert_challenge(&self, challenge: &CourseChallenge) -> RepoResult<bool>;
}

// ============================================================================
// XP Ledger
// ============================================================================

#[async_trait]
pub trait LedgerRepo: Send + Sync {
    /// Atomically: check the idempotency key (if any), append the entry and
    /// move the student's projection by `amount`.
    async fn append(
        &self,
        transaction: &NewTransaction,
        key: Option<&IdempotencyKey>,
    ) -> RepoResult<AppendOutcome>;

    /// Zero projection when the student has no entries
    async fn projection(&self, student_id: &str) -> RepoResult<XpProjection>;
    async fn projections_for_organization(&self, organization_id: &str) -> RepoResult<Vec<XpProjection>>;
    /// Overwrite a projection (used by replay repair)
    async fn set_projection(&self, projection: &XpProjection) -> RepoResult<()>;

    /// Most recent first, ties by id descending
    async fn history(&self, student_id: &str, limit: usize, offset: usize) -> RepoResult<Vec<PointsTransaction>>;
    async fn entries_for_student(&self, student_id: &str) -> RepoResult<Vec<PointsTransaction>>;
    async fn entries_for_organization(
        &self,
        organization_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> RepoResult<Vec<PointsTransaction>>;
}

// ============================================================================
// Achievements & Badges
// ============================================================================

#[async_trait]
pub trait AchievementRepo: Send + Sync {
    async fn catalogue(&self, organization_id: &str) -> RepoResult<Vec<Achievement>>;
    /// Installs a catalogue atomically; `Conflict` if the organization
    /// already has achievements
    async fn seed(&self, organization_id: &str, achievements: &[Achievement]) -> RepoResult<usize>;
    async fn unlocks(&self, student_id: &str) -> RepoResult<Vec<StudentAchievement>>;
    /// False when the student already holds the achievement
    async fn insert_unlock(&self, unlock: &StudentAchievement) -> RepoResult<bool>;

    async fn get_badge(&self, id: &str) -> RepoResult<Option<Badge>>;
    async fn upsert_badge(&self, badge: &Badge) -> RepoResult<()>;
    async fn insert_badge_unlock(&self, unlock: &BadgeUnlock) -> RepoResult<bool>;
    async fn badge_unlocks(&self, student_id: &str) -> RepoResult<Vec<BadgeUnlock>>;
}

// ============================================================================
// Activity (attendance, techniques, challenges, evaluations)
// ============================================================================

#[async_trait]
pub trait ActivityRepo: Send + Sync {
    /// False when the lesson reference was already recorded for the student
    async fn record_attendance(&self, attendance: &Attendance) -> RepoResult<bool>;
    async fn attendance_for_student(&self, student_id: &str) -> RepoResult<Vec<Attendance>>;

    async fn technique_progress(&self, enrollment_id: &str) -> RepoResult<Vec<TechniqueProgress>>;
    async fn upsert_technique_progress(&self, progress: &TechniqueProgress) -> RepoResult<()>;

    async fn challenge_progress(&self, enrollment_id: &str) -> RepoResult<Vec<ChallengeProgress>>;
    async fn challenge_progress_for_challenge(&self, challenge_id: &str) -> RepoResult<Vec<ChallengeProgress>>;
    async fn upsert_challenge_progress(&self, progress: &ChallengeProgress) -> RepoResult<()>;

    /// False when an evaluation with the same id exists
    async fn insert_evaluation(&self, evaluation: &Evaluation) -> RepoResult<bool>;
    async fn evaluations(&self, enrollment_id: &str) -> RepoResult<Vec<Evaluation>>;
}

// ============================================================================
// Degrees & Graduations
// ============================================================================

#[async_trait]
pub trait GraduationRepo: Send + Sync {
    async fn degrees(&self, student_id: &str, course_id: &str) -> RepoResult<Vec<DegreeRecord>>;
    /// `Conflict` when the degree is already recorded
    async fn insert_degree(&self, record: &DegreeRecord) -> RepoResult<()>;
    /// Writes the record and moves the enrollment to `record.to_belt`
    /// in one atomic step
    async fn record_graduation(&self, record: &GraduationRecord, enrollment_id: &str) -> RepoResult<()>;
    async fn graduations(&self, student_id: &str) -> RepoResult<Vec<GraduationRecord>>;
}

// ============================================================================
// Storage Manager (unified access point)
// ============================================================================

pub struct StorageManager {
    pub students: Box<dyn StudentRepo>,
    pub courses: Box<dyn CourseRepo>,
    pub ledger: Box<dyn LedgerRepo>,
    pub achievements: Box<dyn AchievementRepo>,
    pub activity: Box<dyn ActivityRepo>,
    pub graduation: Box<dyn GraduationRepo>,
}
