//! In-memory storage backend.
//!
//! One `parking_lot::RwLock` guards all state, so every trait method is
//! atomic with respect to the others. Cloning a `MemoryStore` shares the
//! same state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::repository::*;
use crate::achievements::{Achievement, StudentAchievement};
use crate::badges::{Badge, BadgeUnlock};
use crate::challenges::{ChallengeProgress, CourseChallenge};
use crate::course::Course;
use crate::error::StoreError;
use crate::evaluations::Evaluation;
use crate::graduation::{DegreeRecord, GraduationRecord};
use crate::ledger::{
    sort_history, AppendOutcome, IdempotencyKey, NewTransaction, PointsTransaction, TransactionId,
    XpProjection,
};
use crate::student::{Attendance, CourseEnrollment, EnrollmentStatus, Student};
use crate::techniques::TechniqueProgress;

type PairKey = (String, String);

#[derive(Default)]
struct MemoryState {
    students: HashMap<String, Student>,
    courses: HashMap<String, Course>,
    enrollments: HashMap<String, CourseEnrollment>,
    challenges: HashMap<String, CourseChallenge>,

    transactions: Vec<PointsTransaction>,
    keys: HashMap<String, TransactionId>,
    projections: HashMap<String, XpProjection>,
    next_tx_id: TransactionId,

    achievements: HashMap<String, Achievement>,
    unlocks: HashMap<PairKey, StudentAchievement>,
    badges: HashMap<String, Badge>,
    badge_unlocks: HashMap<PairKey, BadgeUnlock>,

    attendance: Vec<Attendance>,
    techniques: HashMap<PairKey, TechniqueProgress>,
    challenge_progress: HashMap<PairKey, ChallengeProgress>,
    evaluations: HashMap<String, Evaluation>,

    degrees: Vec<DegreeRecord>,
    graduations: Vec<GraduationRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this store behind every repository trait.
    pub fn storage_manager(&self) -> StorageManager {
        StorageManager {
            students: Box::new(self.clone()),
            courses: Box::new(self.clone()),
            ledger: Box::new(self.clone()),
            achievements: Box::new(self.clone()),
            activity: Box::new(self.clone()),
            graduation: Box::new(self.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Fixture helpers (synchronous)
    // ------------------------------------------------------------------

    pub fn put_student(&self, student: Student) {
        self.state.write().students.insert(student.id.clone(), student);
    }

    pub fn put_course(&self, course: Course) {
        self.state.write().courses.insert(course.id.clone(), course);
    }

    pub fn put_enrollment(&self, enrollment: CourseEnrollment) {
        self.state
            .write()
            .enrollments
            .insert(enrollment.id.clone(), enrollment);
    }

    pub fn put_challenge(&self, challenge: CourseChallenge) {
        self.state
            .write()
            .challenges
            .insert(challenge.id.clone(), challenge);
    }

    pub fn put_badge(&self, badge: Badge) {
        self.state.write().badges.insert(badge.id.clone(), badge);
    }

    pub fn transaction_count(&self) -> usize {
        self.state.read().transactions.len()
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

// ============================================================================
// Students & Courses
// ============================================================================

#[async_trait]
impl StudentRepo for MemoryStore {
    async fn get(&self, id: &str) -> RepoResult<Option<Student>> {
        Ok(self.state.read().students.get(id).cloned())
    }

    async fn list_by_organization(&self, organization_id: &str, active_only: bool) -> RepoResult<Vec<Student>> {
        let state = self.state.read();
        let list = state
            .students
            .values()
            .filter(|s| s.organization_id == organization_id)
            .filter(|s| !active_only || s.is_active)
            .cloned()
            .collect();
        Ok(sorted_by(list, |s: &Student| s.id.clone()))
    }

    async fn upsert(&self, student: &Student) -> RepoResult<()> {
        self.put_student(student.clone());
        Ok(())
    }

    async fn update_streak(
        &self,
        id: &str,
        current: u32,
        longest: u32,
        last_check_in: DateTime<Utc>,
    ) -> RepoResult<()> {
        let mut state = self.state.write();
        let student = state
            .students
            .get_mut(id)
            .ok_or_else(|| StoreError::backend_msg(format!("student {} missing", id)))?;
        student.current_streak = current;
        student.longest_streak = longest;
        student.last_check_in = Some(last_check_in);
        Ok(())
    }
}

#[async_trait]
impl CourseRepo for MemoryStore {
    async fn get(&self, id: &str) -> RepoResult<Option<Course>> {
        Ok(self.state.read().courses.get(id).cloned())
    }

    async fn upsert(&self, course: &Course) -> RepoResult<()> {
        self.put_course(course.clone());
        Ok(())
    }

    async fn get_enrollment(&self, id: &str) -> RepoResult<Option<CourseEnrollment>> {
        Ok(self.state.read().enrollments.get(id).cloned())
    }

    async fn find_enrollment(&self, student_id: &str, course_id: &str) -> RepoResult<Option<CourseEnrollment>> {
        let state = self.state.read();
        let mut matches: Vec<&CourseEnrollment> = state
            .enrollments
            .values()
            .filter(|e| e.student_id == student_id && e.course_id == course_id)
            .collect();
        // active first, then most recent enrollment
        matches.sort_by(|a, b| {
            (b.status == EnrollmentStatus::Active)
                .cmp(&(a.status == EnrollmentStatus::Active))
                .then(b.enrolled_at.cmp(&a.enrolled_at))
        });
        Ok(matches.first().map(|e| (*e).clone()))
    }

    async fn enrollments_for_student(&self, student_id: &str) -> RepoResult<Vec<CourseEnrollment>> {
        let state = self.state.read();
        let list = state
            .enrollments
            .values()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |e: &CourseEnrollment| (e.enrolled_at, e.id.clone())))
    }

    async fn enrollments_for_course(&self, course_id: &str) -> RepoResult<Vec<CourseEnrollment>> {
        let state = self.state.read();
        let list = state
            .enrollments
            .values()
            .filter(|e| e.course_id == course_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |e: &CourseEnrollment| e.id.clone()))
    }

    async fn upsert_enrollment(&self, enrollment: &CourseEnrollment) -> RepoResult<()> {
        self.put_enrollment(enrollment.clone());
        Ok(())
    }

    async fn increment_lessons(&self, enrollment_id: &str) -> RepoResult<u32> {
        let mut state = self.state.write();
        let enrollment = state
            .enrollments
            .get_mut(enrollment_id)
            .ok_or_else(|| StoreError::backend_msg(format!("enrollment {} missing", enrollment_id)))?;
        enrollment.lessons_completed += 1;
        Ok(enrollment.lessons_completed)
    }

    async fn get_challenge(&self, id: &str) -> RepoResult<Option<CourseChallenge>> {
        Ok(self.state.read().challenges.get(id).cloned())
    }

    async fn challenges_for_course(&self, course_id: &str) -> RepoResult<Vec<CourseChallenge>> {
        let state = self.state.read();
        let list = state
            .challenges
            .values()
            .filter(|c| c.course_id == course_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |c: &CourseChallenge| c.week_number))
    }

    async fn insert_challenge(&self, challenge: &CourseChallenge) -> RepoResult<bool> {
        let mut state = self.state.write();
        let taken = state.challenges.values().any(|c| {
            c.id == challenge.id
                || (c.course_id == challenge.course_id && c.week_number == challenge.week_number)
        });
        if taken {
            return Ok(false);
        }
        state.challenges.insert(challenge.id.clone(), challenge.clone());
        Ok(true)
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[async_trait]
impl LedgerRepo for MemoryStore {
    async fn append(
        &self,
        transaction: &NewTransaction,
        key: Option<&IdempotencyKey>,
    ) -> RepoResult<AppendOutcome> {
        let mut state = self.state.write();

        let key_str = key.map(IdempotencyKey::as_string);
        if let Some(k) = &key_str {
            if let Some(&existing_id) = state.keys.get(k) {
                let existing = state
                    .transactions
                    .iter()
                    .find(|t| t.id == existing_id)
                    .cloned()
                    .ok_or_else(|| StoreError::backend_msg("idempotency key without entry"))?;
                return Ok(AppendOutcome::Duplicate { existing });
            }
        }

        state.next_tx_id += 1;
        let entry = PointsTransaction {
            id: state.next_tx_id,
            student_id: transaction.student_id.clone(),
            enrollment_id: transaction.enrollment_id.clone(),
            amount: transaction.amount,
            source: transaction.source,
            reference_type: transaction.reference_type.clone(),
            reference_id: transaction.reference_id.clone(),
            idempotency_key: key_str.clone(),
            reason: transaction.reason.clone(),
            created_at: transaction.created_at,
        };

        let projection = state
            .projections
            .entry(transaction.student_id.clone())
            .or_insert_with(|| XpProjection {
                student_id: transaction.student_id.clone(),
                total_xp: 0,
                last_changed_at: None,
            });
        projection.total_xp += transaction.amount;
        projection.last_changed_at = Some(transaction.created_at);
        let new_total = projection.total_xp;

        if let Some(k) = key_str {
            state.keys.insert(k, entry.id);
        }
        state.transactions.push(entry.clone());

        Ok(AppendOutcome::Appended {
            transaction: entry,
            new_total,
        })
    }

    async fn projection(&self, student_id: &str) -> RepoResult<XpProjection> {
        Ok(self
            .state
            .read()
            .projections
            .get(student_id)
            .cloned()
            .unwrap_or_else(|| XpProjection {
                student_id: student_id.to_string(),
                total_xp: 0,
                last_changed_at: None,
            }))
    }

    async fn projections_for_organization(&self, organization_id: &str) -> RepoResult<Vec<XpProjection>> {
        let state = self.state.read();
        let list = state
            .projections
            .values()
            .filter(|p| {
                state
                    .students
                    .get(&p.student_id)
                    .is_some_and(|s| s.organization_id == organization_id)
            })
            .cloned()
            .collect();
        Ok(sorted_by(list, |p: &XpProjection| p.student_id.clone()))
    }

    async fn set_projection(&self, projection: &XpProjection) -> RepoResult<()> {
        self.state
            .write()
            .projections
            .insert(projection.student_id.clone(), projection.clone());
        Ok(())
    }

    async fn history(&self, student_id: &str, limit: usize, offset: usize) -> RepoResult<Vec<PointsTransaction>> {
        let mut entries = self.entries_for_student(student_id).await?;
        sort_history(&mut entries);
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    async fn entries_for_student(&self, student_id: &str) -> RepoResult<Vec<PointsTransaction>> {
        Ok(self
            .state
            .read()
            .transactions
            .iter()
            .filter(|t| t.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn entries_for_organization(
        &self,
        organization_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> RepoResult<Vec<PointsTransaction>> {
        let state = self.state.read();
        Ok(state
            .transactions
            .iter()
            .filter(|t| since.map_or(true, |s| t.created_at >= s))
            .filter(|t| {
                state
                    .students
                    .get(&t.student_id)
                    .is_some_and(|s| s.organization_id == organization_id)
            })
            .cloned()
            .collect())
    }
}

// ============================================================================
// Achievements & Badges
// ============================================================================

#[async_trait]
impl AchievementRepo for MemoryStore {
    async fn catalogue(&self, organization_id: &str) -> RepoResult<Vec<Achievement>> {
        let state = self.state.read();
        let list = state
            .achievements
            .values()
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |a: &Achievement| a.id.clone()))
    }

    async fn seed(&self, organization_id: &str, achievements: &[Achievement]) -> RepoResult<usize> {
        let mut state = self.state.write();
        if state
            .achievements
            .values()
            .any(|a| a.organization_id == organization_id)
        {
            return Err(StoreError::Conflict(format!(
                "organization {} already has achievements",
                organization_id
            )));
        }
        for a in achievements {
            state.achievements.insert(a.id.clone(), a.clone());
        }
        Ok(achievements.len())
    }

    async fn unlocks(&self, student_id: &str) -> RepoResult<Vec<StudentAchievement>> {
        let state = self.state.read();
        let list = state
            .unlocks
            .values()
            .filter(|u| u.student_id == student_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |u: &StudentAchievement| {
            (u.unlocked_at, u.achievement_id.clone())
        }))
    }

    async fn insert_unlock(&self, unlock: &StudentAchievement) -> RepoResult<bool> {
        let mut state = self.state.write();
        let key = (unlock.student_id.clone(), unlock.achievement_id.clone());
        if state.unlocks.contains_key(&key) {
            return Ok(false);
        }
        state.unlocks.insert(key, unlock.clone());
        Ok(true)
    }

    async fn get_badge(&self, id: &str) -> RepoResult<Option<Badge>> {
        Ok(self.state.read().badges.get(id).cloned())
    }

    async fn upsert_badge(&self, badge: &Badge) -> RepoResult<()> {
        self.put_badge(badge.clone());
        Ok(())
    }

    async fn insert_badge_unlock(&self, unlock: &BadgeUnlock) -> RepoResult<bool> {
        let mut state = self.state.write();
        let key = (unlock.student_id.clone(), unlock.badge_id.clone());
        if state.badge_unlocks.contains_key(&key) {
            return Ok(false);
        }
        state.badge_unlocks.insert(key, unlock.clone());
        Ok(true)
    }

    async fn badge_unlocks(&self, student_id: &str) -> RepoResult<Vec<BadgeUnlock>> {
        let state = self.state.read();
        let list = state
            .badge_unlocks
            .values()
            .filter(|u| u.student_id == student_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |u: &BadgeUnlock| (u.granted_at, u.badge_id.clone())))
    }
}

// ============================================================================
// Activity
// ============================================================================

#[async_trait]
impl ActivityRepo for MemoryStore {
    async fn record_attendance(&self, attendance: &Attendance) -> RepoResult<bool> {
        let mut state = self.state.write();
        let duplicate = state
            .attendance
            .iter()
            .any(|a| a.student_id == attendance.student_id && a.lesson_ref == attendance.lesson_ref);
        if duplicate {
            return Ok(false);
        }
        state.attendance.push(attendance.clone());
        Ok(true)
    }

    async fn attendance_for_student(&self, student_id: &str) -> RepoResult<Vec<Attendance>> {
        let state = self.state.read();
        let list = state
            .attendance
            .iter()
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |a: &Attendance| a.checked_in_at))
    }

    async fn technique_progress(&self, enrollment_id: &str) -> RepoResult<Vec<TechniqueProgress>> {
        let state = self.state.read();
        let list = state
            .techniques
            .values()
            .filter(|t| t.enrollment_id == enrollment_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |t: &TechniqueProgress| t.technique_id.clone()))
    }

    async fn upsert_technique_progress(&self, progress: &TechniqueProgress) -> RepoResult<()> {
        self.state.write().techniques.insert(
            (progress.enrollment_id.clone(), progress.technique_id.clone()),
            progress.clone(),
        );
        Ok(())
    }

    async fn challenge_progress(&self, enrollment_id: &str) -> RepoResult<Vec<ChallengeProgress>> {
        let state = self.state.read();
        let list = state
            .challenge_progress
            .values()
            .filter(|p| p.enrollment_id == enrollment_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |p: &ChallengeProgress| p.challenge_id.clone()))
    }

    async fn challenge_progress_for_challenge(&self, challenge_id: &str) -> RepoResult<Vec<ChallengeProgress>> {
        let state = self.state.read();
        let list = state
            .challenge_progress
            .values()
            .filter(|p| p.challenge_id == challenge_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |p: &ChallengeProgress| p.enrollment_id.clone()))
    }

    async fn upsert_challenge_progress(&self, progress: &ChallengeProgress) -> RepoResult<()> {
        self.state.write().challenge_progress.insert(
            (progress.enrollment_id.clone(), progress.challenge_id.clone()),
            progress.clone(),
        );
        Ok(())
    }

    async fn insert_evaluation(&self, evaluation: &Evaluation) -> RepoResult<bool> {
        let mut state = self.state.write();
        if state.evaluations.contains_key(&evaluation.id) {
            return Ok(false);
        }
        state
            .evaluations
            .insert(evaluation.id.clone(), evaluation.clone());
        Ok(true)
    }

    async fn evaluations(&self, enrollment_id: &str) -> RepoResult<Vec<Evaluation>> {
        let state = self.state.read();
        let list = state
            .evaluations
            .values()
            .filter(|e| e.enrollment_id == enrollment_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |e: &Evaluation| (e.evaluated_at, e.id.clone())))
    }
}

// ============================================================================
// Degrees & Graduations
// ============================================================================

#[async_trait]
impl GraduationRepo for MemoryStore {
    async fn degrees(&self, student_id: &str, course_id: &str) -> RepoResult<Vec<DegreeRecord>> {
        let state = self.state.read();
        let list = state
            .degrees
            .iter()
            .filter(|d| d.student_id == student_id && d.course_id == course_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |d: &DegreeRecord| d.degree))
    }

    async fn insert_degree(&self, record: &DegreeRecord) -> RepoResult<()> {
        let mut state = self.state.write();
        let exists = state.degrees.iter().any(|d| {
            d.student_id == record.student_id
                && d.course_id == record.course_id
                && d.degree == record.degree
        });
        if exists {
            return Err(StoreError::Conflict(format!(
                "degree {} already recorded for {}",
                record.degree, record.student_id
            )));
        }
        state.degrees.push(record.clone());
        Ok(())
    }

    async fn record_graduation(&self, record: &GraduationRecord, enrollment_id: &str) -> RepoResult<()> {
        let mut state = self.state.write();
        let enrollment = state
            .enrollments
            .get_mut(enrollment_id)
            .ok_or_else(|| StoreError::backend_msg(format!("enrollment {} missing", enrollment_id)))?;
        enrollment.current_belt = record.to_belt.clone();
        state.graduations.push(record.clone());
        Ok(())
    }

    async fn graduations(&self, student_id: &str) -> RepoResult<Vec<GraduationRecord>> {
        let state = self.state.read();
        let list = state
            .graduations
            .iter()
            .filter(|g| g.student_id == student_id)
            .cloned()
            .collect();
        Ok(sorted_by(list, |g: &GraduationRecord| g.approved_at))
    }
}
