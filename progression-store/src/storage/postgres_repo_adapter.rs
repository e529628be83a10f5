//! PostgreSQL Repository Adapters
//!
//! Implements the engine's repository traits using PostgresStore as the
//! backend. Converts between SQL row types and the engine's domain types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use academy_core::achievements::{Achievement, AchievementCategory, Rarity, StudentAchievement};
use academy_core::badges::{Badge, BadgeUnlock};
use academy_core::challenges::{ChallengeKind, ChallengeProgress, ChallengeStatus, CourseChallenge};
use academy_core::course::Course;
use academy_core::error::StoreError;
use academy_core::evaluations::Evaluation;
use academy_core::graduation::{DegreeRecord, GraduationRecord};
use academy_core::ledger::{
    AppendOutcome, IdempotencyKey, NewTransaction, PointsTransaction, XpProjection, XpSource,
};
use academy_core::store::{
    AchievementRepo, ActivityRepo, CourseRepo, GraduationRepo, LedgerRepo, RepoResult, StudentRepo,
};
use academy_core::student::{
    AdjustmentProfile, Attendance, CourseEnrollment, EnrollmentStatus, Gender, PhysicalCondition, Student,
    StudentCategory,
};
use academy_core::techniques::{TechniqueProgress, TechniqueStatus};

use super::postgres::*;

// ============================================================================
// Type Conversion Helpers
// ============================================================================

fn parse_column<T>(value: &str, column: &str, parse: fn(&str) -> Option<T>) -> RepoResult<T> {
    parse(value).ok_or_else(|| StoreError::backend_msg(format!("unknown {} value: {}", column, value)))
}

fn from_int(value: i32, column: &str) -> RepoResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::backend_msg(format!("negative {}: {}", column, value)))
}

fn to_int(value: u32, column: &str) -> RepoResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::backend_msg(format!("{} out of range: {}", column, value)))
}

fn from_opt_int(value: Option<i32>, column: &str) -> RepoResult<Option<u32>> {
    value.map(|v| from_int(v, column)).transpose()
}

fn to_opt_int(value: Option<u32>, column: &str) -> RepoResult<Option<i32>> {
    value.map(|v| to_int(v, column)).transpose()
}

fn to_json<T: serde::Serialize>(value: &T, column: &str) -> RepoResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::backend_msg(format!("encode {}: {}", column, e)))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value, column: &str) -> RepoResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::backend_msg(format!("decode {}: {}", column, e)))
}

fn row_to_profile(category: &str, gender: &str, condition: &str) -> RepoResult<AdjustmentProfile> {
    Ok(AdjustmentProfile::new(
        parse_column(category, "category", StudentCategory::parse)?,
        parse_column(gender, "gender", Gender::parse)?,
        parse_column(condition, "condition", PhysicalCondition::parse)?,
    ))
}

pub(crate) fn row_to_student(row: StudentRow) -> RepoResult<Student> {
    Ok(Student {
        category: parse_column(&row.category, "category", StudentCategory::parse)?,
        gender: parse_column(&row.gender, "gender", Gender::parse)?,
        condition: parse_column(&row.condition, "condition", PhysicalCondition::parse)?,
        current_streak: from_int(row.current_streak, "current_streak")?,
        longest_streak: from_int(row.longest_streak, "longest_streak")?,
        id: row.id,
        organization_id: row.organization_id,
        name: row.name,
        last_check_in: row.last_check_in,
        is_active: row.is_active,
        created_at: row.created_at,
    })
}

pub(crate) fn student_to_row(student: &Student) -> RepoResult<StudentRow> {
    Ok(StudentRow {
        id: student.id.clone(),
        organization_id: student.organization_id.clone(),
        name: student.name.clone(),
        category: student.category.as_str().to_string(),
        gender: student.gender.as_str().to_string(),
        condition: student.condition.as_str().to_string(),
        current_streak: to_int(student.current_streak, "current_streak")?,
        longest_streak: to_int(student.longest_streak, "longest_streak")?,
        last_check_in: student.last_check_in,
        is_active: student.is_active,
        created_at: student.created_at,
    })
}

fn row_to_course(row: CourseRow) -> RepoResult<Course> {
    Ok(Course {
        total_lessons: from_int(row.total_lessons, "total_lessons")?,
        duration_weeks: from_int(row.duration_weeks, "duration_weeks")?,
        classes_per_week: from_int(row.classes_per_week, "classes_per_week")?,
        id: row.id,
        organization_id: row.organization_id,
        name: row.name,
        required_techniques: row.required_techniques,
        starts_at: row.starts_at,
    })
}

fn course_to_row(course: &Course) -> RepoResult<CourseRow> {
    Ok(CourseRow {
        id: course.id.clone(),
        organization_id: course.organization_id.clone(),
        name: course.name.clone(),
        total_lessons: to_int(course.total_lessons, "total_lessons")?,
        duration_weeks: to_int(course.duration_weeks, "duration_weeks")?,
        classes_per_week: to_int(course.classes_per_week, "classes_per_week")?,
        required_techniques: course.required_techniques.clone(),
        starts_at: course.starts_at,
    })
}

pub(crate) fn row_to_enrollment(row: EnrollmentRow) -> RepoResult<CourseEnrollment> {
    Ok(CourseEnrollment {
        profile: row_to_profile(&row.category, &row.gender, &row.condition)?,
        status: parse_column(&row.status, "status", EnrollmentStatus::parse)?,
        lessons_completed: from_int(row.lessons_completed, "lessons_completed")?,
        id: row.id,
        student_id: row.student_id,
        course_id: row.course_id,
        enrolled_at: row.enrolled_at,
        expected_end_date: row.expected_end_date,
        current_belt: row.current_belt,
        disciplinary_holds: row.disciplinary_holds,
    })
}

pub(crate) fn enrollment_to_row(enrollment: &CourseEnrollment) -> RepoResult<EnrollmentRow> {
    Ok(EnrollmentRow {
        id: enrollment.id.clone(),
        student_id: enrollment.student_id.clone(),
        course_id: enrollment.course_id.clone(),
        category: enrollment.profile.category.as_str().to_string(),
        gender: enrollment.profile.gender.as_str().to_string(),
        condition: enrollment.profile.condition.as_str().to_string(),
        status: enrollment.status.as_str().to_string(),
        enrolled_at: enrollment.enrolled_at,
        expected_end_date: enrollment.expected_end_date,
        lessons_completed: to_int(enrollment.lessons_completed, "lessons_completed")?,
        current_belt: enrollment.current_belt.clone(),
        disciplinary_holds: enrollment.disciplinary_holds.clone(),
    })
}

fn row_to_challenge(row: ChallengeRow) -> RepoResult<CourseChallenge> {
    Ok(CourseChallenge {
        week_number: from_int(row.week_number, "week_number")?,
        kind: parse_column(&row.kind, "kind", ChallengeKind::parse)?,
        base_metric: from_int(row.base_metric, "base_metric")?,
        base_time_secs: from_opt_int(row.base_time_secs, "base_time_secs")?,
        id: row.id,
        course_id: row.course_id,
        activity: row.activity,
        description: row.description,
        xp_reward: row.xp_reward,
    })
}

fn challenge_to_row(challenge: &CourseChallenge) -> RepoResult<ChallengeRow> {
    Ok(ChallengeRow {
        id: challenge.id.clone(),
        course_id: challenge.course_id.clone(),
        week_number: to_int(challenge.week_number, "week_number")?,
        kind: challenge.kind.as_str().to_string(),
        activity: challenge.activity.clone(),
        description: challenge.description.clone(),
        base_metric: to_int(challenge.base_metric, "base_metric")?,
        base_time_secs: to_opt_int(challenge.base_time_secs, "base_time_secs")?,
        xp_reward: challenge.xp_reward,
    })
}

pub(crate) fn row_to_transaction(row: TransactionRow) -> RepoResult<PointsTransaction> {
    Ok(PointsTransaction {
        source: parse_column(&row.source, "source", XpSource::parse)?,
        id: row.id,
        student_id: row.student_id,
        enrollment_id: row.enrollment_id,
        amount: row.amount,
        reference_type: row.reference_type,
        reference_id: row.reference_id,
        idempotency_key: row.idempotency_key,
        reason: row.reason,
        created_at: row.created_at,
    })
}

pub(crate) fn new_entry_row(transaction: &NewTransaction, key: Option<&IdempotencyKey>) -> NewEntryRow {
    NewEntryRow {
        student_id: transaction.student_id.clone(),
        enrollment_id: transaction.enrollment_id.clone(),
        amount: transaction.amount,
        source: transaction.source.as_str().to_string(),
        reference_type: transaction.reference_type.clone(),
        reference_id: transaction.reference_id.clone(),
        idempotency_key: key.map(IdempotencyKey::as_string),
        reason: transaction.reason.clone(),
        created_at: transaction.created_at,
    }
}

fn row_to_projection(row: ProjectionRow) -> XpProjection {
    XpProjection {
        student_id: row.student_id,
        total_xp: row.total_xp,
        last_changed_at: row.last_changed_at,
    }
}

pub(crate) fn row_to_achievement(row: AchievementRow) -> RepoResult<Achievement> {
    Ok(Achievement {
        category: parse_column(&row.category, "category", AchievementCategory::parse)?,
        rarity: parse_column(&row.rarity, "rarity", Rarity::parse)?,
        criteria: from_json(row.criteria, "criteria")?,
        id: row.id,
        organization_id: row.organization_id,
        name: row.name,
        description: row.description,
        xp_reward: row.xp_reward,
        is_hidden: row.is_hidden,
    })
}

pub(crate) fn achievement_to_row(achievement: &Achievement) -> RepoResult<AchievementRow> {
    Ok(AchievementRow {
        id: achievement.id.clone(),
        organization_id: achievement.organization_id.clone(),
        name: achievement.name.clone(),
        description: achievement.description.clone(),
        category: achievement.category.as_str().to_string(),
        rarity: achievement.rarity.as_str().to_string(),
        xp_reward: achievement.xp_reward,
        criteria: to_json(&achievement.criteria, "criteria")?,
        is_hidden: achievement.is_hidden,
    })
}

fn row_to_technique(row: TechniqueRow) -> RepoResult<TechniqueProgress> {
    Ok(TechniqueProgress {
        status: parse_column(&row.status, "status", TechniqueStatus::parse)?,
        attempts: from_int(row.attempts, "attempts")?,
        practice_count: from_int(row.practice_count, "practice_count")?,
        enrollment_id: row.enrollment_id,
        technique_id: row.technique_id,
        technique_category: row.technique_category,
        accuracy: row.accuracy,
        validated_by: row.validated_by,
        mastered_at: row.mastered_at,
        updated_at: row.updated_at,
    })
}

fn technique_to_row(progress: &TechniqueProgress) -> RepoResult<TechniqueRow> {
    Ok(TechniqueRow {
        enrollment_id: progress.enrollment_id.clone(),
        technique_id: progress.technique_id.clone(),
        technique_category: progress.technique_category.clone(),
        status: progress.status.as_str().to_string(),
        accuracy: progress.accuracy,
        attempts: to_int(progress.attempts, "attempts")?,
        practice_count: to_int(progress.practice_count, "practice_count")?,
        validated_by: progress.validated_by.clone(),
        mastered_at: progress.mastered_at,
        updated_at: progress.updated_at,
    })
}

pub(crate) fn row_to_challenge_progress(row: ChallengeProgressRow) -> RepoResult<ChallengeProgress> {
    Ok(ChallengeProgress {
        status: parse_column(&row.status, "status", ChallengeStatus::parse)?,
        attempts: from_int(row.attempts, "attempts")?,
        actual_metric: from_opt_int(row.actual_metric, "actual_metric")?,
        actual_time_secs: from_opt_int(row.actual_time_secs, "actual_time_secs")?,
        best_metric: from_opt_int(row.best_metric, "best_metric")?,
        adjusted_metric: from_int(row.adjusted_metric, "adjusted_metric")?,
        adjusted_time_secs: from_opt_int(row.adjusted_time_secs, "adjusted_time_secs")?,
        enrollment_id: row.enrollment_id,
        challenge_id: row.challenge_id,
        xp_earned: row.xp_earned,
        completed_at: row.completed_at,
        validated_by: row.validated_by,
        notes: row.notes,
        updated_at: row.updated_at,
    })
}

pub(crate) fn challenge_progress_to_row(progress: &ChallengeProgress) -> RepoResult<ChallengeProgressRow> {
    Ok(ChallengeProgressRow {
        enrollment_id: progress.enrollment_id.clone(),
        challenge_id: progress.challenge_id.clone(),
        status: progress.status.as_str().to_string(),
        attempts: to_int(progress.attempts, "attempts")?,
        actual_metric: to_opt_int(progress.actual_metric, "actual_metric")?,
        actual_time_secs: to_opt_int(progress.actual_time_secs, "actual_time_secs")?,
        best_metric: to_opt_int(progress.best_metric, "best_metric")?,
        adjusted_metric: to_int(progress.adjusted_metric, "adjusted_metric")?,
        adjusted_time_secs: to_opt_int(progress.adjusted_time_secs, "adjusted_time_secs")?,
        xp_earned: progress.xp_earned,
        completed_at: progress.completed_at,
        validated_by: progress.validated_by.clone(),
        notes: progress.notes.clone(),
        updated_at: progress.updated_at,
    })
}

pub(crate) fn row_to_evaluation(row: EvaluationRow) -> RepoResult<Evaluation> {
    Ok(Evaluation {
        lesson: from_int(row.lesson, "lesson")?,
        technique_results: from_json(row.technique_results, "technique_results")?,
        physical_test: row
            .physical_test
            .map(|v| from_json(v, "physical_test"))
            .transpose()?,
        id: row.id,
        enrollment_id: row.enrollment_id,
        overall_score: row.overall_score,
        passed: row.passed,
        notes: row.notes,
        evaluator_id: row.evaluator_id,
        evaluated_at: row.evaluated_at,
    })
}

pub(crate) fn evaluation_to_row(evaluation: &Evaluation) -> RepoResult<EvaluationRow> {
    Ok(EvaluationRow {
        id: evaluation.id.clone(),
        enrollment_id: evaluation.enrollment_id.clone(),
        lesson: to_int(evaluation.lesson, "lesson")?,
        technique_results: to_json(&evaluation.technique_results, "technique_results")?,
        physical_test: evaluation
            .physical_test
            .as_ref()
            .map(|t| to_json(t, "physical_test"))
            .transpose()?,
        overall_score: evaluation.overall_score,
        passed: evaluation.passed,
        notes: evaluation.notes.clone(),
        evaluator_id: evaluation.evaluator_id.clone(),
        evaluated_at: evaluation.evaluated_at,
    })
}

pub(crate) fn row_to_degree(row: DegreeRow) -> RepoResult<DegreeRecord> {
    Ok(DegreeRecord {
        degree: u8::try_from(row.degree)
            .map_err(|_| StoreError::backend_msg(format!("degree out of range: {}", row.degree)))?,
        lessons_completed: from_int(row.lessons_completed, "lessons_completed")?,
        student_id: row.student_id,
        course_id: row.course_id,
        achieved_at: row.achieved_at,
        progress_percent: row.progress_percent,
    })
}

fn degree_to_row(record: &DegreeRecord) -> RepoResult<DegreeRow> {
    Ok(DegreeRow {
        student_id: record.student_id.clone(),
        course_id: record.course_id.clone(),
        degree: i16::from(record.degree),
        achieved_at: record.achieved_at,
        lessons_completed: to_int(record.lessons_completed, "lessons_completed")?,
        progress_percent: record.progress_percent,
    })
}

fn row_to_graduation(row: GraduationRow) -> GraduationRecord {
    GraduationRecord {
        id: row.id,
        student_id: row.student_id,
        course_id: row.course_id,
        from_belt: row.from_belt,
        to_belt: row.to_belt,
        approved_by: row.approved_by,
        ceremony_date: row.ceremony_date,
        notes: row.notes,
        was_eligible: row.was_eligible,
        approved_at: row.approved_at,
    }
}

fn graduation_to_row(record: &GraduationRecord) -> GraduationRow {
    GraduationRow {
        id: record.id.clone(),
        student_id: record.student_id.clone(),
        course_id: record.course_id.clone(),
        from_belt: record.from_belt.clone(),
        to_belt: record.to_belt.clone(),
        approved_by: record.approved_by.clone(),
        ceremony_date: record.ceremony_date,
        notes: record.notes.clone(),
        was_eligible: record.was_eligible,
        approved_at: record.approved_at,
    }
}

fn collect<R, T>(rows: Vec<R>, convert: fn(R) -> RepoResult<T>) -> RepoResult<Vec<T>> {
    rows.into_iter().map(convert).collect()
}

fn page(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ============================================================================
// StudentRepo
// ============================================================================

pub struct PgStudentRepo {
    store: Arc<PostgresStore>,
}

impl PgStudentRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StudentRepo for PgStudentRepo {
    async fn get(&self, id: &str) -> RepoResult<Option<Student>> {
        self.store.get_student(id).await?.map(row_to_student).transpose()
    }

    async fn list_by_organization(&self, organization_id: &str, active_only: bool) -> RepoResult<Vec<Student>> {
        let rows = self.store.list_students(organization_id, active_only).await?;
        collect(rows, row_to_student)
    }

    async fn upsert(&self, student: &Student) -> RepoResult<()> {
        self.store.upsert_student(&student_to_row(student)?).await?;
        Ok(())
    }

    async fn update_streak(
        &self,
        id: &str,
        current: u32,
        longest: u32,
        last_check_in: DateTime<Utc>,
    ) -> RepoResult<()> {
        self.store
            .update_streak(
                id,
                to_int(current, "current_streak")?,
                to_int(longest, "longest_streak")?,
                last_check_in,
            )
            .await?;
        Ok(())
    }
}

// ============================================================================
// CourseRepo
// ============================================================================

pub struct PgCourseRepo {
    store: Arc<PostgresStore>,
}

impl PgCourseRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CourseRepo for PgCourseRepo {
    async fn get(&self, id: &str) -> RepoResult<Option<Course>> {
        self.store.get_course(id).await?.map(row_to_course).transpose()
    }

    async fn upsert(&self, course: &Course) -> RepoResult<()> {
        self.store.upsert_course(&course_to_row(course)?).await?;
        Ok(())
    }

    async fn get_enrollment(&self, id: &str) -> RepoResult<Option<CourseEnrollment>> {
        self.store.get_enrollment(id).await?.map(row_to_enrollment).transpose()
    }

    async fn find_enrollment(&self, student_id: &str, course_id: &str) -> RepoResult<Option<CourseEnrollment>> {
        self.store
            .find_enrollment(student_id, course_id)
            .await?
            .map(row_to_enrollment)
            .transpose()
    }

    async fn enrollments_for_student(&self, student_id: &str) -> RepoResult<Vec<CourseEnrollment>> {
        collect(self.store.enrollments_for_student(student_id).await?, row_to_enrollment)
    }

    async fn enrollments_for_course(&self, course_id: &str) -> RepoResult<Vec<CourseEnrollment>> {
        collect(self.store.enrollments_for_course(course_id).await?, row_to_enrollment)
    }

    async fn upsert_enrollment(&self, enrollment: &CourseEnrollment) -> RepoResult<()> {
        self.store.upsert_enrollment(&enrollment_to_row(enrollment)?).await?;
        Ok(())
    }

    async fn increment_lessons(&self, enrollment_id: &str) -> RepoResult<u32> {
        let count = self.store.increment_lessons(enrollment_id).await?;
        from_int(count, "lessons_completed")
    }

    async fn get_challenge(&self, id: &str) -> RepoResult<Option<CourseChallenge>> {
        self.store.get_challenge(id).await?.map(row_to_challenge).transpose()
    }

    async fn challenges_for_course(&self, course_id: &str) -> RepoResult<Vec<CourseChallenge>> {
        collect(self.store.challenges_for_course(course_id).await?, row_to_challenge)
    }

    async fn insert_challenge(&self, challenge: &CourseChallenge) -> RepoResult<bool> {
        Ok(self.store.insert_challenge(&challenge_to_row(challenge)?).await?)
    }
}

// ============================================================================
// LedgerRepo
// ============================================================================

pub struct PgLedgerRepo {
    store: Arc<PostgresStore>,
}

impl PgLedgerRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LedgerRepo for PgLedgerRepo {
    async fn append(
        &self,
        transaction: &NewTransaction,
        key: Option<&IdempotencyKey>,
    ) -> RepoResult<AppendOutcome> {
        let entry = new_entry_row(transaction, key);
        match self.store.append_transaction(&entry).await {
            Ok(LedgerAppend::Appended { row, new_total }) => Ok(AppendOutcome::Appended {
                transaction: row_to_transaction(row)?,
                new_total,
            }),
            Ok(LedgerAppend::Duplicate(row)) => Ok(AppendOutcome::Duplicate {
                existing: row_to_transaction(row)?,
            }),
            // a concurrent writer won the key between our check and insert
            Err(PostgresError::Constraint(_)) if key.is_some() => {
                let key = entry.idempotency_key.as_deref().unwrap_or_default();
                match self.store.transaction_by_key(key).await? {
                    Some(row) => Ok(AppendOutcome::Duplicate {
                        existing: row_to_transaction(row)?,
                    }),
                    None => Err(StoreError::Conflict(format!("idempotency key {}", key))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn projection(&self, student_id: &str) -> RepoResult<XpProjection> {
        Ok(self
            .store
            .get_projection(student_id)
            .await?
            .map(row_to_projection)
            .unwrap_or_else(|| XpProjection {
                student_id: student_id.to_string(),
                total_xp: 0,
                last_changed_at: None,
            }))
    }

    async fn projections_for_organization(&self, organization_id: &str) -> RepoResult<Vec<XpProjection>> {
        let rows = self.store.projections_for_organization(organization_id).await?;
        Ok(rows.into_iter().map(row_to_projection).collect())
    }

    async fn set_projection(&self, projection: &XpProjection) -> RepoResult<()> {
        self.store
            .set_projection(&ProjectionRow {
                student_id: projection.student_id.clone(),
                total_xp: projection.total_xp,
                last_changed_at: projection.last_changed_at,
            })
            .await?;
        Ok(())
    }

    async fn history(&self, student_id: &str, limit: usize, offset: usize) -> RepoResult<Vec<PointsTransaction>> {
        let rows = self
            .store
            .transaction_history(student_id, page(limit), page(offset))
            .await?;
        collect(rows, row_to_transaction)
    }

    async fn entries_for_student(&self, student_id: &str) -> RepoResult<Vec<PointsTransaction>> {
        collect(self.store.transactions_for_student(student_id).await?, row_to_transaction)
    }

    async fn entries_for_organization(
        &self,
        organization_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> RepoResult<Vec<PointsTransaction>> {
        let rows = self.store.transactions_for_organization(organization_id, since).await?;
        collect(rows, row_to_transaction)
    }
}

// ============================================================================
// AchievementRepo
// ============================================================================

pub struct PgAchievementRepo {
    store: Arc<PostgresStore>,
}

impl PgAchievementRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AchievementRepo for PgAchievementRepo {
    async fn catalogue(&self, organization_id: &str) -> RepoResult<Vec<Achievement>> {
        collect(
            self.store.achievements_for_organization(organization_id).await?,
            row_to_achievement,
        )
    }

    async fn seed(&self, organization_id: &str, achievements: &[Achievement]) -> RepoResult<usize> {
        let rows = achievements
            .iter()
            .map(achievement_to_row)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(self.store.seed_achievements(organization_id, &rows).await?)
    }

    async fn unlocks(&self, student_id: &str) -> RepoResult<Vec<StudentAchievement>> {
        let rows = self.store.unlocks_for_student(student_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| StudentAchievement {
                student_id: row.student_id,
                achievement_id: row.achievement_id,
                unlocked_at: row.unlocked_at,
            })
            .collect())
    }

    async fn insert_unlock(&self, unlock: &StudentAchievement) -> RepoResult<bool> {
        Ok(self
            .store
            .insert_unlock(&UnlockRow {
                student_id: unlock.student_id.clone(),
                achievement_id: unlock.achievement_id.clone(),
                unlocked_at: unlock.unlocked_at,
            })
            .await?)
    }

    async fn get_badge(&self, id: &str) -> RepoResult<Option<Badge>> {
        Ok(self.store.get_badge(id).await?.map(|row| Badge {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            description: row.description,
            icon: row.icon,
        }))
    }

    async fn upsert_badge(&self, badge: &Badge) -> RepoResult<()> {
        self.store
            .upsert_badge(&BadgeRow {
                id: badge.id.clone(),
                organization_id: badge.organization_id.clone(),
                name: badge.name.clone(),
                description: badge.description.clone(),
                icon: badge.icon.clone(),
            })
            .await?;
        Ok(())
    }

    async fn insert_badge_unlock(&self, unlock: &BadgeUnlock) -> RepoResult<bool> {
        Ok(self
            .store
            .insert_badge_unlock(&BadgeUnlockRow {
                student_id: unlock.student_id.clone(),
                badge_id: unlock.badge_id.clone(),
                granted_by: unlock.granted_by.clone(),
                note: unlock.note.clone(),
                granted_at: unlock.granted_at,
            })
            .await?)
    }

    async fn badge_unlocks(&self, student_id: &str) -> RepoResult<Vec<BadgeUnlock>> {
        let rows = self.store.badge_unlocks_for_student(student_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| BadgeUnlock {
                student_id: row.student_id,
                badge_id: row.badge_id,
                granted_by: row.granted_by,
                note: row.note,
                granted_at: row.granted_at,
            })
            .collect())
    }
}

// ============================================================================
// ActivityRepo
// ============================================================================

pub struct PgActivityRepo {
    store: Arc<PostgresStore>,
}

impl PgActivityRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActivityRepo for PgActivityRepo {
    async fn record_attendance(&self, attendance: &Attendance) -> RepoResult<bool> {
        Ok(self
            .store
            .insert_attendance(&AttendanceRow {
                student_id: attendance.student_id.clone(),
                course_id: attendance.course_id.clone(),
                lesson_ref: attendance.lesson_ref.clone(),
                checked_in_at: attendance.checked_in_at,
            })
            .await?)
    }

    async fn attendance_for_student(&self, student_id: &str) -> RepoResult<Vec<Attendance>> {
        let rows = self.store.attendance_for_student(student_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| Attendance {
                student_id: row.student_id,
                course_id: row.course_id,
                lesson_ref: row.lesson_ref,
                checked_in_at: row.checked_in_at,
            })
            .collect())
    }

    async fn technique_progress(&self, enrollment_id: &str) -> RepoResult<Vec<TechniqueProgress>> {
        collect(self.store.technique_progress(enrollment_id).await?, row_to_technique)
    }

    async fn upsert_technique_progress(&self, progress: &TechniqueProgress) -> RepoResult<()> {
        self.store
            .upsert_technique_progress(&technique_to_row(progress)?)
            .await?;
        Ok(())
    }

    async fn challenge_progress(&self, enrollment_id: &str) -> RepoResult<Vec<ChallengeProgress>> {
        collect(
            self.store.challenge_progress(enrollment_id).await?,
            row_to_challenge_progress,
        )
    }

    async fn challenge_progress_for_challenge(&self, challenge_id: &str) -> RepoResult<Vec<ChallengeProgress>> {
        collect(
            self.store.challenge_progress_for_challenge(challenge_id).await?,
            row_to_challenge_progress,
        )
    }

    async fn upsert_challenge_progress(&self, progress: &ChallengeProgress) -> RepoResult<()> {
        self.store
            .upsert_challenge_progress(&challenge_progress_to_row(progress)?)
            .await?;
        Ok(())
    }

    async fn insert_evaluation(&self, evaluation: &Evaluation) -> RepoResult<bool> {
        Ok(self.store.insert_evaluation(&evaluation_to_row(evaluation)?).await?)
    }

    async fn evaluations(&self, enrollment_id: &str) -> RepoResult<Vec<Evaluation>> {
        collect(self.store.evaluations(enrollment_id).await?, row_to_evaluation)
    }
}

// ============================================================================
// GraduationRepo
// ============================================================================

pub struct PgGraduationRepo {
    store: Arc<PostgresStore>,
}

impl PgGraduationRepo {
    pub fn new(store: Arc<PostgresStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl GraduationRepo for PgGraduationRepo {
    async fn degrees(&self, student_id: &str, course_id: &str) -> RepoResult<Vec<DegreeRecord>> {
        collect(self.store.degrees(student_id, course_id).await?, row_to_degree)
    }

    async fn insert_degree(&self, record: &DegreeRecord) -> RepoResult<()> {
        self.store.insert_degree(&degree_to_row(record)?).await?;
        Ok(())
    }

    async fn record_graduation(&self, record: &GraduationRecord, enrollment_id: &str) -> RepoResult<()> {
        self.store
            .record_graduation(&graduation_to_row(record), enrollment_id)
            .await?;
        Ok(())
    }

    async fn graduations(&self, student_id: &str) -> RepoResult<Vec<GraduationRecord>> {
        let rows = self.store.graduations(student_id).await?;
        Ok(rows.into_iter().map(row_to_graduation).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use academy_core::achievements::UnlockCriteria;
    use academy_core::evaluations::{PhysicalTest, TechniqueResult};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 18, 0, 0).unwrap()
    }

    fn student_row() -> StudentRow {
        StudentRow {
            id: "s1".into(),
            organization_id: "org".into(),
            name: "Ana".into(),
            category: StudentCategory::Adult.as_str().into(),
            gender: Gender::Female.as_str().into(),
            condition: PhysicalCondition::Standard.as_str().into(),
            current_streak: 3,
            longest_streak: 9,
            last_check_in: Some(t0()),
            is_active: true,
            created_at: t0(),
        }
    }

    #[test]
    fn test_student_row_conversion() {
        let student = row_to_student(student_row()).unwrap();
        assert_eq!(student.gender, Gender::Female);
        assert_eq!(student.current_streak, 3);
        assert_eq!(student_to_row(&student).unwrap(), student_row());
    }

    #[test]
    fn test_unknown_enum_value_is_backend_error() {
        let mut row = student_row();
        row.gender = "robot".into();
        let err = row_to_student(row).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(err.to_string().contains("robot"));
    }

    #[test]
    fn test_negative_counter_rejected() {
        let mut row = student_row();
        row.longest_streak = -1;
        assert!(row_to_student(row).is_err());
    }

    #[test]
    fn test_enrollment_keeps_profile_snapshot() {
        let student = row_to_student(student_row()).unwrap();
        let mut enrollment = CourseEnrollment::new("e1", &student, "c1", "white", t0());
        enrollment.disciplinary_holds = vec!["late-fees".into()];
        let row = enrollment_to_row(&enrollment).unwrap();
        assert_eq!(row.gender, Gender::Female.as_str());
        assert_eq!(row.disciplinary_holds, vec!["late-fees".to_string()]);
        assert_eq!(row_to_enrollment(row).unwrap(), enrollment);
    }

    #[test]
    fn test_achievement_criteria_stored_as_tagged_json() {
        let achievement = Achievement {
            id: "org:ten_classes".into(),
            organization_id: "org".into(),
            name: "Ten Classes".into(),
            description: "Attend ten classes".into(),
            category: AchievementCategory::Attendance,
            rarity: Rarity::Common,
            xp_reward: 50,
            criteria: UnlockCriteria::TotalClasses { count: 10 },
            is_hidden: false,
        };
        let row = achievement_to_row(&achievement).unwrap();
        assert_eq!(row.criteria["type"], "total_classes");
        assert_eq!(row.criteria["count"], 10);
        assert_eq!(row_to_achievement(row).unwrap(), achievement);
    }

    #[test]
    fn test_evaluation_payloads_survive_json_columns() {
        let evaluation = Evaluation {
            id: "e1:8".into(),
            enrollment_id: "e1".into(),
            lesson: 8,
            technique_results: vec![TechniqueResult {
                technique_id: "jab".into(),
                accuracy: 0.9,
                passed: true,
            }],
            physical_test: Some(PhysicalTest {
                name: "push-ups".into(),
                completed: 18,
                target: 16,
                time_secs: None,
                passed: true,
            }),
            overall_score: 82.0,
            passed: true,
            notes: None,
            evaluator_id: "sensei".into(),
            evaluated_at: t0(),
        };
        let row = evaluation_to_row(&evaluation).unwrap();
        assert!(row.physical_test.is_some());
        assert_eq!(row_to_evaluation(row).unwrap(), evaluation);
    }

    #[test]
    fn test_degree_out_of_range_rejected() {
        let row = DegreeRow {
            student_id: "s1".into(),
            course_id: "c1".into(),
            degree: 300,
            achieved_at: t0(),
            lessons_completed: 10,
            progress_percent: 50.0,
        };
        assert!(row_to_degree(row).is_err());
    }

    #[test]
    fn test_new_entry_carries_key_string() {
        let key = IdempotencyKey::new("s1", XpSource::Challenge, "ch1");
        let transaction = NewTransaction {
            student_id: "s1".into(),
            enrollment_id: Some("e1".into()),
            amount: 30,
            source: XpSource::Challenge,
            reference_type: Some("challenge".into()),
            reference_id: Some("ch1".into()),
            reason: "Burpees".into(),
            created_at: t0(),
        };
        let entry = new_entry_row(&transaction, Some(&key));
        assert_eq!(entry.idempotency_key.as_deref(), Some("2:s1:CHALLENGE:ch1"));
        assert_eq!(entry.enrollment_id.as_deref(), Some("e1"));
        assert_eq!(entry.source, XpSource::Challenge.as_str());
        assert!(new_entry_row(&transaction, None).idempotency_key.is_none());
    }

    #[test]
    fn test_challenge_progress_conversion() {
        let row = ChallengeProgressRow {
            enrollment_id: "e1".into(),
            challenge_id: "ch1".into(),
            status: ChallengeStatus::Completed.as_str().into(),
            attempts: 2,
            actual_metric: Some(18),
            actual_time_secs: None,
            best_metric: Some(18),
            adjusted_metric: 16,
            adjusted_time_secs: None,
            xp_earned: 30,
            completed_at: Some(t0()),
            validated_by: None,
            notes: None,
            updated_at: t0(),
        };
        let progress = row_to_challenge_progress(row.clone()).unwrap();
        assert_eq!(progress.status, ChallengeStatus::Completed);
        assert_eq!(challenge_progress_to_row(&progress).unwrap(), row);
    }
}
