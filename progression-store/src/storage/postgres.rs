//! PostgreSQL Storage - progression data persistence
//!
//! Uses `sqlx` for async queries against a shared connection pool. The
//! store speaks in row types; `postgres_repo_adapter` converts them to the
//! engine's domain types.
//!
//! ## Tables
//! - students, courses, course_enrollments, course_challenges
//! - points_transactions (append-only), xp_projections
//! - achievements, student_achievements, badges, badge_unlocks
//! - attendance, technique_progress, challenge_progress, evaluations
//! - degree_records, graduation_records

use academy_core::error::StoreError;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use super::migrations;

/// PostgreSQL connection pool wrapper
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// Error type for PostgreSQL operations
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Constraint(msg) => StoreError::Conflict(msg),
            other => StoreError::backend(other),
        }
    }
}

/// Map a unique violation to `Constraint`, anything else to `Sqlx`.
fn unique_violation(err: sqlx::Error, what: impl FnOnce() -> String) -> PostgresError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => PostgresError::Constraint(what()),
        _ => PostgresError::Sqlx(err),
    }
}

const STUDENT_COLUMNS: &str = "id, organization_id, name, category, gender, condition,
    current_streak, longest_streak, last_check_in, is_active, created_at";

const ENROLLMENT_COLUMNS: &str = "id, student_id, course_id, category, gender, condition, status,
    enrolled_at, expected_end_date, lessons_completed, current_belt, disciplinary_holds";

const CHALLENGE_COLUMNS: &str = "id, course_id, week_number, kind, activity, description,
    base_metric, base_time_secs, xp_reward";

const TRANSACTION_COLUMNS: &str = "id, student_id, enrollment_id, amount, source, reference_type,
    reference_id, idempotency_key, reason, created_at";

const TECHNIQUE_COLUMNS: &str = "enrollment_id, technique_id, technique_category, status, accuracy,
    attempts, practice_count, validated_by, mastered_at, updated_at";

const CHALLENGE_PROGRESS_COLUMNS: &str = "enrollment_id, challenge_id, status, attempts,
    actual_metric, actual_time_secs, best_metric, adjusted_metric, adjusted_time_secs, xp_earned,
    completed_at, validated_by, notes, updated_at";

const EVALUATION_COLUMNS: &str = "id, enrollment_id, lesson, technique_results, physical_test,
    overall_score, passed, notes, evaluator_id, evaluated_at";

const GRADUATION_COLUMNS: &str = "id, student_id, course_id, from_belt, to_belt, approved_by,
    ceremony_date, notes, was_eligible, approved_at";

/// Result of a ledger append
#[derive(Debug, Clone)]
pub enum LedgerAppend {
    Appended { row: TransactionRow, new_total: i64 },
    Duplicate(TransactionRow),
}

impl PostgresStore {
    /// Connect to PostgreSQL and run migrations
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("PostgreSQL connected (max_connections={})", max_connections);

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Connect with an existing pool (for testing / shared pools)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run all pending migrations
    pub async fn run_migrations(&self) -> Result<usize, PostgresError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name VARCHAR(100) PRIMARY KEY,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        let mut applied_now = 0;
        for (name, sql) in migrations::get_migrations() {
            let applied: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM _migrations WHERE name = $1)")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;

            if applied {
                debug!("Migration already applied: {}", name);
                continue;
            }

            info!("Running migration: {}", name);
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| PostgresError::Migration(format!("{}: {}", name, e)))?;
            sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!("Migration applied: {}", name);
            applied_now += 1;
        }

        Ok(applied_now)
    }

    // ========================================================================
    // Student Operations
    // ========================================================================

    pub async fn get_student(&self, id: &str) -> Result<Option<StudentRow>, PostgresError> {
        let row = sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {} FROM students WHERE id = $1",
            STUDENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_students(
        &self,
        organization_id: &str,
        active_only: bool,
    ) -> Result<Vec<StudentRow>, PostgresError> {
        let rows = sqlx::query_as::<_, StudentRow>(&format!(
            "SELECT {} FROM students
             WHERE organization_id = $1 AND (is_active OR NOT $2)
             ORDER BY id",
            STUDENT_COLUMNS
        ))
        .bind(organization_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_student(&self, row: &StudentRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO students (id, organization_id, name, category, gender, condition,
                                   current_streak, longest_streak, last_check_in, is_active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                name = EXCLUDED.name,
                category = EXCLUDED.category,
                gender = EXCLUDED.gender,
                condition = EXCLUDED.condition,
                current_streak = EXCLUDED.current_streak,
                longest_streak = EXCLUDED.longest_streak,
                last_check_in = EXCLUDED.last_check_in,
                is_active = EXCLUDED.is_active",
        )
        .bind(&row.id)
        .bind(&row.organization_id)
        .bind(&row.name)
        .bind(&row.category)
        .bind(&row.gender)
        .bind(&row.condition)
        .bind(row.current_streak)
        .bind(row.longest_streak)
        .bind(row.last_check_in)
        .bind(row.is_active)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_streak(
        &self,
        id: &str,
        current: i32,
        longest: i32,
        last_check_in: DateTime<Utc>,
    ) -> Result<(), PostgresError> {
        let result = sqlx::query(
            "UPDATE students SET current_streak = $2, longest_streak = $3, last_check_in = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(current)
        .bind(longest)
        .bind(last_check_in)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PostgresError::NotFound(format!("student {}", id)));
        }
        Ok(())
    }

    // ========================================================================
    // Course & Enrollment Operations
    // ========================================================================

    pub async fn get_course(&self, id: &str) -> Result<Option<CourseRow>, PostgresError> {
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, organization_id, name, total_lessons, duration_weeks, classes_per_week,
                    required_techniques, starts_at
             FROM courses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_course(&self, row: &CourseRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO courses (id, organization_id, name, total_lessons, duration_weeks,
                                  classes_per_week, required_techniques, starts_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                name = EXCLUDED.name,
                total_lessons = EXCLUDED.total_lessons,
                duration_weeks = EXCLUDED.duration_weeks,
                classes_per_week = EXCLUDED.classes_per_week,
                required_techniques = EXCLUDED.required_techniques,
                starts_at = EXCLUDED.starts_at",
        )
        .bind(&row.id)
        .bind(&row.organization_id)
        .bind(&row.name)
        .bind(row.total_lessons)
        .bind(row.duration_weeks)
        .bind(row.classes_per_week)
        .bind(&row.required_techniques)
        .bind(row.starts_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_enrollment(&self, id: &str) -> Result<Option<EnrollmentRow>, PostgresError> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM course_enrollments WHERE id = $1",
            ENROLLMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Active enrollment first, then the most recent one
    pub async fn find_enrollment(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<Option<EnrollmentRow>, PostgresError> {
        let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM course_enrollments
             WHERE student_id = $1 AND course_id = $2
             ORDER BY (status = 'ACTIVE') DESC, enrolled_at DESC
             LIMIT 1",
            ENROLLMENT_COLUMNS
        ))
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn enrollments_for_student(&self, student_id: &str) -> Result<Vec<EnrollmentRow>, PostgresError> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM course_enrollments WHERE student_id = $1 ORDER BY enrolled_at, id",
            ENROLLMENT_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn enrollments_for_course(&self, course_id: &str) -> Result<Vec<EnrollmentRow>, PostgresError> {
        let rows = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM course_enrollments WHERE course_id = $1 ORDER BY id",
            ENROLLMENT_COLUMNS
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_enrollment(&self, row: &EnrollmentRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO course_enrollments (id, student_id, course_id, category, gender, condition,
                                             status, enrolled_at, expected_end_date, lessons_completed,
                                             current_belt, disciplinary_holds)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                expected_end_date = EXCLUDED.expected_end_date,
                lessons_completed = EXCLUDED.lessons_completed,
                current_belt = EXCLUDED.current_belt,
                disciplinary_holds = EXCLUDED.disciplinary_holds",
        )
        .bind(&row.id)
        .bind(&row.student_id)
        .bind(&row.course_id)
        .bind(&row.category)
        .bind(&row.gender)
        .bind(&row.condition)
        .bind(&row.status)
        .bind(row.enrolled_at)
        .bind(row.expected_end_date)
        .bind(row.lessons_completed)
        .bind(&row.current_belt)
        .bind(&row.disciplinary_holds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn increment_lessons(&self, enrollment_id: &str) -> Result<i32, PostgresError> {
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE course_enrollments SET lessons_completed = lessons_completed + 1
             WHERE id = $1
             RETURNING lessons_completed",
        )
        .bind(enrollment_id)
        .fetch_optional(&self.pool)
        .await?;

        count.ok_or_else(|| PostgresError::NotFound(format!("enrollment {}", enrollment_id)))
    }

    pub async fn get_challenge(&self, id: &str) -> Result<Option<ChallengeRow>, PostgresError> {
        let row = sqlx::query_as::<_, ChallengeRow>(&format!(
            "SELECT {} FROM course_challenges WHERE id = $1",
            CHALLENGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn challenges_for_course(&self, course_id: &str) -> Result<Vec<ChallengeRow>, PostgresError> {
        let rows = sqlx::query_as::<_, ChallengeRow>(&format!(
            "SELECT {} FROM course_challenges WHERE course_id = $1 ORDER BY week_number",
            CHALLENGE_COLUMNS
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// False when the id or the (course, week) pair is taken
    pub async fn insert_challenge(&self, row: &ChallengeRow) -> Result<bool, PostgresError> {
        let result = sqlx::query(
            "INSERT INTO course_challenges (id, course_id, week_number, kind, activity, description,
                                            base_metric, base_time_secs, xp_reward)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT DO NOTHING",
        )
        .bind(&row.id)
        .bind(&row.course_id)
        .bind(row.week_number)
        .bind(&row.kind)
        .bind(&row.activity)
        .bind(&row.description)
        .bind(row.base_metric)
        .bind(row.base_time_secs)
        .bind(row.xp_reward)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ========================================================================
    // Ledger Operations
    // ========================================================================

    /// Append one entry and move the projection (atomic transaction).
    ///
    /// The projection row is locked first, so appends for one student are
    /// serialized and the idempotency check cannot race.
    pub async fn append_transaction(&self, entry: &NewEntryRow) -> Result<LedgerAppend, PostgresError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO xp_projections (student_id, total_xp) VALUES ($1, 0)
             ON CONFLICT (student_id) DO NOTHING",
        )
        .bind(&entry.student_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("SELECT total_xp FROM xp_projections WHERE student_id = $1 FOR UPDATE")
            .bind(&entry.student_id)
            .execute(&mut *tx)
            .await?;

        if let Some(key) = &entry.idempotency_key {
            let existing = sqlx::query_as::<_, TransactionRow>(&format!(
                "SELECT {} FROM points_transactions WHERE idempotency_key = $1",
                TRANSACTION_COLUMNS
            ))
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                tx.rollback().await?;
                debug!("Idempotency key already used: {}", key);
                return Ok(LedgerAppend::Duplicate(row));
            }
        }

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "INSERT INTO points_transactions (student_id, enrollment_id, amount, source, reference_type,
                                              reference_id, idempotency_key, reason, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(&entry.student_id)
        .bind(&entry.enrollment_id)
        .bind(entry.amount)
        .bind(&entry.source)
        .bind(&entry.reference_type)
        .bind(&entry.reference_id)
        .bind(&entry.idempotency_key)
        .bind(&entry.reason)
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, || format!("idempotency key {:?}", entry.idempotency_key)))?;

        let new_total: i64 = sqlx::query_scalar(
            "UPDATE xp_projections SET total_xp = total_xp + $2, last_changed_at = $3
             WHERE student_id = $1
             RETURNING total_xp",
        )
        .bind(&entry.student_id)
        .bind(entry.amount)
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LedgerAppend::Appended { row, new_total })
    }

    pub async fn get_projection(&self, student_id: &str) -> Result<Option<ProjectionRow>, PostgresError> {
        let row = sqlx::query_as::<_, ProjectionRow>(
            "SELECT student_id, total_xp, last_changed_at FROM xp_projections WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn projections_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<ProjectionRow>, PostgresError> {
        let rows = sqlx::query_as::<_, ProjectionRow>(
            "SELECT p.student_id, p.total_xp, p.last_changed_at
             FROM xp_projections p
             JOIN students s ON s.id = p.student_id
             WHERE s.organization_id = $1
             ORDER BY p.student_id",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_projection(&self, row: &ProjectionRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO xp_projections (student_id, total_xp, last_changed_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (student_id) DO UPDATE SET
                total_xp = EXCLUDED.total_xp,
                last_changed_at = EXCLUDED.last_changed_at",
        )
        .bind(&row.student_id)
        .bind(row.total_xp)
        .bind(row.last_changed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent first
    pub async fn transaction_history(
        &self,
        student_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRow>, PostgresError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM points_transactions
             WHERE student_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
            TRANSACTION_COLUMNS
        ))
        .bind(student_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn transactions_for_student(&self, student_id: &str) -> Result<Vec<TransactionRow>, PostgresError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM points_transactions WHERE student_id = $1 ORDER BY created_at, id",
            TRANSACTION_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn transactions_for_organization(
        &self,
        organization_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TransactionRow>, PostgresError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT t.id, t.student_id, t.enrollment_id, t.amount, t.source, t.reference_type,
                    t.reference_id, t.idempotency_key, t.reason, t.created_at
             FROM points_transactions t
             JOIN students s ON s.id = t.student_id
             WHERE s.organization_id = $1
               AND ($2::timestamptz IS NULL OR t.created_at >= $2)
             ORDER BY t.created_at, t.id",
        )
        .bind(organization_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn transaction_by_key(&self, key: &str) -> Result<Option<TransactionRow>, PostgresError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM points_transactions WHERE idempotency_key = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ========================================================================
    // Achievement & Badge Operations
    // ========================================================================

    pub async fn achievements_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Vec<AchievementRow>, PostgresError> {
        let rows = sqlx::query_as::<_, AchievementRow>(
            "SELECT id, organization_id, name, description, category, rarity, xp_reward, criteria, is_hidden
             FROM achievements WHERE organization_id = $1 ORDER BY id",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Install a catalogue (atomic transaction). `Constraint` when the
    /// organization already has one.
    pub async fn seed_achievements(
        &self,
        organization_id: &str,
        rows: &[AchievementRow],
    ) -> Result<usize, PostgresError> {
        let mut tx = self.pool.begin().await?;

        // serialize concurrent seeds of the same organization
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(organization_id)
            .execute(&mut *tx)
            .await?;

        let seeded: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM achievements WHERE organization_id = $1)")
                .bind(organization_id)
                .fetch_one(&mut *tx)
                .await?;
        if seeded {
            return Err(PostgresError::Constraint(format!(
                "organization {} already has achievements",
                organization_id
            )));
        }

        for row in rows {
            sqlx::query(
                "INSERT INTO achievements (id, organization_id, name, description, category, rarity,
                                           xp_reward, criteria, is_hidden)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&row.id)
            .bind(&row.organization_id)
            .bind(&row.name)
            .bind(&row.description)
            .bind(&row.category)
            .bind(&row.rarity)
            .bind(row.xp_reward)
            .bind(&row.criteria)
            .bind(row.is_hidden)
            .execute(&mut *tx)
            .await
            .map_err(|e| unique_violation(e, || format!("achievement {}", row.id)))?;
        }

        tx.commit().await?;
        info!("Seeded {} achievements for {}", rows.len(), organization_id);
        Ok(rows.len())
    }

    pub async fn unlocks_for_student(&self, student_id: &str) -> Result<Vec<UnlockRow>, PostgresError> {
        let rows = sqlx::query_as::<_, UnlockRow>(
            "SELECT student_id, achievement_id, unlocked_at FROM student_achievements
             WHERE student_id = $1 ORDER BY unlocked_at, achievement_id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_unlock(&self, row: &UnlockRow) -> Result<bool, PostgresError> {
        let result = sqlx::query(
            "INSERT INTO student_achievements (student_id, achievement_id, unlocked_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (student_id, achievement_id) DO NOTHING",
        )
        .bind(&row.student_id)
        .bind(&row.achievement_id)
        .bind(row.unlocked_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_badge(&self, id: &str) -> Result<Option<BadgeRow>, PostgresError> {
        let row = sqlx::query_as::<_, BadgeRow>(
            "SELECT id, organization_id, name, description, icon FROM badges WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_badge(&self, row: &BadgeRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO badges (id, organization_id, name, description, icon)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                icon = EXCLUDED.icon",
        )
        .bind(&row.id)
        .bind(&row.organization_id)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.icon)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_badge_unlock(&self, row: &BadgeUnlockRow) -> Result<bool, PostgresError> {
        let result = sqlx::query(
            "INSERT INTO badge_unlocks (student_id, badge_id, granted_by, note, granted_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (student_id, badge_id) DO NOTHING",
        )
        .bind(&row.student_id)
        .bind(&row.badge_id)
        .bind(&row.granted_by)
        .bind(&row.note)
        .bind(row.granted_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn badge_unlocks_for_student(&self, student_id: &str) -> Result<Vec<BadgeUnlockRow>, PostgresError> {
        let rows = sqlx::query_as::<_, BadgeUnlockRow>(
            "SELECT student_id, badge_id, granted_by, note, granted_at FROM badge_unlocks
             WHERE student_id = $1 ORDER BY granted_at, badge_id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Activity Operations
    // ========================================================================

    /// False when the lesson was already recorded for the student
    pub async fn insert_attendance(&self, row: &AttendanceRow) -> Result<bool, PostgresError> {
        let result = sqlx::query(
            "INSERT INTO attendance (student_id, course_id, lesson_ref, checked_in_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (student_id, lesson_ref) DO NOTHING",
        )
        .bind(&row.student_id)
        .bind(&row.course_id)
        .bind(&row.lesson_ref)
        .bind(row.checked_in_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn attendance_for_student(&self, student_id: &str) -> Result<Vec<AttendanceRow>, PostgresError> {
        let rows = sqlx::query_as::<_, AttendanceRow>(
            "SELECT student_id, course_id, lesson_ref, checked_in_at FROM attendance
             WHERE student_id = $1 ORDER BY checked_in_at",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn technique_progress(&self, enrollment_id: &str) -> Result<Vec<TechniqueRow>, PostgresError> {
        let rows = sqlx::query_as::<_, TechniqueRow>(&format!(
            "SELECT {} FROM technique_progress WHERE enrollment_id = $1 ORDER BY technique_id",
            TECHNIQUE_COLUMNS
        ))
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_technique_progress(&self, row: &TechniqueRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO technique_progress (enrollment_id, technique_id, technique_category, status,
                                             accuracy, attempts, practice_count, validated_by,
                                             mastered_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (enrollment_id, technique_id) DO UPDATE SET
                technique_category = EXCLUDED.technique_category,
                status = EXCLUDED.status,
                accuracy = EXCLUDED.accuracy,
                attempts = EXCLUDED.attempts,
                practice_count = EXCLUDED.practice_count,
                validated_by = EXCLUDED.validated_by,
                mastered_at = COALESCE(technique_progress.mastered_at, EXCLUDED.mastered_at),
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&row.enrollment_id)
        .bind(&row.technique_id)
        .bind(&row.technique_category)
        .bind(&row.status)
        .bind(row.accuracy)
        .bind(row.attempts)
        .bind(row.practice_count)
        .bind(&row.validated_by)
        .bind(row.mastered_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn challenge_progress(&self, enrollment_id: &str) -> Result<Vec<ChallengeProgressRow>, PostgresError> {
        let rows = sqlx::query_as::<_, ChallengeProgressRow>(&format!(
            "SELECT {} FROM challenge_progress WHERE enrollment_id = $1 ORDER BY challenge_id",
            CHALLENGE_PROGRESS_COLUMNS
        ))
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn challenge_progress_for_challenge(
        &self,
        challenge_id: &str,
    ) -> Result<Vec<ChallengeProgressRow>, PostgresError> {
        let rows = sqlx::query_as::<_, ChallengeProgressRow>(&format!(
            "SELECT {} FROM challenge_progress WHERE challenge_id = $1 ORDER BY enrollment_id",
            CHALLENGE_PROGRESS_COLUMNS
        ))
        .bind(challenge_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_challenge_progress(&self, row: &ChallengeProgressRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO challenge_progress (enrollment_id, challenge_id, status, attempts, actual_metric,
                                             actual_time_secs, best_metric, adjusted_metric,
                                             adjusted_time_secs, xp_earned, completed_at, validated_by,
                                             notes, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             ON CONFLICT (enrollment_id, challenge_id) DO UPDATE SET
                status = EXCLUDED.status,
                attempts = EXCLUDED.attempts,
                actual_metric = EXCLUDED.actual_metric,
                actual_time_secs = EXCLUDED.actual_time_secs,
                best_metric = EXCLUDED.best_metric,
                adjusted_metric = EXCLUDED.adjusted_metric,
                adjusted_time_secs = EXCLUDED.adjusted_time_secs,
                xp_earned = EXCLUDED.xp_earned,
                completed_at = EXCLUDED.completed_at,
                validated_by = EXCLUDED.validated_by,
                notes = EXCLUDED.notes,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&row.enrollment_id)
        .bind(&row.challenge_id)
        .bind(&row.status)
        .bind(row.attempts)
        .bind(row.actual_metric)
        .bind(row.actual_time_secs)
        .bind(row.best_metric)
        .bind(row.adjusted_metric)
        .bind(row.adjusted_time_secs)
        .bind(row.xp_earned)
        .bind(row.completed_at)
        .bind(&row.validated_by)
        .bind(&row.notes)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_evaluation(&self, row: &EvaluationRow) -> Result<bool, PostgresError> {
        let result = sqlx::query(
            "INSERT INTO evaluations (id, enrollment_id, lesson, technique_results, physical_test,
                                      overall_score, passed, notes, evaluator_id, evaluated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&row.id)
        .bind(&row.enrollment_id)
        .bind(row.lesson)
        .bind(&row.technique_results)
        .bind(&row.physical_test)
        .bind(row.overall_score)
        .bind(row.passed)
        .bind(&row.notes)
        .bind(&row.evaluator_id)
        .bind(row.evaluated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn evaluations(&self, enrollment_id: &str) -> Result<Vec<EvaluationRow>, PostgresError> {
        let rows = sqlx::query_as::<_, EvaluationRow>(&format!(
            "SELECT {} FROM evaluations WHERE enrollment_id = $1 ORDER BY evaluated_at, id",
            EVALUATION_COLUMNS
        ))
        .bind(enrollment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ========================================================================
    // Degree & Graduation Operations
    // ========================================================================

    pub async fn degrees(&self, student_id: &str, course_id: &str) -> Result<Vec<DegreeRow>, PostgresError> {
        let rows = sqlx::query_as::<_, DegreeRow>(
            "SELECT student_id, course_id, degree, achieved_at, lessons_completed, progress_percent
             FROM degree_records
             WHERE student_id = $1 AND course_id = $2
             ORDER BY degree",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_degree(&self, row: &DegreeRow) -> Result<(), PostgresError> {
        sqlx::query(
            "INSERT INTO degree_records (student_id, course_id, degree, achieved_at,
                                         lessons_completed, progress_percent)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&row.student_id)
        .bind(&row.course_id)
        .bind(row.degree)
        .bind(row.achieved_at)
        .bind(row.lessons_completed)
        .bind(row.progress_percent)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            unique_violation(e, || {
                format!("degree {} already recorded for {}", row.degree, row.student_id)
            })
        })?;
        Ok(())
    }

    /// Insert the record and move the enrollment's belt (atomic transaction)
    pub async fn record_graduation(&self, row: &GraduationRow, enrollment_id: &str) -> Result<(), PostgresError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query("UPDATE course_enrollments SET current_belt = $2 WHERE id = $1")
            .bind(enrollment_id)
            .bind(&row.to_belt)
            .execute(&mut *tx)
            .await?;
        if moved.rows_affected() == 0 {
            return Err(PostgresError::NotFound(format!("enrollment {}", enrollment_id)));
        }

        sqlx::query(
            "INSERT INTO graduation_records (id, student_id, course_id, from_belt, to_belt, approved_by,
                                             ceremony_date, notes, was_eligible, approved_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&row.id)
        .bind(&row.student_id)
        .bind(&row.course_id)
        .bind(&row.from_belt)
        .bind(&row.to_belt)
        .bind(&row.approved_by)
        .bind(row.ceremony_date)
        .bind(&row.notes)
        .bind(row.was_eligible)
        .bind(row.approved_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, || format!("graduation {}", row.id)))?;

        tx.commit().await?;
        info!(
            "Graduation recorded: {} {} -> {} ({})",
            row.student_id, row.from_belt, row.to_belt, row.course_id
        );
        Ok(())
    }

    pub async fn graduations(&self, student_id: &str) -> Result<Vec<GraduationRow>, PostgresError> {
        let rows = sqlx::query_as::<_, GraduationRow>(&format!(
            "SELECT {} FROM graduation_records WHERE student_id = $1 ORDER BY approved_at, id",
            GRADUATION_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ============================================================================
// Row Types (sqlx::FromRow)
// ============================================================================

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StudentRow {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub category: String,
    pub gender: String,
    pub condition: String,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_check_in: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CourseRow {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub total_lessons: i32,
    pub duration_weeks: i32,
    pub classes_per_week: i32,
    pub required_techniques: Vec<String>,
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EnrollmentRow {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub category: String,
    pub gender: String,
    pub condition: String,
    pub status: String,
    pub enrolled_at: DateTime<Utc>,
    pub expected_end_date: Option<DateTime<Utc>>,
    pub lessons_completed: i32,
    pub current_belt: String,
    pub disciplinary_holds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChallengeRow {
    pub id: String,
    pub course_id: String,
    pub week_number: i32,
    pub kind: String,
    pub activity: String,
    pub description: String,
    pub base_metric: i32,
    pub base_time_secs: Option<i32>,
    pub xp_reward: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TransactionRow {
    pub id: i64,
    pub student_id: String,
    pub enrollment_id: Option<String>,
    pub amount: i64,
    pub source: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// A ledger entry before the database assigns its id
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntryRow {
    pub student_id: String,
    pub enrollment_id: Option<String>,
    pub amount: i64,
    pub source: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProjectionRow {
    pub student_id: String,
    pub total_xp: i64,
    pub last_changed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AchievementRow {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub rarity: String,
    pub xp_reward: i64,
    pub criteria: serde_json::Value,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct UnlockRow {
    pub student_id: String,
    pub achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BadgeRow {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub description: String,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BadgeUnlockRow {
    pub student_id: String,
    pub badge_id: String,
    pub granted_by: String,
    pub note: Option<String>,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AttendanceRow {
    pub student_id: String,
    pub course_id: Option<String>,
    pub lesson_ref: String,
    pub checked_in_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TechniqueRow {
    pub enrollment_id: String,
    pub technique_id: String,
    pub technique_category: String,
    pub status: String,
    pub accuracy: f64,
    pub attempts: i32,
    pub practice_count: i32,
    pub validated_by: Option<String>,
    pub mastered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ChallengeProgressRow {
    pub enrollment_id: String,
    pub challenge_id: String,
    pub status: String,
    pub attempts: i32,
    pub actual_metric: Option<i32>,
    pub actual_time_secs: Option<i32>,
    pub best_metric: Option<i32>,
    pub adjusted_metric: i32,
    pub adjusted_time_secs: Option<i32>,
    pub xp_earned: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub validated_by: Option<String>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EvaluationRow {
    pub id: String,
    pub enrollment_id: String,
    pub lesson: i32,
    pub technique_results: serde_json::Value,
    pub physical_test: Option<serde_json::Value>,
    pub overall_score: f64,
    pub passed: bool,
    pub notes: Option<String>,
    pub evaluator_id: String,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DegreeRow {
    pub student_id: String,
    pub course_id: String,
    pub degree: i16,
    pub achieved_at: DateTime<Utc>,
    pub lessons_completed: i32,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct GraduationRow {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub from_belt: String,
    pub to_belt: String,
    pub approved_by: String,
    pub ceremony_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub was_eligible: bool,
    pub approved_at: DateTime<Utc>,
}
