//! Database Migrations - PostgreSQL schema for the progression engine
//!
//! Enumerations are stored as their upper-case text form (`as_str`), typed
//! payloads (unlock criteria, evaluation results) as JSONB.

/// Students, courses, enrollments and the XP ledger
pub const MIGRATION_V1: &str = r#"
-- ============================================================================
-- Academy Progression Schema v1
-- ============================================================================

-- ============================================================================
-- 1. Students & Courses
-- ============================================================================

CREATE TABLE IF NOT EXISTS students (
    id              TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name            TEXT NOT NULL,
    category        TEXT NOT NULL,
    gender          TEXT NOT NULL,
    condition       TEXT NOT NULL,
    current_streak  INTEGER NOT NULL DEFAULT 0 CHECK (current_streak >= 0),
    longest_streak  INTEGER NOT NULL DEFAULT 0 CHECK (longest_streak >= 0),
    last_check_in   TIMESTAMP WITH TIME ZONE,
    is_active       BOOLEAN NOT NULL DEFAULT TRUE,
    created_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);

CREATE INDEX idx_students_org ON students(organization_id, is_active);

CREATE TABLE IF NOT EXISTS courses (
    id                  TEXT PRIMARY KEY,
    organization_id     TEXT NOT NULL,
    name                TEXT NOT NULL,
    total_lessons       INTEGER NOT NULL CHECK (total_lessons >= 0),
    duration_weeks      INTEGER NOT NULL CHECK (duration_weeks >= 0),
    classes_per_week    INTEGER NOT NULL CHECK (classes_per_week >= 0),
    required_techniques TEXT[] NOT NULL DEFAULT '{}',
    starts_at           TIMESTAMP WITH TIME ZONE NOT NULL
);

CREATE TABLE IF NOT EXISTS course_enrollments (
    id                  TEXT PRIMARY KEY,
    student_id          TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    course_id           TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    -- adjustment profile snapshot taken at enrollment
    category            TEXT NOT NULL,
    gender              TEXT NOT NULL,
    condition           TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'ACTIVE',
    enrolled_at         TIMESTAMP WITH TIME ZONE NOT NULL,
    expected_end_date   TIMESTAMP WITH TIME ZONE,
    lessons_completed   INTEGER NOT NULL DEFAULT 0 CHECK (lessons_completed >= 0),
    current_belt        TEXT NOT NULL,
    disciplinary_holds  TEXT[] NOT NULL DEFAULT '{}'
);

CREATE INDEX idx_enrollments_student ON course_enrollments(student_id, course_id);
CREATE INDEX idx_enrollments_course ON course_enrollments(course_id);

CREATE TABLE IF NOT EXISTS course_challenges (
    id              TEXT PRIMARY KEY,
    course_id       TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    week_number     INTEGER NOT NULL CHECK (week_number >= 1),
    kind            TEXT NOT NULL,
    activity        TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    base_metric     INTEGER NOT NULL CHECK (base_metric >= 0),
    base_time_secs  INTEGER CHECK (base_time_secs >= 0),
    xp_reward       BIGINT NOT NULL CHECK (xp_reward >= 0),

    UNIQUE(course_id, week_number)
);

-- ============================================================================
-- 2. XP Ledger (append-only) & Projection
-- ============================================================================

CREATE TABLE IF NOT EXISTS points_transactions (
    id              BIGSERIAL PRIMARY KEY,
    student_id      TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    amount          BIGINT NOT NULL CHECK (amount > 0),
    source          TEXT NOT NULL,
    reference_type  TEXT,
    reference_id    TEXT,
    idempotency_key TEXT UNIQUE,
    reason          TEXT NOT NULL,
    created_at      TIMESTAMP WITH TIME ZONE NOT NULL
);

CREATE INDEX idx_points_student_time ON points_transactions(student_id, created_at DESC, id DESC);

CREATE TABLE IF NOT EXISTS xp_projections (
    student_id      TEXT PRIMARY KEY REFERENCES students(id) ON DELETE CASCADE,
    total_xp        BIGINT NOT NULL DEFAULT 0,
    last_changed_at TIMESTAMP WITH TIME ZONE
);
"#;

/// Achievements, badges, activity, degrees and graduations
pub const MIGRATION_V2: &str = r#"
-- ============================================================================
-- 3. Achievements & Badges
-- ============================================================================

CREATE TABLE IF NOT EXISTS achievements (
    id              TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    category        TEXT NOT NULL,
    rarity          TEXT NOT NULL,
    xp_reward       BIGINT NOT NULL DEFAULT 0 CHECK (xp_reward >= 0),
    criteria        JSONB NOT NULL,
    is_hidden       BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX idx_achievements_org ON achievements(organization_id);

CREATE TABLE IF NOT EXISTS student_achievements (
    student_id      TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    achievement_id  TEXT NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
    unlocked_at     TIMESTAMP WITH TIME ZONE NOT NULL,

    PRIMARY KEY (student_id, achievement_id)
);

CREATE TABLE IF NOT EXISTS badges (
    id              TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    icon            TEXT
);

CREATE TABLE IF NOT EXISTS badge_unlocks (
    student_id      TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    badge_id        TEXT NOT NULL REFERENCES badges(id) ON DELETE CASCADE,
    granted_by      TEXT NOT NULL,
    note            TEXT,
    granted_at      TIMESTAMP WITH TIME ZONE NOT NULL,

    PRIMARY KEY (student_id, badge_id)
);

-- ============================================================================
-- 4. Activity
-- ============================================================================

CREATE TABLE IF NOT EXISTS attendance (
    student_id      TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    course_id       TEXT REFERENCES courses(id) ON DELETE SET NULL,
    lesson_ref      TEXT NOT NULL,
    checked_in_at   TIMESTAMP WITH TIME ZONE NOT NULL,

    PRIMARY KEY (student_id, lesson_ref)
);

CREATE INDEX idx_attendance_student_time ON attendance(student_id, checked_in_at);

CREATE TABLE IF NOT EXISTS technique_progress (
    enrollment_id       TEXT NOT NULL REFERENCES course_enrollments(id) ON DELETE CASCADE,
    technique_id        TEXT NOT NULL,
    technique_category  TEXT NOT NULL,
    status              TEXT NOT NULL,
    accuracy            DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (accuracy BETWEEN 0 AND 100),
    attempts            INTEGER NOT NULL DEFAULT 0,
    practice_count      INTEGER NOT NULL DEFAULT 0,
    validated_by        TEXT,
    mastered_at         TIMESTAMP WITH TIME ZONE,
    updated_at          TIMESTAMP WITH TIME ZONE NOT NULL,

    PRIMARY KEY (enrollment_id, technique_id)
);

CREATE TABLE IF NOT EXISTS challenge_progress (
    enrollment_id       TEXT NOT NULL REFERENCES course_enrollments(id) ON DELETE CASCADE,
    challenge_id        TEXT NOT NULL REFERENCES course_challenges(id) ON DELETE CASCADE,
    status              TEXT NOT NULL,
    attempts            INTEGER NOT NULL DEFAULT 0,
    actual_metric       INTEGER,
    actual_time_secs    INTEGER,
    best_metric         INTEGER,
    adjusted_metric     INTEGER NOT NULL,
    adjusted_time_secs  INTEGER,
    xp_earned           BIGINT NOT NULL DEFAULT 0,
    completed_at        TIMESTAMP WITH TIME ZONE,
    validated_by        TEXT,
    notes               TEXT,
    updated_at          TIMESTAMP WITH TIME ZONE NOT NULL,

    PRIMARY KEY (enrollment_id, challenge_id)
);

CREATE INDEX idx_challenge_progress_challenge ON challenge_progress(challenge_id);

CREATE TABLE IF NOT EXISTS evaluations (
    id                  TEXT PRIMARY KEY,
    enrollment_id       TEXT NOT NULL REFERENCES course_enrollments(id) ON DELETE CASCADE,
    lesson              INTEGER NOT NULL,
    technique_results   JSONB NOT NULL DEFAULT '[]',
    physical_test       JSONB,
    overall_score       DOUBLE PRECISION NOT NULL,
    passed              BOOLEAN NOT NULL,
    notes               TEXT,
    evaluator_id        TEXT NOT NULL,
    evaluated_at        TIMESTAMP WITH TIME ZONE NOT NULL
);

CREATE INDEX idx_evaluations_enrollment ON evaluations(enrollment_id, evaluated_at);

-- ============================================================================
-- 5. Degrees & Graduations
-- ============================================================================

CREATE TABLE IF NOT EXISTS degree_records (
    student_id          TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    course_id           TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    degree              SMALLINT NOT NULL CHECK (degree >= 1),
    achieved_at         TIMESTAMP WITH TIME ZONE NOT NULL,
    lessons_completed   INTEGER NOT NULL,
    progress_percent    DOUBLE PRECISION NOT NULL,

    PRIMARY KEY (student_id, course_id, degree)
);

CREATE TABLE IF NOT EXISTS graduation_records (
    id              TEXT PRIMARY KEY,
    student_id      TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    course_id       TEXT NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    from_belt       TEXT NOT NULL,
    to_belt         TEXT NOT NULL,
    approved_by     TEXT NOT NULL,
    ceremony_date   TIMESTAMP WITH TIME ZONE,
    notes           TEXT,
    was_eligible    BOOLEAN NOT NULL,
    approved_at     TIMESTAMP WITH TIME ZONE NOT NULL
);

CREATE INDEX idx_graduations_student ON graduation_records(student_id, approved_at);
"#;

/// Course-scoped ledger entries and length-prefixed idempotency keys
pub const MIGRATION_V3: &str = r#"
ALTER TABLE points_transactions
    ADD COLUMN IF NOT EXISTS enrollment_id TEXT REFERENCES course_enrollments(id) ON DELETE SET NULL;

CREATE INDEX IF NOT EXISTS idx_points_enrollment
    ON points_transactions(enrollment_id) WHERE enrollment_id IS NOT NULL;

-- v1 keys were `student:SOURCE:reference`; prefix the student id's byte length
UPDATE points_transactions
   SET idempotency_key = octet_length(student_id) || ':' || idempotency_key
 WHERE idempotency_key IS NOT NULL;
"#;

/// Get all migration SQL statements in order
pub fn get_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        ("v1_students_courses_ledger", MIGRATION_V1),
        ("v2_achievements_activity_graduation", MIGRATION_V2),
        ("v3_ledger_enrollment_scope", MIGRATION_V3),
    ]
}
