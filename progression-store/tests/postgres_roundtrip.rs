//! PostgreSQL round trip through the engine
//!
//! Requires a reachable database:
//! `DATABASE_URL=postgres://... cargo test -p academy-progression-store -- --ignored`

use std::sync::Arc;

use academy_core::challenges::{ChallengeKind, CourseChallenge};
use academy_core::course::Course;
use academy_core::ledger::XpSource;
use academy_core::store::StorageManager;
use academy_core::student::{
    AdjustmentProfile, CourseEnrollment, Gender, PhysicalCondition, Student, StudentCategory,
};
use academy_core::engine::GraduationApproval;
use academy_core::{EngineConfig, ProgressionEngine, ProgressionError};
use academy_store::{storage_manager, PostgresStore};
use chrono::{DurationRound, TimeDelta, Utc};

/// Unique suffix so repeated runs do not collide
fn run_id() -> String {
    format!(
        "{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos()
    )
}

async fn connect() -> Arc<PostgresStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    Arc::new(PostgresStore::new(&url, 4).await.expect("Failed to connect"))
}

async fn seed(storage: &StorageManager, id: &str) -> (Student, CourseEnrollment) {
    // PostgreSQL keeps microseconds
    let now = Utc::now().duration_trunc(TimeDelta::seconds(1)).unwrap();
    let org = format!("org_{}", id);
    let course = Course {
        id: format!("course_{}", id),
        organization_id: org.clone(),
        name: "Fundamentals".into(),
        total_lessons: 20,
        duration_weeks: 10,
        classes_per_week: 2,
        required_techniques: vec!["jab".into()],
        starts_at: now,
    };
    storage.courses.upsert(&course).await.unwrap();

    let student = Student::new(
        format!("student_{}", id),
        org,
        "Ana",
        AdjustmentProfile::new(StudentCategory::Adult, Gender::Female, PhysicalCondition::Standard),
        now,
    );
    storage.students.upsert(&student).await.unwrap();

    let enrollment = CourseEnrollment::new(format!("enr_{}", id), &student, &course.id, "white", now);
    storage.courses.upsert_enrollment(&enrollment).await.unwrap();

    storage
        .courses
        .insert_challenge(&CourseChallenge {
            id: format!("ch_{}", id),
            course_id: course.id.clone(),
            week_number: 1,
            kind: ChallengeKind::Fitness,
            activity: "Push-ups".into(),
            description: String::new(),
            base_metric: 20,
            base_time_secs: None,
            xp_reward: 30,
        })
        .await
        .unwrap();

    (student, enrollment)
}

#[tokio::test]
#[ignore]
async fn test_entities_round_trip() {
    let pg = connect().await;
    let storage = storage_manager(pg);
    let id = run_id();
    let (student, enrollment) = seed(&storage, &id).await;

    let loaded = storage.students.get(&student.id).await.unwrap().unwrap();
    assert_eq!(loaded, student);

    let found = storage
        .courses
        .find_enrollment(&student.id, &enrollment.course_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, enrollment);

    assert_eq!(storage.courses.increment_lessons(&enrollment.id).await.unwrap(), 1);

    let duplicate_week = CourseChallenge {
        id: format!("ch2_{}", id),
        course_id: enrollment.course_id.clone(),
        week_number: 1,
        kind: ChallengeKind::Fitness,
        activity: "Squats".into(),
        description: String::new(),
        base_metric: 30,
        base_time_secs: None,
        xp_reward: 30,
    };
    assert!(!storage.courses.insert_challenge(&duplicate_week).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_engine_ledger_on_postgres() {
    let pg = connect().await;
    let id = run_id();
    let (student, enrollment) = seed(&storage_manager(pg.clone()), &id).await;
    let engine = ProgressionEngine::new(storage_manager(pg), EngineConfig::default());

    // adult female: 20 * 0.8 = 16
    let challenge_id = format!("ch_{}", id);
    let first = engine
        .submit_challenge(&enrollment.id, &challenge_id, Some(16), None)
        .await
        .unwrap();
    assert!(first.award.is_some());
    let second = engine
        .submit_challenge(&enrollment.id, &challenge_id, Some(19), None)
        .await
        .unwrap();
    assert!(second.award.is_none());

    engine.grant_bonus(&student.id, 500, "tournament", "coach").await.unwrap();
    assert!(matches!(
        engine.grant_bonus(&student.id, 501, "too much", "coach").await,
        Err(ProgressionError::InvalidState(_))
    ));

    let history = engine.history(&student.id, 50, 0).await.unwrap();
    let sum: i64 = history.iter().map(|t| t.amount).sum();
    assert_eq!(engine.total_xp(&student.id).await.unwrap(), sum);
    assert_eq!(history[0].source, XpSource::Bonus);

    let report = engine.replay(&student.id).await.unwrap();
    assert!(!report.repaired);
    assert_eq!(report.ledger_total, sum);
}

#[tokio::test]
#[ignore]
async fn test_degree_conflict_and_graduation() {
    let pg = connect().await;
    let storage = storage_manager(pg.clone());
    let id = run_id();
    let (student, enrollment) = seed(&storage, &id).await;
    let engine = ProgressionEngine::new(storage_manager(pg), EngineConfig::default());

    for _ in 0..4 {
        storage.courses.increment_lessons(&enrollment.id).await.unwrap();
    }
    let degrees = engine
        .check_and_record_degrees(&student.id, &enrollment.course_id)
        .await
        .unwrap();
    assert_eq!(degrees.len(), 1);
    assert!(engine
        .record_degree_achievement(&student.id, &enrollment.course_id, 1)
        .await
        .is_err());

    let record = engine
        .approve_graduation(
            &student.id,
            &enrollment.course_id,
            GraduationApproval {
                instructor_id: "sensei".into(),
                to_belt: "yellow".into(),
                ..GraduationApproval::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(record.to_belt, "yellow");
    let moved = storage.courses.get_enrollment(&enrollment.id).await.unwrap().unwrap();
    assert_eq!(moved.current_belt, "yellow");
}
