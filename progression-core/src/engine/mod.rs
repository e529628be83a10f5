//! Progression Engine — Integration Layer
//!
//! Ties the pure rule modules (adjuster, ledger, achievements, challenges,
//! graduation, risk, leaderboard) to a `StorageManager` and a clock.
//!
//! Services:
//!   1. XpService          — the only writer of the XP ledger
//!   2. AchievementService — unlock evaluation, catalogues, badges
//!   3. ChallengeService   — weekly challenge submissions & rankings
//!   4. TrainingService    — check-ins, technique practice, evaluations
//!   5. GraduationService  — degrees, belt changes, course completion
//!   6. InsightService     — risk, recommendations, leaderboards, profiles
//!
//! Every write for a student runs under that student's lock; see `locks`.

pub mod config;
pub mod context;
pub mod locks;
pub mod progression;
pub mod services;

pub use config::EngineConfig;
pub use locks::{StudentGuard, StudentLocks};
pub use progression::ProgressionEngine;
pub use services::*;

// =====================================================
// Tests
// =====================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::CourseChallenge;
    use crate::clock::ManualClock;
    use crate::course::Course;
    use crate::error::ProgressionError;
    use crate::ledger::XpSource;
    use crate::store::MemoryStore;
    use crate::student::{
        AdjustmentProfile, CourseEnrollment, Gender, PhysicalCondition, Student, StudentCategory,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 18, 0, 0).unwrap()
    }

    fn test_engine() -> (ProgressionEngine, MemoryStore, Arc<ManualClock>) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let engine =
            ProgressionEngine::with_clock(store.storage_manager(), EngineConfig::default(), clock.clone());

        let student = Student::new(
            "s1",
            "org",
            "Ana",
            AdjustmentProfile::new(StudentCategory::Adult, Gender::Female, PhysicalCondition::Standard),
            t0(),
        );
        store.put_course(Course {
            id: "c1".into(),
            organization_id: "org".into(),
            name: "Krav Maga Level 1".into(),
            total_lessons: 48,
            duration_weeks: 24,
            classes_per_week: 2,
            required_techniques: vec!["t1".into(), "t2".into()],
            starts_at: t0(),
        });
        store.put_enrollment(CourseEnrollment::new("e1", &student, "c1", "white", t0()));
        store.put_student(student);
        (engine, store, clock)
    }

    fn challenge(base_metric: u32, xp: i64) -> CourseChallenge {
        CourseChallenge {
            id: "ch1".into(),
            course_id: "c1".into(),
            week_number: 1,
            kind: crate::challenges::ChallengeKind::Fitness,
            activity: "Push-ups".into(),
            description: String::new(),
            base_metric,
            base_time_secs: None,
            xp_reward: xp,
        }
    }

    #[tokio::test]
    async fn test_award_and_level() {
        let (engine, _, _) = test_engine();
        let receipt = engine
            .award("s1", 120, XpSource::Bonus, None, None, "welcome")
            .await
            .unwrap();
        assert_eq!(receipt.new_total, 120);
        assert_eq!(receipt.level_before, 1);
        assert_eq!(receipt.level_after, 2);
        assert!(receipt.leveled_up());
        assert_eq!(engine.level("s1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_award_rejects_non_positive() {
        let (engine, _, _) = test_engine();
        let err = engine
            .award("s1", 0, XpSource::Bonus, None, None, "nothing")
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_unknown_student_is_not_found() {
        let (engine, _, _) = test_engine();
        let err = engine.total_xp("ghost").await.unwrap_err();
        assert!(matches!(err, ProgressionError::NotFound { entity: "student", .. }));
    }

    #[tokio::test]
    async fn test_challenge_adjusted_for_snapshot() {
        let (engine, store, _) = test_engine();
        store.put_challenge(challenge(20, 30));

        let failed = engine.submit_challenge("e1", "ch1", Some(15), None).await.unwrap();
        assert_eq!(failed.progress.adjusted_metric, 16);
        assert!(failed.award.is_none());

        let done = engine.submit_challenge("e1", "ch1", Some(16), None).await.unwrap();
        assert!(done.progress.is_completed());
        assert_eq!(done.award.as_ref().map(|a| a.amount), Some(30));

        let again = engine.submit_challenge("e1", "ch1", Some(25), None).await.unwrap();
        assert!(again.award.is_none());
        assert_eq!(again.progress.best_metric, Some(25));
        assert_eq!(engine.total_xp("s1").await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_rejecting_completed_submission_fails() {
        let (engine, store, _) = test_engine();
        store.put_challenge(challenge(10, 20));
        engine.submit_challenge("e1", "ch1", Some(10), None).await.unwrap();

        let review = SubmissionReview {
            instructor_id: "coach".into(),
            approved: false,
            ..SubmissionReview::default()
        };
        let err = engine.validate_submission("e1", "ch1", review).await.unwrap_err();
        assert!(matches!(err, ProgressionError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_check_in_streak_and_duplicate() {
        let (engine, _, clock) = test_engine();
        let first = engine
            .process_check_in("s1", Some("c1"), "L1", 2)
            .await
            .unwrap()
            .applied()
            .unwrap();
        // 50 base + 2 techniques + first of month
        assert_eq!(first.xp.total, 95);
        assert_eq!(first.lessons_completed, Some(1));
        assert_eq!(first.current_streak, 1);

        let dup = engine.process_check_in("s1", Some("c1"), "L1", 2).await.unwrap();
        assert!(!dup.is_applied());

        clock.advance(Duration::days(2));
        let second = engine
            .process_check_in("s1", Some("c1"), "L2", 0)
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(second.current_streak, 2);
        assert_eq!(second.xp.total, 50);
    }

    #[tokio::test]
    async fn test_replay_repairs_drift() {
        let (engine, store, _) = test_engine();
        engine.grant_bonus("s1", 40, "helping", "coach").await.unwrap();
        use crate::store::LedgerRepo;
        store
            .set_projection(&crate::ledger::XpProjection {
                student_id: "s1".into(),
                total_xp: 999,
                last_changed_at: None,
            })
            .await
            .unwrap();

        let report = engine.replay("s1").await.unwrap();
        assert!(report.repaired);
        assert_eq!(report.drift(), 959);
        assert_eq!(engine.total_xp("s1").await.unwrap(), 40);
        assert!(!engine.replay("s1").await.unwrap().repaired);
    }
}
