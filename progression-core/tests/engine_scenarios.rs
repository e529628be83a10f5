//! End-to-end scenarios against the in-memory store
//!
//! Each test builds an engine on a `ManualClock` so streaks, windows and
//! tie-breaks are reproducible.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use academy_core::achievements::{Achievement, AchievementCategory, Rarity, UnlockCriteria};
use academy_core::badges::Badge;
use academy_core::challenges::{ChallengeKind, ChallengeRanking, CourseChallenge};
use academy_core::clock::ManualClock;
use academy_core::course::Course;
use academy_core::engine::{EngineConfig, EvaluationInput, GraduationApproval, ProgressionEngine};
use academy_core::error::ProgressionError;
use academy_core::evaluations::TechniqueResult;
use academy_core::leaderboard::LeaderboardWindow;
use academy_core::error::StoreError;
use academy_core::ledger::{
    AppendOutcome, IdempotencyKey, NewTransaction, PointsTransaction, XpProjection, XpSource,
};
use academy_core::store::{AchievementRepo, LedgerRepo, MemoryStore, RepoResult, StorageManager};
use academy_core::student::{
    AdjustmentProfile, CourseEnrollment, EnrollmentStatus, Gender, PhysicalCondition, Student,
    StudentCategory,
};
use academy_core::techniques::{PracticeUpdate, TechniqueStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 18, 0, 0).unwrap()
}

fn course(id: &str) -> Course {
    Course {
        id: id.into(),
        organization_id: "org".into(),
        name: "Krav Maga Level 1".into(),
        total_lessons: 20,
        duration_weeks: 10,
        classes_per_week: 2,
        required_techniques: vec!["jab".into(), "cross".into()],
        starts_at: t0(),
    }
}

/// Ledger that rejects the first `failures` appends from one source.
struct FlakyLedger {
    inner: MemoryStore,
    source: XpSource,
    failures: AtomicUsize,
}

#[async_trait]
impl LedgerRepo for FlakyLedger {
    async fn append(
        &self,
        transaction: &NewTransaction,
        key: Option<&IdempotencyKey>,
    ) -> RepoResult<AppendOutcome> {
        let fail = transaction.source == self.source
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            return Err(StoreError::backend_msg("transient"));
        }
        self.inner.append(transaction, key).await
    }

    async fn projection(&self, student_id: &str) -> RepoResult<XpProjection> {
        self.inner.projection(student_id).await
    }

    async fn projections_for_organization(&self, organization_id: &str) -> RepoResult<Vec<XpProjection>> {
        self.inner.projections_for_organization(organization_id).await
    }

    async fn set_projection(&self, projection: &XpProjection) -> RepoResult<()> {
        self.inner.set_projection(projection).await
    }

    async fn history(&self, student_id: &str, limit: usize, offset: usize) -> RepoResult<Vec<PointsTransaction>> {
        self.inner.history(student_id, limit, offset).await
    }

    async fn entries_for_student(&self, student_id: &str) -> RepoResult<Vec<PointsTransaction>> {
        self.inner.entries_for_student(student_id).await
    }

    async fn entries_for_organization(
        &self,
        organization_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> RepoResult<Vec<PointsTransaction>> {
        self.inner.entries_for_organization(organization_id, since).await
    }
}

struct Fixture {
    engine: ProgressionEngine,
    store: MemoryStore,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_storage(|_, _| {})
    }

    /// Fixture whose storage manager can be rewired before the engine is
    /// built.
    fn with_storage(rewire: impl FnOnce(&MemoryStore, &mut StorageManager)) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let mut storage = store.storage_manager();
        rewire(&store, &mut storage);
        let engine = ProgressionEngine::with_clock(storage, EngineConfig::default(), clock.clone());
        store.put_course(course("c1"));
        Self {
            engine,
            store,
            clock,
        }
    }

    /// Fixture whose ledger fails the first append from `source`.
    fn with_flaky_ledger(source: XpSource) -> Self {
        Self::with_storage(|store, storage| {
            storage.ledger = Box::new(FlakyLedger {
                inner: store.clone(),
                source,
                failures: AtomicUsize::new(1),
            });
        })
    }

    fn enroll(&self, id: &str, gender: Gender) -> Student {
        self.enroll_as(id, StudentCategory::Adult, gender)
    }

    fn enroll_as(&self, id: &str, category: StudentCategory, gender: Gender) -> Student {
        let student = Student::new(
            id,
            "org",
            id.to_uppercase(),
            AdjustmentProfile::new(category, gender, PhysicalCondition::Standard),
            t0(),
        );
        self.store.put_enrollment(CourseEnrollment::new(
            format!("e-{}", id),
            &student,
            "c1",
            "white",
            t0(),
        ));
        self.store.put_student(student.clone());
        student
    }

    /// Replace the student's enrollment with an edited copy.
    fn edit_enrollment(&self, student: &Student, edit: impl FnOnce(&mut CourseEnrollment)) {
        let mut enrollment =
            CourseEnrollment::new(format!("e-{}", student.id), student, "c1", "white", t0());
        edit(&mut enrollment);
        self.store.put_enrollment(enrollment);
    }
}

fn push_ups(base: u32, xp: i64) -> CourseChallenge {
    CourseChallenge {
        id: "ch-pushups".into(),
        course_id: "c1".into(),
        week_number: 1,
        kind: ChallengeKind::Fitness,
        activity: "Push-ups".into(),
        description: "Complete the push-ups".into(),
        base_metric: base,
        base_time_secs: None,
        xp_reward: xp,
    }
}

#[tokio::test]
async fn test_adult_female_target_scaled() {
    let f = Fixture::new();
    f.enroll("ana", Gender::Female);
    f.store.put_challenge(push_ups(20, 40));

    let miss = f
        .engine
        .submit_challenge("e-ana", "ch-pushups", Some(15), None)
        .await
        .unwrap();
    assert_eq!(miss.verdict.unwrap().adjusted_metric, 16);
    assert!(!miss.progress.is_completed());

    let hit = f
        .engine
        .submit_challenge("e-ana", "ch-pushups", Some(16), None)
        .await
        .unwrap();
    assert!(hit.progress.is_completed());
    assert_eq!(hit.progress.attempts, 2);
    assert_eq!(f.engine.total_xp("ana").await.unwrap(), 40);
}

#[tokio::test]
async fn test_same_challenge_twice_credits_once() {
    let f = Fixture::new();
    f.enroll("bo", Gender::Male);
    f.store.put_challenge(push_ups(20, 40));

    for metric in [20, 30] {
        f.engine
            .submit_challenge("e-bo", "ch-pushups", Some(metric), None)
            .await
            .unwrap();
    }
    let history = f.engine.history("bo", 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(f.engine.total_xp("bo").await.unwrap(), 40);
}

#[tokio::test]
async fn test_withdrawn_enrollment_cannot_submit() {
    let f = Fixture::new();
    f.store.put_challenge(push_ups(20, 40));
    let student = f.enroll("cy", Gender::Male);
    f.edit_enrollment(&student, |e| e.status = EnrollmentStatus::Withdrawn);

    let err = f
        .engine
        .submit_challenge("e-cy", "ch-pushups", Some(50), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressionError::InvalidState(_)));
}

#[tokio::test]
async fn test_degree_gating() {
    let f = Fixture::new();
    let student = f.enroll("di", Gender::Male);
    // 20 lessons at a 20% step: 4 lessons per degree, 9 lessons reach degree 2
    f.edit_enrollment(&student, |e| e.lessons_completed = 9);

    let err = f
        .engine
        .record_degree_achievement("di", "c1", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressionError::InvalidState(_)));

    f.engine.record_degree_achievement("di", "c1", 1).await.unwrap();
    let second = f.engine.record_degree_achievement("di", "c1", 2).await.unwrap();
    assert_eq!(second.record.degree, 2);
    assert_eq!(second.award.map(|a| a.amount), Some(100));

    let again = f
        .engine
        .record_degree_achievement("di", "c1", 2)
        .await
        .unwrap_err();
    assert!(matches!(again, ProgressionError::InvalidState(_)));

    let beyond = f
        .engine
        .record_degree_achievement("di", "c1", 3)
        .await
        .unwrap_err();
    assert!(matches!(beyond, ProgressionError::InvalidState(_)));
}

#[tokio::test]
async fn test_check_and_record_degrees_in_order() {
    let f = Fixture::new();
    let student = f.enroll("ed", Gender::Male);
    f.edit_enrollment(&student, |e| e.lessons_completed = 13);

    let outcomes = f.engine.check_and_record_degrees("ed", "c1").await.unwrap();
    let degrees: Vec<u8> = outcomes.iter().map(|o| o.record.degree).collect();
    assert_eq!(degrees, vec![1, 2, 3]);
    assert!(f.engine.check_and_record_degrees("ed", "c1").await.unwrap().is_empty());

    let snapshot = f.engine.calculate_progression("ed", "c1").await.unwrap();
    assert_eq!(snapshot.current_degree, 3);
    assert_eq!(snapshot.lessons_for_next_degree, 3);
    assert_eq!(snapshot.recorded_degrees.len(), 3);
    assert!(!snapshot.is_eligible_for_belt_change);
}

#[tokio::test]
async fn test_graduation_is_explicit_and_moves_belt() {
    let f = Fixture::new();
    f.enroll("fa", Gender::Male);

    let record = f
        .engine
        .approve_graduation(
            "fa",
            "c1",
            GraduationApproval {
                instructor_id: "coach".into(),
                to_belt: "yellow".into(),
                ..GraduationApproval::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(record.from_belt, "white");
    assert_eq!(record.id, "fa:c1:1");
    assert!(!record.was_eligible);

    let snapshot = f.engine.calculate_progression("fa", "c1").await.unwrap();
    assert_eq!(snapshot.current_belt, "yellow");
}

#[tokio::test]
async fn test_graduation_ids_numbered_per_course() {
    let f = Fixture::new();
    let student = f.enroll("fay", Gender::Female);
    f.store.put_course(course("c2"));
    f.store.put_enrollment(CourseEnrollment::new("e2-fay", &student, "c2", "white", t0()));

    let approve = |course_id: &'static str, belt: &'static str| {
        f.engine.approve_graduation(
            "fay",
            course_id,
            GraduationApproval {
                instructor_id: "coach".into(),
                to_belt: belt.into(),
                ..GraduationApproval::default()
            },
        )
    };
    assert_eq!(approve("c1", "yellow").await.unwrap().id, "fay:c1:1");
    assert_eq!(approve("c2", "yellow").await.unwrap().id, "fay:c2:1");

    let second = approve("c1", "orange").await.unwrap();
    assert_eq!(second.id, "fay:c1:2");
    assert_eq!(second.from_belt, "yellow");
    assert_eq!(f.engine.graduation.graduations("fay").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_leaderboard_tie_goes_to_earlier_reacher() {
    let f = Fixture::new();
    f.enroll("gil", Gender::Male);
    f.enroll("hal", Gender::Male);

    f.engine.grant_bonus("hal", 500, "kata", "coach").await.unwrap();
    f.clock.advance(Duration::days(2));
    f.engine.grant_bonus("gil", 500, "kata", "coach").await.unwrap();

    let board = f.engine.leaderboard("org", None).await.unwrap();
    assert_eq!(board[0].student_id, "hal");
    assert_eq!(board[1].student_id, "gil");
    assert_eq!(board[0].xp, 500);

    let recent = f
        .engine
        .leaderboard_window("org", LeaderboardWindow::Since(t0() + Duration::days(1)), Some(5))
        .await
        .unwrap();
    assert_eq!(recent[0].student_id, "gil");
    assert_eq!(recent[1].xp, 0);
}

#[tokio::test]
async fn test_bonus_bounds() {
    let f = Fixture::new();
    f.enroll("ivy", Gender::Female);

    let err = f.engine.grant_bonus("ivy", 501, "too much", "coach").await.unwrap_err();
    assert!(matches!(err, ProgressionError::InvalidState(_)));

    f.engine.grant_bonus("ivy", 500, "tournament", "coach").await.unwrap();
    let history = f.engine.history("ivy", 10, 0).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].amount, 500);
    assert_eq!(history[0].source, XpSource::Bonus);
}

#[tokio::test]
async fn test_ledger_matches_history() {
    let f = Fixture::new();
    f.enroll("jo", Gender::Male);
    f.engine.seed_default_achievements("org").await.unwrap();

    f.engine.process_check_in("jo", Some("c1"), "L1", 1).await.unwrap();
    f.clock.advance(Duration::days(1));
    f.engine.process_check_in("jo", Some("c1"), "L2", 0).await.unwrap();
    f.engine.grant_bonus("jo", 35, "helped a partner", "coach").await.unwrap();

    let history = f.engine.history("jo", 100, 0).await.unwrap();
    let sum: i64 = history.iter().map(|t| t.amount).sum();
    assert_eq!(f.engine.total_xp("jo").await.unwrap(), sum);
    assert!(!f.engine.replay("jo").await.unwrap().repaired);
}

#[tokio::test]
async fn test_unlocks_are_idempotent() {
    let f = Fixture::new();
    f.enroll("kim", Gender::Female);
    f.engine.seed_default_achievements("org").await.unwrap();

    let check_in = f
        .engine
        .process_check_in("kim", Some("c1"), "L1", 0)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert!(check_in.unlocked.iter().any(|a| a.id == "org:first_class"));

    assert!(f.engine.evaluate_unlocks("kim").await.unwrap().is_empty());
    let unlocks = f.engine.student_achievements("kim").await.unwrap();
    assert!(unlocks.iter().any(|s| s.achievement.id == "org:first_class" && s.progress >= 1.0));
}

#[tokio::test]
async fn test_seeding_twice_is_invalid() {
    let f = Fixture::new();
    assert_eq!(f.engine.seed_default_achievements("org").await.unwrap(), 10);
    let err = f.engine.seed_default_achievements("org").await.unwrap_err();
    assert!(matches!(err, ProgressionError::InvalidState(_)));
}

#[tokio::test]
async fn test_award_once_reports_already_processed() {
    let f = Fixture::new();
    f.enroll("lu", Gender::Male);
    let key = IdempotencyKey::new("lu", XpSource::Bonus, "promo-2024");

    assert!(f.engine.award_once(&key, 25, "promo").await.unwrap().is_applied());
    assert!(!f.engine.award_once(&key, 25, "promo").await.unwrap().is_applied());
    assert_eq!(f.engine.total_xp("lu").await.unwrap(), 25);
}

#[tokio::test]
async fn test_award_keys_with_separators_do_not_collide() {
    let f = Fixture::new();
    f.enroll("a", Gender::Male);
    f.enroll("a:CHALLENGE:x", Gender::Male);

    let first = IdempotencyKey::new("a", XpSource::Challenge, "x:BONUS:y");
    let second = IdempotencyKey::new("a:CHALLENGE:x", XpSource::Bonus, "y");
    assert!(f.engine.award_once(&first, 50, "week 1").await.unwrap().is_applied());
    assert!(f.engine.award_once(&second, 70, "promo").await.unwrap().is_applied());

    assert_eq!(f.engine.total_xp("a").await.unwrap(), 50);
    assert_eq!(f.engine.total_xp("a:CHALLENGE:x").await.unwrap(), 70);
}

#[tokio::test]
async fn test_category_multiplier_scales_earned_xp_but_not_bonus() {
    let f = Fixture::new();
    f.enroll_as("vi", StudentCategory::Hero1, Gender::Female);
    f.enroll_as("wu", StudentCategory::Master2, Gender::Male);

    let key = IdempotencyKey::new("vi", XpSource::Challenge, "ch-1");
    let award = f.engine.award_once(&key, 50, "week 1").await.unwrap().applied().unwrap();
    assert_eq!(award.amount, 35);
    f.engine.grant_bonus("vi", 100, "tournament", "coach").await.unwrap();
    assert_eq!(f.engine.total_xp("vi").await.unwrap(), 135);

    let key = IdempotencyKey::new("wu", XpSource::Evaluation, "ev-1");
    let award = f.engine.award_once(&key, 100, "lesson 8").await.unwrap().applied().unwrap();
    assert_eq!(award.amount, 120);

    let history = f.engine.history("vi", 10, 0).await.unwrap();
    let sum: i64 = history.iter().map(|t| t.amount).sum();
    assert_eq!(sum, 135);
}

#[tokio::test]
async fn test_course_xp_follows_enrollment() {
    let f = Fixture::new();
    let student = f.enroll("yan", Gender::Male);
    f.store.put_course(course("c2"));
    f.store.put_enrollment(CourseEnrollment::new(
        "e2-yan",
        &student,
        "c2",
        "white",
        t0() + Duration::days(1),
    ));

    // tagged with the check-in's course
    f.engine.process_check_in("yan", Some("c1"), "L1", 0).await.unwrap();
    // untagged credits count toward the newest active enrollment
    f.engine.grant_bonus("yan", 200, "seminar", "coach").await.unwrap();

    let first = f.engine.course_xp("e-yan").await.unwrap();
    assert_eq!(first.course_id, "c1");
    assert_eq!(first.total_xp, 75);
    assert_eq!(first.level, 1);
    assert_eq!(first.xp_to_next_level, 25);

    let second = f.engine.course_xp("e2-yan").await.unwrap();
    assert_eq!(second.total_xp, 200);
    assert_eq!(second.level, 2);
    assert_eq!(f.engine.total_xp("yan").await.unwrap(), 275);

    let missing = f.engine.course_xp("e-none").await.unwrap_err();
    assert!(matches!(missing, ProgressionError::NotFound { .. }));
}

#[tokio::test]
async fn test_failed_achievement_reward_is_retried() {
    let f = Fixture::with_flaky_ledger(XpSource::Achievement);
    f.enroll("xia", Gender::Female);
    f.store
        .seed(
            "org",
            &[Achievement {
                id: "org:xp_100".into(),
                organization_id: "org".into(),
                name: "First Hundred".into(),
                description: "Earn 100 XP".into(),
                category: AchievementCategory::Progression,
                rarity: Rarity::Common,
                xp_reward: 40,
                criteria: UnlockCriteria::XpEarned { amount: 100 },
                is_hidden: false,
            }],
        )
        .await
        .unwrap();
    f.engine
        .award("xia", 100, XpSource::Technique, None, None, "drills")
        .await
        .unwrap();

    let err = f.engine.evaluate_unlocks("xia").await.unwrap_err();
    assert!(matches!(err, ProgressionError::Storage(_)));
    assert!(f.store.unlocks("xia").await.unwrap().is_empty());

    let unlocked = f.engine.evaluate_unlocks("xia").await.unwrap();
    assert_eq!(unlocked.len(), 1);
    assert_eq!(f.engine.total_xp("xia").await.unwrap(), 140);
    assert_eq!(f.store.unlocks("xia").await.unwrap().len(), 1);

    assert!(f.engine.evaluate_unlocks("xia").await.unwrap().is_empty());
    assert_eq!(f.engine.history("xia", 10, 0).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_degree_reward_is_retried() {
    let f = Fixture::with_flaky_ledger(XpSource::Degree);
    let student = f.enroll("zed", Gender::Male);
    f.edit_enrollment(&student, |e| e.lessons_completed = 4);

    let err = f.engine.record_degree_achievement("zed", "c1", 1).await.unwrap_err();
    assert!(matches!(err, ProgressionError::Storage(_)));
    assert!(f.engine.calculate_progression("zed", "c1").await.unwrap().recorded_degrees.is_empty());

    let outcome = f.engine.record_degree_achievement("zed", "c1", 1).await.unwrap();
    assert_eq!(outcome.award.map(|a| a.amount), Some(100));
    assert_eq!(f.engine.total_xp("zed").await.unwrap(), 100);
}

#[tokio::test]
async fn test_technique_mastery_credits_once() {
    let f = Fixture::new();
    f.enroll("mo", Gender::Male);

    let update = PracticeUpdate {
        status: Some(TechniqueStatus::Mastered),
        accuracy: Some(92.0),
        repetitions: 30,
        validated_by: Some("coach".into()),
        ..PracticeUpdate::default()
    };
    let first = f
        .engine
        .record_technique_practice("e-mo", "jab", update.clone())
        .await
        .unwrap();
    assert_eq!(first.mastery_award.map(|a| a.amount), Some(50));

    let mastered_at = first.progress.mastered_at;
    f.clock.advance(Duration::days(3));
    let second = f
        .engine
        .record_technique_practice("e-mo", "jab", update)
        .await
        .unwrap();
    assert!(second.mastery_award.is_none());
    assert_eq!(second.progress.mastered_at, mastered_at);
    assert_eq!(second.progress.practice_count, 60);
}

#[tokio::test]
async fn test_weekly_challenges_seeded_once() {
    let f = Fixture::new();
    assert_eq!(f.engine.seed_weekly_challenges("c1").await.unwrap(), 10);
    assert_eq!(f.engine.seed_weekly_challenges("c1").await.unwrap(), 0);

    f.enroll("ned", Gender::Male);
    let list = f.engine.student_challenges("ned").await.unwrap();
    assert_eq!(list.len(), 10);
    assert_eq!(list[0].challenge.week_number, 1);
}

#[tokio::test]
async fn test_challenge_leaderboard_by_metric() {
    let f = Fixture::new();
    f.enroll("oz", Gender::Male);
    f.enroll("pia", Gender::Male);
    f.store.put_challenge(push_ups(20, 10));

    f.engine.submit_challenge("e-oz", "ch-pushups", Some(25), None).await.unwrap();
    f.clock.advance(Duration::hours(1));
    f.engine.submit_challenge("e-pia", "ch-pushups", Some(40), None).await.unwrap();

    let board = f
        .engine
        .challenge_leaderboard("ch-pushups", ChallengeRanking::Metric, 10)
        .await
        .unwrap();
    let ids: Vec<_> = board.iter().map(|e| e.student_id.as_str()).collect();
    assert_eq!(ids, vec!["pia", "oz"]);
}

#[tokio::test]
async fn test_risk_for_student_who_never_attended() {
    let f = Fixture::new();
    f.enroll("quinn", Gender::Male);
    f.clock.advance(Duration::weeks(4));

    let risk = f.engine.estimate_risk("quinn").await.unwrap();
    assert!(risk.risk_score >= 30);
    assert_eq!(risk.confidence, 0.25);
    assert!(!risk.recommendations.is_empty());
}

#[tokio::test]
async fn test_student_profile_counts() {
    let f = Fixture::new();
    f.enroll("rae", Gender::Female);
    f.engine.process_check_in("rae", Some("c1"), "L1", 0).await.unwrap();

    let profile = f.engine.student_stats("rae").await.unwrap();
    assert_eq!(profile.classes_attended, 1);
    assert_eq!(profile.current_streak, 1);
    assert_eq!(profile.total_xp, 75);
    assert_eq!(profile.level, 1);
    assert_eq!(profile.xp_to_next_level, 25);
}

#[tokio::test]
async fn test_evaluation_flow() {
    let f = Fixture::new();
    let student = f.enroll("sal", Gender::Male);
    f.edit_enrollment(&student, |e| e.lessons_completed = 6);
    f.clock.advance(Duration::hours(1));

    let early = f.engine.can_take_evaluation("e-sal").await.unwrap();
    assert!(!early.can_take());

    f.engine.process_check_in("sal", Some("c1"), "L7", 0).await.unwrap();
    f.engine.process_check_in("sal", Some("c1"), "L8", 0).await.unwrap();
    f.engine
        .record_technique_practice(
            "e-sal",
            "jab",
            PracticeUpdate {
                status: Some(TechniqueStatus::Proficient),
                ..PracticeUpdate::default()
            },
        )
        .await
        .unwrap();

    let ready = f.engine.can_take_evaluation("e-sal").await.unwrap();
    assert!(ready.can_take(), "missing: {:?}", ready.missing());
    assert_eq!(ready.checkpoint.map(|c| c.lesson), Some(8));

    let input = EvaluationInput {
        id: "ev-sal-8".into(),
        enrollment_id: "e-sal".into(),
        lesson: 8,
        technique_results: vec![TechniqueResult {
            technique_id: "cross".into(),
            accuracy: 81.0,
            passed: true,
        }],
        physical_test: None,
        overall_score: 82.0,
        notes: None,
        evaluator_id: "coach".into(),
    };
    let outcome = f
        .engine
        .record_evaluation(input.clone())
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert!(outcome.evaluation.passed);
    // 100 base + 2 steps above 70 + pass bonus
    assert_eq!(outcome.award.map(|a| a.amount), Some(170));

    assert!(!f.engine.record_evaluation(input).await.unwrap().is_applied());
    let next = f.engine.next_evaluation("e-sal").await.unwrap();
    assert_eq!(next.map(|c| c.lesson), Some(16));
}

#[tokio::test]
async fn test_evaluation_at_unscheduled_lesson_is_invalid() {
    let f = Fixture::new();
    f.enroll("tia", Gender::Female);
    let err = f
        .engine
        .record_evaluation(EvaluationInput {
            id: "ev-x".into(),
            enrollment_id: "e-tia".into(),
            lesson: 9,
            technique_results: vec![],
            physical_test: None,
            overall_score: 90.0,
            notes: None,
            evaluator_id: "coach".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProgressionError::InvalidState(_)));
}

#[tokio::test]
async fn test_badges_granted_once_per_organization() {
    let f = Fixture::new();
    f.enroll("uma", Gender::Female);
    f.store.put_badge(Badge {
        id: "b-spirit".into(),
        organization_id: "org".into(),
        name: "Fighting Spirit".into(),
        description: "Never gives up".into(),
        icon: None,
    });
    f.store.put_badge(Badge {
        id: "b-foreign".into(),
        organization_id: "other-org".into(),
        name: "Elsewhere".into(),
        description: String::new(),
        icon: None,
    });

    let first = f
        .engine
        .grant_badge("uma", "b-spirit", "coach", Some("sparring day".into()))
        .await
        .unwrap();
    assert!(first.is_applied());
    assert!(!f.engine.grant_badge("uma", "b-spirit", "coach", None).await.unwrap().is_applied());

    let foreign = f.engine.grant_badge("uma", "b-foreign", "coach", None).await.unwrap_err();
    assert!(matches!(foreign, ProgressionError::InvalidState(_)));
    let missing = f.engine.grant_badge("uma", "b-none", "coach", None).await.unwrap_err();
    assert!(matches!(missing, ProgressionError::NotFound { .. }));

    assert_eq!(f.engine.student_badges("uma").await.unwrap().len(), 1);
}
