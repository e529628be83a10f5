//! Property-based tests using proptest
//!
//! Invariants that must hold for ALL inputs:
//! - Levels: monotonic in XP, bounded by the table
//! - Adjuster: targets never negative, monotonic in the base metric
//! - Challenges: the adjusted target itself passes, one below fails
//! - Streaks: never zero, grows inside the grace window
//! - Ledger: projection always equals the sum of history

use std::sync::Arc;

use academy_core::adjuster::MultiplierTable;
use academy_core::attendance::next_streak;
use academy_core::challenges::{evaluate_attempt, ChallengeKind, CourseChallenge};
use academy_core::clock::ManualClock;
use academy_core::course::Course;
use academy_core::engine::{EngineConfig, ProgressionEngine};
use academy_core::ledger::{LevelTable, XpSource};
use academy_core::store::MemoryStore;
use academy_core::student::{
    AdjustmentProfile, CourseEnrollment, Gender, PhysicalCondition, Student, StudentCategory,
};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

fn profile() -> impl Strategy<Value = AdjustmentProfile> {
    (
        prop::sample::select(StudentCategory::ALL.to_vec()),
        prop::sample::select(Gender::ALL.to_vec()),
        prop::sample::select(PhysicalCondition::ALL.to_vec()),
    )
        .prop_map(|(c, g, p)| AdjustmentProfile::new(c, g, p))
}

fn challenge(base_metric: u32) -> CourseChallenge {
    CourseChallenge {
        id: "ch".into(),
        course_id: "c".into(),
        week_number: 1,
        kind: ChallengeKind::Fitness,
        activity: "Squats".into(),
        description: String::new(),
        base_metric,
        base_time_secs: None,
        xp_reward: 10,
    }
}

// ============================================================
// Level Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_level_monotonic(a in -1_000i64..20_000, b in -1_000i64..20_000) {
        let levels = LevelTable::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(levels.level(lo) <= levels.level(hi));
    }

    #[test]
    fn prop_level_bounded(xp in any::<i64>()) {
        let levels = LevelTable::default();
        let level = levels.level(xp);
        prop_assert!(level >= 1);
        prop_assert!(level <= levels.max_level());
        prop_assert!(levels.xp_to_next_level(xp) >= 0);
    }

    #[test]
    fn prop_progress_is_percent(xp in 0i64..15_000) {
        let progress = LevelTable::default().progress_to_next_level(xp);
        prop_assert!((0.0..=100.0).contains(&progress), "progress {progress} for xp {xp}");
    }
}

// ============================================================
// Adjuster & Challenge Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_adjust_monotonic_in_base(p in profile(), a in 0u32..10_000, b in 0u32..10_000) {
        let table = MultiplierTable::standard();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(table.adjust(&p, lo) <= table.adjust(&p, hi));
    }

    #[test]
    fn prop_adjusted_target_is_the_boundary(p in profile(), base in 1u32..500) {
        let table = MultiplierTable::standard();
        let c = challenge(base);
        let target = evaluate_attempt(&table, &p, &c, None, None).adjusted_metric;

        let at = evaluate_attempt(&table, &p, &c, Some(target), None);
        prop_assert!(at.completed);
        if target > 0 {
            let below = evaluate_attempt(&table, &p, &c, Some(target - 1), None);
            prop_assert!(!below.completed);
        }
    }

    #[test]
    fn prop_missing_metric_never_completes(p in profile(), base in 1u32..500) {
        let verdict = evaluate_attempt(&MultiplierTable::standard(), &p, &challenge(base), None, None);
        prop_assert!(!verdict.completed);
    }
}

// ============================================================
// Streak Properties
// ============================================================

proptest! {
    #[test]
    fn prop_streak_never_zero(current in 0u32..400, gap_hours in 0i64..2_000) {
        let last = Utc.with_ymd_and_hms(2024, 2, 1, 19, 0, 0).unwrap();
        let now = last + Duration::hours(gap_hours);
        prop_assert!(next_streak(Some(last), current, now, 3) >= 1);
    }

    #[test]
    fn prop_streak_grows_within_grace(current in 1u32..400, gap_days in 1i64..=3) {
        let last = Utc.with_ymd_and_hms(2024, 2, 1, 19, 0, 0).unwrap();
        let now = last + Duration::days(gap_days);
        prop_assert_eq!(next_streak(Some(last), current, now, 3), current + 1);
    }
}

// ============================================================
// Ledger Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn prop_projection_equals_history(amounts in prop::collection::vec(1i64..400, 1..25)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (total, history_sum, entries) = rt.block_on(async {
            let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
            let store = MemoryStore::new();
            let clock = Arc::new(ManualClock::new(t0));
            let engine = ProgressionEngine::with_clock(
                store.storage_manager(),
                EngineConfig::default(),
                clock.clone(),
            );
            let student = Student::new(
                "p1",
                "org",
                "Prop",
                AdjustmentProfile::new(StudentCategory::Adult, Gender::Male, PhysicalCondition::Standard),
                t0,
            );
            store.put_course(Course {
                id: "c".into(),
                organization_id: "org".into(),
                name: "Course".into(),
                total_lessons: 10,
                duration_weeks: 5,
                classes_per_week: 2,
                required_techniques: vec![],
                starts_at: t0,
            });
            store.put_enrollment(CourseEnrollment::new("e", &student, "c", "white", t0));
            store.put_student(student);

            for amount in &amounts {
                engine
                    .award("p1", *amount, XpSource::Bonus, None, None, "prop")
                    .await
                    .unwrap();
                clock.advance(Duration::minutes(5));
            }
            let history = engine.history("p1", 1_000, 0).await.unwrap();
            (
                engine.total_xp("p1").await.unwrap(),
                history.iter().map(|t| t.amount).sum::<i64>(),
                history.len(),
            )
        });

        prop_assert_eq!(total, amounts.iter().sum::<i64>());
        prop_assert_eq!(total, history_sum);
        prop_assert_eq!(entries, amounts.len());
    }
}
