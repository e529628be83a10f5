use academy_core::adjuster::MultiplierTable;
use academy_core::challenges::{challenges_from_template, evaluate_attempt};
use academy_core::leaderboard::{rank, Contender, LeaderboardWindow};
use academy_core::ledger::{LevelTable, PointsTransaction, XpSource};
use academy_core::risk::{estimate, RiskInputs, RiskPolicy};
use academy_core::student::{AdjustmentProfile, Gender, PhysicalCondition, StudentCategory};
use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_adjuster(c: &mut Criterion) {
    let table = MultiplierTable::standard();
    let profile = AdjustmentProfile::new(StudentCategory::Master2, Gender::Female, PhysicalCondition::Limited);
    let challenges = challenges_from_template("c1", 24);

    c.bench_function("adjust_metric", |b| {
        b.iter(|| table.adjust(black_box(&profile), black_box(100)))
    });

    c.bench_function("evaluate_attempt_24_weeks", |b| {
        b.iter(|| {
            for challenge in &challenges {
                black_box(evaluate_attempt(&table, &profile, challenge, Some(80), Some(300)));
            }
        })
    });
}

fn bench_levels(c: &mut Criterion) {
    let levels = LevelTable::default();
    c.bench_function("level_lookup", |b| {
        b.iter(|| {
            for xp in (0..12_000).step_by(37) {
                black_box(levels.level(black_box(xp)));
            }
        })
    });
}

fn bench_leaderboard(c: &mut Criterion) {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let levels = LevelTable::default();
    let contenders: Vec<Contender> = (0..500)
        .map(|i| Contender {
            student_id: format!("s{:04}", i),
            name: format!("Student {}", i),
            total_xp: (i * 13 % 4000) as i64,
        })
        .collect();
    let entries: Vec<PointsTransaction> = (0..20_000)
        .map(|i| PointsTransaction {
            id: i as i64,
            student_id: format!("s{:04}", i % 500),
            enrollment_id: None,
            amount: 10 + (i % 7) as i64 * 5,
            source: XpSource::Attendance,
            reference_type: None,
            reference_id: None,
            reason: "class".into(),
            idempotency_key: None,
            created_at: t0 + Duration::minutes(i as i64),
        })
        .collect();

    c.bench_function("leaderboard_500_students_20k_entries", |b| {
        b.iter(|| {
            black_box(rank(
                &levels,
                &contenders,
                &entries,
                LeaderboardWindow::AllTime,
                50,
            ))
        })
    });

    let since = LeaderboardWindow::Since(t0 + Duration::days(7));
    c.bench_function("leaderboard_window_week", |b| {
        b.iter(|| black_box(rank(&levels, &contenders, &entries, since, 50)))
    });
}

fn bench_risk(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let policy = RiskPolicy::default();
    let inputs = RiskInputs {
        student_id: "s1".into(),
        check_ins: (0..120).map(|i| now - Duration::days(i * 2 + 9)).collect(),
        attendance_rate: Some(0.62),
        velocity_ratio: Some(0.5),
        challenges_completed: 3,
        challenges_available: 12,
        now,
    };

    c.bench_function("estimate_risk", |b| {
        b.iter(|| black_box(estimate(&policy, black_box(&inputs))))
    });
}

criterion_group!(benches, bench_adjuster, bench_levels, bench_leaderboard, bench_risk);
criterion_main!(benches);
