//! Weekly Challenges
//!
//! Each course week carries one challenge with a base metric (and optionally
//! a time limit) that is scaled to the student's enrollment profile before
//! judging an attempt.
//!
//! State machine per (enrollment, challenge):
//! `NotAttempted → Attempted → {Failed, Completed}`. `Completed` is terminal;
//! later submissions refresh the recorded metric but never undo completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adjuster::MultiplierTable;
use crate::student::AdjustmentProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    Fitness,
    Technique,
    Attendance,
    Streak,
    Custom,
}

impl ChallengeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeKind::Fitness => "FITNESS",
            ChallengeKind::Technique => "TECHNIQUE",
            ChallengeKind::Attendance => "ATTENDANCE",
            ChallengeKind::Streak => "STREAK",
            ChallengeKind::Custom => "CUSTOM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FITNESS" => Some(ChallengeKind::Fitness),
            "TECHNIQUE" => Some(ChallengeKind::Technique),
            "ATTENDANCE" => Some(ChallengeKind::Attendance),
            "STREAK" => Some(ChallengeKind::Streak),
            "CUSTOM" => Some(ChallengeKind::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseChallenge {
    pub id: String,
    pub course_id: String,
    pub week_number: u32,
    pub kind: ChallengeKind,
    pub activity: String,
    pub description: String,
    pub base_metric: u32,
    pub base_time_secs: Option<u32>,
    pub xp_reward: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeStatus {
    NotAttempted,
    /// Submitted without a measured result
    Attempted,
    /// Measured result below the adjusted target
    Failed,
    Completed,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::NotAttempted => "NOT_ATTEMPTED",
            ChallengeStatus::Attempted => "ATTEMPTED",
            ChallengeStatus::Failed => "FAILED",
            ChallengeStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_ATTEMPTED" => Some(ChallengeStatus::NotAttempted),
            "ATTEMPTED" => Some(ChallengeStatus::Attempted),
            "FAILED" => Some(ChallengeStatus::Failed),
            "COMPLETED" => Some(ChallengeStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeProgress {
    pub enrollment_id: String,
    pub challenge_id: String,
    pub status: ChallengeStatus,
    pub attempts: u32,
    pub actual_metric: Option<u32>,
    pub actual_time_secs: Option<u32>,
    pub best_metric: Option<u32>,
    pub adjusted_metric: u32,
    pub adjusted_time_secs: Option<u32>,
    /// Credited at most once, on the first completion
    pub xp_earned: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub validated_by: Option<String>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Judgement of a single submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptVerdict {
    pub adjusted_metric: u32,
    pub adjusted_time_secs: Option<u32>,
    pub passed_metric: bool,
    pub passed_time: bool,
    pub completed: bool,
}

/// Judge an attempt against the challenge scaled to `profile`.
///
/// The metric passes when reported and at least the adjusted target. The
/// time passes when either side is absent or the reported time is within
/// the adjusted limit.
pub fn evaluate_attempt(
    table: &MultiplierTable,
    profile: &AdjustmentProfile,
    challenge: &CourseChallenge,
    actual_metric: Option<u32>,
    actual_time_secs: Option<u32>,
) -> AttemptVerdict {
    let adjusted_metric = table.adjust(profile, challenge.base_metric);
    let adjusted_time_secs = challenge.base_time_secs.map(|t| table.adjust(profile, t));

    let passed_metric = matches!(actual_metric, Some(m) if m >= adjusted_metric);
    let passed_time = match (actual_time_secs, adjusted_time_secs) {
        (Some(actual), Some(limit)) => actual <= limit,
        _ => true,
    };

    AttemptVerdict {
        adjusted_metric,
        adjusted_time_secs,
        passed_metric,
        passed_time,
        completed: passed_metric && passed_time,
    }
}

impl ChallengeProgress {
    pub fn new(
        enrollment_id: impl Into<String>,
        challenge_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            enrollment_id: enrollment_id.into(),
            challenge_id: challenge_id.into(),
            status: ChallengeStatus::NotAttempted,
            attempts: 0,
            actual_metric: None,
            actual_time_secs: None,
            best_metric: None,
            adjusted_metric: 0,
            adjusted_time_secs: None,
            xp_earned: 0,
            completed_at: None,
            validated_by: None,
            notes: None,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ChallengeStatus::Completed
    }

    /// Record a judged submission. Returns true only on the first
    /// transition into `Completed`.
    pub fn record_attempt(
        &mut self,
        verdict: &AttemptVerdict,
        actual_metric: Option<u32>,
        actual_time_secs: Option<u32>,
        now: DateTime<Utc>,
    ) -> bool {
        self.attempts += 1;
        self.actual_metric = actual_metric;
        self.actual_time_secs = actual_time_secs;
        self.best_metric = match (self.best_metric, actual_metric) {
            (Some(best), Some(m)) => Some(best.max(m)),
            (None, m) => m,
            (best, None) => best,
        };
        self.adjusted_metric = verdict.adjusted_metric;
        self.adjusted_time_secs = verdict.adjusted_time_secs;
        self.updated_at = now;

        if self.is_completed() {
            return false;
        }
        if verdict.completed {
            self.mark_completed(now);
            return true;
        }
        self.status = if actual_metric.is_some() {
            ChallengeStatus::Failed
        } else {
            ChallengeStatus::Attempted
        };
        false
    }

    /// Instructor-approved completion. Returns true only on the first
    /// transition into `Completed`.
    pub fn approve(&mut self, instructor: &str, notes: Option<String>, now: DateTime<Utc>) -> bool {
        self.validated_by = Some(instructor.to_string());
        if notes.is_some() {
            self.notes = notes;
        }
        self.updated_at = now;
        if self.is_completed() {
            return false;
        }
        self.mark_completed(now);
        true
    }

    fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = ChallengeStatus::Completed;
        self.completed_at = Some(now);
    }

    /// Percent of the adjusted target reached by the best metric.
    pub fn progress_percent(&self) -> f64 {
        if self.is_completed() {
            return 100.0;
        }
        match self.best_metric {
            Some(best) if self.adjusted_metric > 0 => {
                (best as f64 / self.adjusted_metric as f64 * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }
}

// =====================================================
// Weekly statistics & ranking
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyChallengeStats {
    pub challenge_id: String,
    pub attempted: usize,
    pub completed: usize,
    pub completion_rate: f64,
    pub average_metric: Option<f64>,
}

pub fn weekly_stats(challenge_id: &str, progress: &[ChallengeProgress]) -> WeeklyChallengeStats {
    let attempted: Vec<&ChallengeProgress> = progress
        .iter()
        .filter(|p| p.challenge_id == challenge_id && p.status != ChallengeStatus::NotAttempted)
        .collect();
    let completed = attempted.iter().filter(|p| p.is_completed()).count();
    let metrics: Vec<u32> = attempted.iter().filter_map(|p| p.best_metric).collect();
    let average_metric = if metrics.is_empty() {
        None
    } else {
        Some(metrics.iter().map(|&m| m as f64).sum::<f64>() / metrics.len() as f64)
    };
    WeeklyChallengeStats {
        challenge_id: challenge_id.to_string(),
        attempted: attempted.len(),
        completion_rate: if attempted.is_empty() {
            0.0
        } else {
            completed as f64 / attempted.len() as f64
        },
        completed,
        average_metric,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeRanking {
    /// Highest best metric first
    Metric,
    /// Fastest time first
    Time,
}

/// Completed attempts ranked by metric or time; ties go to the earlier
/// completion.
pub fn rank_completed<'a>(
    progress: &'a [ChallengeProgress],
    ranking: ChallengeRanking,
    limit: usize,
) -> Vec<&'a ChallengeProgress> {
    let mut done: Vec<&ChallengeProgress> = progress
        .iter()
        .filter(|p| p.is_completed())
        .filter(|p| ranking == ChallengeRanking::Metric || p.actual_time_secs.is_some())
        .collect();
    done.sort_by(|a, b| {
        let primary = match ranking {
            ChallengeRanking::Metric => b.best_metric.cmp(&a.best_metric),
            ChallengeRanking::Time => a.actual_time_secs.cmp(&b.actual_time_secs),
        };
        primary
            .then(a.completed_at.cmp(&b.completed_at))
            .then(a.enrollment_id.cmp(&b.enrollment_id))
    });
    done.truncate(limit);
    done
}

// =====================================================
// Template
// =====================================================

/// One week of the standard 24-week programme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeTemplate {
    pub week: u32,
    pub kind: ChallengeKind,
    pub activity: &'static str,
    pub base_metric: u32,
    pub base_time_secs: Option<u32>,
    pub xp_reward: i64,
    pub description: &'static str,
}

const fn week(
    week: u32,
    kind: ChallengeKind,
    activity: &'static str,
    base_metric: u32,
    base_time_secs: Option<u32>,
    xp_reward: i64,
    description: &'static str,
) -> ChallengeTemplate {
    ChallengeTemplate {
        week,
        kind,
        activity,
        base_metric,
        base_time_secs,
        xp_reward,
        description,
    }
}

use ChallengeKind::{Attendance, Custom, Fitness, Streak, Technique};

pub const WEEKLY_TEMPLATE: [ChallengeTemplate; 24] = [
    // Weeks 1-6: foundations
    week(1, Fitness, "30 Push-ups", 30, None, 15, "Complete 30 push-ups to build upper body strength"),
    week(2, Technique, "50 Straight Punches", 50, Some(120), 20, "Execute 50 straight punches in 2 minutes"),
    week(3, Fitness, "2-minute Plank Hold", 120, None, 25, "Hold a plank position for 2 minutes"),
    week(4, Technique, "100 Knee Strikes", 100, Some(180), 20, "Execute 100 knee strikes in 3 minutes"),
    week(5, Fitness, "50 Burpees", 50, Some(300), 30, "Complete 50 burpees in 5 minutes"),
    week(6, Attendance, "5 Classes This Week", 5, None, 35, "Attend 5 classes this week"),
    // Weeks 7-12: skill development
    week(7, Technique, "200 Palm Strikes", 200, Some(300), 25, "Execute 200 palm strikes in 5 minutes"),
    week(8, Fitness, "100 Mountain Climbers", 100, Some(180), 20, "Complete 100 mountain climbers in 3 minutes"),
    week(9, Technique, "150 Elbow Strikes", 150, Some(240), 25, "Execute 150 elbow strikes in 4 minutes"),
    week(10, Fitness, "3-minute Wall Sit", 180, None, 30, "Hold a wall sit for 3 minutes"),
    week(11, Technique, "75 Front Kicks", 75, Some(300), 25, "Execute 75 front kicks in 5 minutes"),
    week(12, Streak, "6-day Training Streak", 6, None, 40, "Train for 6 consecutive days"),
    // Weeks 13-18: combat applications
    week(13, Technique, "100 Hammer Fists", 100, Some(180), 25, "Execute 100 hammer fist strikes in 3 minutes"),
    week(14, Fitness, "200 Jump Squats", 200, Some(360), 35, "Complete 200 jump squats in 6 minutes"),
    week(15, Technique, "50 Side Kicks", 50, Some(240), 30, "Execute 50 side kicks in 4 minutes"),
    week(16, Fitness, "500m Sprint", 500, Some(150), 35, "Run 500 meters in under 2:30 minutes"),
    week(17, Technique, "100 Roundhouse Kicks", 100, Some(360), 30, "Execute 100 roundhouse kicks in 6 minutes"),
    week(18, Attendance, "100% Weekly Attendance", 100, None, 50, "Attend all scheduled classes this week"),
    // Weeks 19-24: advanced conditioning
    week(19, Fitness, "300 Sit-ups", 300, Some(600), 40, "Complete 300 sit-ups in 10 minutes"),
    week(20, Technique, "200 Uppercuts", 200, Some(300), 35, "Execute 200 uppercuts in 5 minutes"),
    week(21, Fitness, "5-minute Cardio Circuit", 300, Some(300), 45, "Complete 300 seconds of high-intensity cardio"),
    week(22, Technique, "150 Hook Punches", 150, Some(240), 35, "Execute 150 hook punches in 4 minutes"),
    week(23, Fitness, "100 Pull-ups/Assisted", 100, Some(600), 50, "Complete 100 pull-ups (assisted allowed) in 10 minutes"),
    week(24, Custom, "Master Challenge", 1, None, 100, "Complete the final master challenge designed by your instructor"),
];

/// Challenges for a course built from the template, truncated to the
/// course's duration.
pub fn challenges_from_template(course_id: &str, duration_weeks: u32) -> Vec<CourseChallenge> {
    WEEKLY_TEMPLATE
        .iter()
        .filter(|t| t.week <= duration_weeks)
        .map(|t| CourseChallenge {
            id: format!("{}:week-{}", course_id, t.week),
            course_id: course_id.to_string(),
            week_number: t.week,
            kind: t.kind,
            activity: t.activity.to_string(),
            description: t.description.to_string(),
            base_metric: t.base_metric,
            base_time_secs: t.base_time_secs,
            xp_reward: t.xp_reward,
        })
        .collect()
}

/// 1-based course week for `now`, clamped to the course length.
pub fn course_week(starts_at: DateTime<Utc>, now: DateTime<Utc>, duration_weeks: u32) -> u32 {
    let week = crate::course::weeks_between(starts_at, now) + 1;
    week.clamp(1, duration_weeks.max(1))
}
