//! Check-in rewards, streaks and attendance arithmetic.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    CHECK_IN_BASE_XP, CHECK_IN_TECHNIQUE_XP, FIRST_OF_MONTH_BONUS_XP, STREAK_GRACE_DAYS,
    STREAK_MULTIPLIERS,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreakTier {
    pub min_days: u32,
    pub multiplier: f64,
}

/// XP awarded for attending a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInPolicy {
    pub base_xp: i64,
    pub technique_xp: i64,
    pub first_of_month_bonus: i64,
    pub streak_tiers: Vec<StreakTier>,
    /// Largest gap in days that keeps a streak alive
    pub grace_days: i64,
}

impl Default for CheckInPolicy {
    fn default() -> Self {
        Self {
            base_xp: CHECK_IN_BASE_XP,
            technique_xp: CHECK_IN_TECHNIQUE_XP,
            first_of_month_bonus: FIRST_OF_MONTH_BONUS_XP,
            streak_tiers: STREAK_MULTIPLIERS
                .iter()
                .map(|&(min_days, multiplier)| StreakTier {
                    min_days,
                    multiplier,
                })
                .collect(),
            grace_days: STREAK_GRACE_DAYS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInXp {
    pub base: i64,
    pub techniques: i64,
    pub first_of_month: i64,
    pub total: i64,
}

impl CheckInPolicy {
    /// Highest tier multiplier whose threshold the streak reaches.
    pub fn streak_multiplier(&self, streak: u32) -> f64 {
        self.streak_tiers
            .iter()
            .filter(|t| streak >= t.min_days)
            .map(|t| t.multiplier)
            .fold(1.0, f64::max)
    }

    pub fn xp(&self, streak: u32, techniques_practiced: usize, first_of_month: bool) -> CheckInXp {
        let base = (self.base_xp as f64 * self.streak_multiplier(streak)).floor() as i64;
        let techniques = techniques_practiced as i64 * self.technique_xp;
        let first_of_month = if first_of_month {
            self.first_of_month_bonus
        } else {
            0
        };
        CheckInXp {
            base,
            techniques,
            first_of_month,
            total: base + techniques + first_of_month,
        }
    }
}

/// Streak after a check-in at `now`: same day keeps it, a gap within the
/// grace period extends it, anything longer restarts at 1.
pub fn next_streak(
    last_check_in: Option<DateTime<Utc>>,
    current: u32,
    now: DateTime<Utc>,
    grace_days: i64,
) -> u32 {
    let Some(last) = last_check_in else {
        return 1;
    };
    let gap = (now.date_naive() - last.date_naive()).num_days();
    match gap {
        g if g <= 0 => current.max(1),
        g if g <= grace_days => current + 1,
        _ => 1,
    }
}

fn distinct_days(times: &[DateTime<Utc>]) -> Vec<NaiveDate> {
    let mut days: Vec<NaiveDate> = times.iter().map(|t| t.date_naive()).collect();
    days.sort();
    days.dedup();
    days
}

/// Longest run of consecutive calendar days with at least one check-in.
pub fn longest_day_run(times: &[DateTime<Utc>]) -> u32 {
    let days = distinct_days(times);
    let mut best = 0u32;
    let mut run = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for day in days {
        run = match prev {
            Some(p) if (day - p).num_days() == 1 => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(day);
    }
    best
}

/// True when no earlier check-in falls in the same calendar month as `now`.
pub fn is_first_of_month(previous: &[DateTime<Utc>], now: DateTime<Utc>) -> bool {
    !previous
        .iter()
        .any(|t| t.year() == now.year() && t.month() == now.month() && *t < now)
}

pub fn classes_in_month(times: &[DateTime<Utc>], now: DateTime<Utc>) -> u32 {
    times
        .iter()
        .filter(|t| t.year() == now.year() && t.month() == now.month())
        .count() as u32
}

pub fn days_in_month(at: DateTime<Utc>) -> u32 {
    let (year, month) = (at.year(), at.month());
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        _ => 30,
    }
}

/// Check-ins per starting hour (UTC).
pub fn hour_histogram(times: &[DateTime<Utc>]) -> Vec<u32> {
    let mut hours = vec![0u32; 24];
    for t in times {
        hours[t.hour() as usize] += 1;
    }
    hours
}

/// Attended over expected, capped at 1.0. No expectation means 0.
pub fn attendance_rate(attended: u32, expected: u32) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    (attended as f64 / expected as f64).min(1.0)
}

/// Mean gap in days between consecutive check-ins, if at least two exist.
pub fn average_interval_days(times: &[DateTime<Utc>]) -> Option<f64> {
    if times.len() < 2 {
        return None;
    }
    let mut sorted = times.to_vec();
    sorted.sort();
    let total: i64 = sorted.windows(2).map(|w| (w[1] - w[0]).num_seconds()).sum();
    Some(total as f64 / (sorted.len() - 1) as f64 / 86_400.0)
}
