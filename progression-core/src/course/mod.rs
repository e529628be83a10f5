//! Course definitions and schedule arithmetic.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub total_lessons: u32,
    pub duration_weeks: u32,
    pub classes_per_week: u32,
    /// Techniques a student must be proficient in before a belt change
    pub required_techniques: Vec<String>,
    pub starts_at: DateTime<Utc>,
}

impl Course {
    /// Lessons the course schedules per week (at least a fraction above zero).
    pub fn weekly_pace(&self) -> f64 {
        if self.duration_weeks == 0 {
            return self.total_lessons as f64;
        }
        self.total_lessons as f64 / self.duration_weeks as f64
    }

    /// Classes a student enrolled at `enrolled_at` could have attended by
    /// `now`, counting the current week.
    pub fn expected_classes(&self, enrolled_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        let weeks = weeks_between(enrolled_at, now);
        (weeks + 1) * self.classes_per_week.max(1)
    }

    pub fn expected_end(&self, enrolled_at: DateTime<Utc>) -> DateTime<Utc> {
        enrolled_at + Duration::weeks(self.duration_weeks as i64)
    }
}

/// Whole weeks elapsed from `from` to `to`, zero when `to` is earlier.
pub fn weeks_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let days = (to - from).num_days();
    if days <= 0 {
        0
    } else {
        (days / 7) as u32
    }
}

/// Whole calendar-ish months elapsed, counted in 30-day blocks.
pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let days = (to - from).num_days();
    if days <= 0 {
        0
    } else {
        (days / 30) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn course() -> Course {
        Course {
            id: "c1".into(),
            organization_id: "org".into(),
            name: "Krav Maga Foundations".into(),
            total_lessons: 48,
            duration_weeks: 24,
            classes_per_week: 2,
            required_techniques: vec!["t1".into(), "t2".into()],
            starts_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_expected_classes_counts_current_week() {
        let c = course();
        let start = c.starts_at;
        assert_eq!(c.expected_classes(start, start), 2);
        assert_eq!(c.expected_classes(start, start + Duration::days(13)), 4);
        assert_eq!(c.expected_classes(start, start + Duration::days(14)), 6);
    }

    #[test]
    fn test_weekly_pace() {
        assert!((course().weekly_pace() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_spans_clamp_to_zero() {
        let c = course();
        assert_eq!(weeks_between(c.starts_at, c.starts_at - Duration::days(30)), 0);
        assert_eq!(months_between(c.starts_at, c.starts_at + Duration::days(95)), 3);
    }
}
