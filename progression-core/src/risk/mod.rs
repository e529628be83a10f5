//! Dropout-Risk Estimator
//!
//! Scores how likely a student is to stop training from four signals:
//! attendance rate, attendance cadence, progression velocity and challenge
//! participation. Every threshold and point value lives in `RiskPolicy`.
//!
//! The estimate is read-only and never fails for thin histories; it lowers
//! its confidence instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attendance::average_interval_days;
use crate::constants::{
    RISK_FULL_CONFIDENCE_CHECK_INS, RISK_HIGH_BELOW, RISK_LOW_BELOW, RISK_MEDIUM_BELOW,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// `points` are added when the measured value is below `below`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBand {
    pub below: f64,
    pub points: u32,
}

/// Cadence band: triggers past `days` since the last check-in, or when the
/// gap is `ratio` times the student's usual interval (and at least
/// `min_gap_days`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadenceBand {
    pub days: i64,
    pub ratio: f64,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Most severe band first
    pub attendance: Vec<ScoreBand>,
    pub cadence: Vec<CadenceBand>,
    pub cadence_min_gap_days: i64,
    pub never_attended_points: u32,
    pub velocity: Vec<ScoreBand>,
    pub challenges: Vec<ScoreBand>,
    pub low_below: u32,
    pub medium_below: u32,
    pub high_below: u32,
    pub full_confidence_check_ins: usize,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            attendance: vec![
                ScoreBand {
                    below: 0.5,
                    points: 40,
                },
                ScoreBand {
                    below: 0.7,
                    points: 25,
                },
            ],
            cadence: vec![
                CadenceBand {
                    days: 14,
                    ratio: 3.0,
                    points: 25,
                },
                CadenceBand {
                    days: 7,
                    ratio: 1.5,
                    points: 15,
                },
            ],
            cadence_min_gap_days: 3,
            never_attended_points: 30,
            velocity: vec![
                ScoreBand {
                    below: 0.3,
                    points: 20,
                },
                ScoreBand {
                    below: 0.6,
                    points: 10,
                },
            ],
            challenges: vec![ScoreBand {
                below: 0.3,
                points: 15,
            }],
            low_below: RISK_LOW_BELOW,
            medium_below: RISK_MEDIUM_BELOW,
            high_below: RISK_HIGH_BELOW,
            full_confidence_check_ins: RISK_FULL_CONFIDENCE_CHECK_INS,
        }
    }
}

impl RiskPolicy {
    pub fn level_for(&self, score: u32) -> RiskLevel {
        if score < self.low_below {
            RiskLevel::Low
        } else if score < self.medium_below {
            RiskLevel::Medium
        } else if score < self.high_below {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

fn band_points(bands: &[ScoreBand], value: f64) -> u32 {
    bands
        .iter()
        .find(|b| value < b.below)
        .map(|b| b.points)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskFactorKind {
    AttendanceRate,
    AttendanceCadence,
    NeverAttended,
    ProgressionVelocity,
    ChallengeParticipation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: RiskFactorKind,
    pub points: u32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub student_id: String,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
}

/// Signals gathered by the engine for one student.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskInputs {
    pub student_id: String,
    pub check_ins: Vec<DateTime<Utc>>,
    /// None when the student has no active enrollment
    pub attendance_rate: Option<f64>,
    /// Lessons per elapsed week divided by the course's weekly pace
    pub velocity_ratio: Option<f64>,
    pub challenges_completed: usize,
    pub challenges_available: usize,
    pub now: DateTime<Utc>,
}

pub fn estimate(policy: &RiskPolicy, inputs: &RiskInputs) -> RiskAssessment {
    let mut factors = Vec::new();
    let mut recommendations = Vec::new();

    if let Some(rate) = inputs.attendance_rate {
        let points = band_points(&policy.attendance, rate);
        if points > 0 {
            factors.push(RiskFactor {
                kind: RiskFactorKind::AttendanceRate,
                points,
                detail: format!("attendance rate {:.0}%", rate * 100.0),
            });
            recommendations.push("Reach out about class attendance".to_string());
        }
    }

    match inputs.check_ins.iter().max() {
        None => {
            factors.push(RiskFactor {
                kind: RiskFactorKind::NeverAttended,
                points: policy.never_attended_points,
                detail: "no check-ins recorded".into(),
            });
            recommendations.push("Welcome call to schedule a first class".to_string());
        }
        Some(&last) => {
            let gap_days = (inputs.now - last).num_days().max(0);
            let usual = average_interval_days(&inputs.check_ins);
            let relative = usual.filter(|u| *u > 0.0).map(|u| gap_days as f64 / u);
            let hit = policy.cadence.iter().find(|band| {
                gap_days > band.days
                    || (gap_days >= policy.cadence_min_gap_days
                        && relative.is_some_and(|r| r >= band.ratio))
            });
            if let Some(band) = hit {
                factors.push(RiskFactor {
                    kind: RiskFactorKind::AttendanceCadence,
                    points: band.points,
                    detail: match usual {
                        Some(u) => format!(
                            "{} days since last check-in (usual interval {:.1} days)",
                            gap_days, u
                        ),
                        None => format!("{} days since last check-in", gap_days),
                    },
                });
                recommendations.push("Check in with the student personally".to_string());
            }
        }
    }

    if let Some(ratio) = inputs.velocity_ratio {
        let points = band_points(&policy.velocity, ratio);
        if points > 0 {
            factors.push(RiskFactor {
                kind: RiskFactorKind::ProgressionVelocity,
                points,
                detail: format!("progressing at {:.0}% of course pace", ratio * 100.0),
            });
            recommendations.push("Offer extra practice or private sessions".to_string());
        }
    }

    if inputs.challenges_available > 0 {
        let ratio = inputs.challenges_completed as f64 / inputs.challenges_available as f64;
        let points = band_points(&policy.challenges, ratio);
        if points > 0 {
            factors.push(RiskFactor {
                kind: RiskFactorKind::ChallengeParticipation,
                points,
                detail: format!(
                    "{} of {} challenges completed",
                    inputs.challenges_completed, inputs.challenges_available
                ),
            });
            recommendations.push("Encourage participation in weekly challenges".to_string());
        }
    }

    let risk_score = factors.iter().map(|f| f.points).sum::<u32>().min(100);
    let risk_level = policy.level_for(risk_score);
    if risk_level >= RiskLevel::High {
        recommendations.push("Schedule a meeting with the student".to_string());
        recommendations.push("Review the student's goals and motivation".to_string());
    }

    RiskAssessment {
        student_id: inputs.student_id.clone(),
        risk_score,
        risk_level,
        factors,
        recommendations,
        confidence: confidence(policy, inputs),
    }
}

fn confidence(policy: &RiskPolicy, inputs: &RiskInputs) -> f64 {
    let n = inputs.check_ins.len();
    let base = if n < 2 {
        0.25
    } else {
        let full = policy.full_confidence_check_ins.max(1) as f64;
        0.3 + 0.7 * (n as f64 / full).min(1.0)
    };
    let penalty = if inputs.attendance_rate.is_none() {
        0.2
    } else {
        0.0
    };
    (base - penalty).clamp(0.05, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    fn inputs(check_ins: Vec<DateTime<Utc>>) -> RiskInputs {
        RiskInputs {
            student_id: "s1".into(),
            check_ins,
            attendance_rate: Some(0.9),
            velocity_ratio: Some(1.0),
            challenges_completed: 5,
            challenges_available: 10,
            now: now(),
        }
    }

    fn every_other_day(count: i64, ending_days_ago: i64) -> Vec<DateTime<Utc>> {
        (0..count)
            .map(|i| now() - Duration::days(ending_days_ago + 2 * i))
            .collect()
    }

    #[test]
    fn test_healthy_student_is_low() {
        let a = estimate(&RiskPolicy::default(), &inputs(every_other_day(12, 1)));
        assert_eq!(a.risk_score, 0);
        assert_eq!(a.risk_level, RiskLevel::Low);
        assert!(a.factors.is_empty());
        assert!((a.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_never_attended() {
        let mut i = inputs(vec![]);
        i.attendance_rate = Some(0.0);
        let a = estimate(&RiskPolicy::default(), &i);
        // 40 attendance + 30 never attended
        assert_eq!(a.risk_score, 70);
        assert_eq!(a.risk_level, RiskLevel::High);
        assert_eq!(a.confidence, 0.25);
        assert!(a
            .recommendations
            .iter()
            .any(|r| r.contains("Schedule a meeting")));
    }

    #[test]
    fn test_cadence_relative_to_usual_interval() {
        // trains every other day, last seen 6 days ago: 3x usual
        let a = estimate(&RiskPolicy::default(), &inputs(every_other_day(10, 6)));
        let cadence = a
            .factors
            .iter()
            .find(|f| f.kind == RiskFactorKind::AttendanceCadence)
            .unwrap();
        assert_eq!(cadence.points, 25);
    }

    #[test]
    fn test_cadence_absolute_gap() {
        let weekly: Vec<_> = (0..5).map(|i| now() - Duration::days(9 + 7 * i)).collect();
        let a = estimate(&RiskPolicy::default(), &inputs(weekly));
        let cadence = a
            .factors
            .iter()
            .find(|f| f.kind == RiskFactorKind::AttendanceCadence)
            .unwrap();
        assert_eq!(cadence.points, 15);
    }

    #[test]
    fn test_all_factors_critical() {
        let mut i = inputs(every_other_day(3, 20));
        i.attendance_rate = Some(0.3);
        i.velocity_ratio = Some(0.1);
        i.challenges_completed = 0;
        let a = estimate(&RiskPolicy::default(), &i);
        assert_eq!(a.risk_score, 100);
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert_eq!(a.factors.len(), 4);
    }

    #[test]
    fn test_confidence_without_enrollment() {
        let mut i = inputs(every_other_day(5, 1));
        i.attendance_rate = None;
        let a = estimate(&RiskPolicy::default(), &i);
        assert!((a.confidence - (0.3 + 0.7 * 0.5 - 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_level_boundaries() {
        let p = RiskPolicy::default();
        assert_eq!(p.level_for(24), RiskLevel::Low);
        assert_eq!(p.level_for(25), RiskLevel::Medium);
        assert_eq!(p.level_for(50), RiskLevel::High);
        assert_eq!(p.level_for(75), RiskLevel::Critical);
    }
}
