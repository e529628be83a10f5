//! Belt Degrees & Graduation
//!
//! A course is split into degree blocks of `ceil(total × step% / 100)`
//! lessons (at least one). Four degrees precede a belt change. Degree
//! records are append-only: degree N needs degree N−1 and is recorded at
//! most once. A belt change only ever happens through an explicit
//! instructor approval, which produces a `GraduationRecord`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEGREE_STEP_PERCENT, MAX_DEGREE, MIN_ATTENDANCE_RATE, MIN_MONTHS_ENROLLED,
    MIN_TECHNIQUE_COVERAGE,
};
use crate::course::{months_between, weeks_between, Course};
use crate::student::CourseEnrollment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduationPolicy {
    pub degree_step_percent: u32,
    pub max_degree: u8,
    pub min_attendance_rate: f64,
    pub min_technique_coverage: f64,
    pub min_months_enrolled: u32,
}

impl Default for GraduationPolicy {
    fn default() -> Self {
        Self {
            degree_step_percent: DEGREE_STEP_PERCENT,
            max_degree: MAX_DEGREE,
            min_attendance_rate: MIN_ATTENDANCE_RATE,
            min_technique_coverage: MIN_TECHNIQUE_COVERAGE,
            min_months_enrolled: MIN_MONTHS_ENROLLED,
        }
    }
}

pub fn lessons_per_degree(total_lessons: u32, step_percent: u32) -> u32 {
    let scaled = total_lessons as u64 * step_percent as u64;
    (scaled.div_ceil(100) as u32).max(1)
}

pub fn computed_degree(completed: u32, lessons_per_degree: u32, max_degree: u8) -> u8 {
    let earned = completed / lessons_per_degree.max(1);
    earned.min(max_degree as u32) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegreeRecord {
    pub student_id: String,
    pub course_id: String,
    pub degree: u8,
    pub achieved_at: DateTime<Utc>,
    pub lessons_completed: u32,
    pub progress_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduationRecord {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub from_belt: String,
    pub to_belt: String,
    pub approved_by: String,
    pub ceremony_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Whether every eligibility check passed at approval time
    pub was_eligible: bool,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Requirement {
    ActiveEnrollment,
    AllDegrees,
    Attendance,
    TechniqueCoverage,
    TimeEnrolled,
    NoDisciplinaryHolds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityCheck {
    pub requirement: Requirement,
    pub met: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionSnapshot {
    pub student_id: String,
    pub course_id: String,
    pub enrollment_id: String,
    pub current_belt: String,
    pub total_lessons: u32,
    pub completed_lessons: u32,
    pub progress_percent: f64,
    pub lessons_per_degree: u32,
    pub current_degree: u8,
    pub next_degree: Option<u8>,
    pub percent_toward_next_degree: f64,
    pub lessons_for_next_degree: u32,
    pub recorded_degrees: Vec<DegreeRecord>,
    pub is_eligible_for_belt_change: bool,
    pub eligibility: Vec<EligibilityCheck>,
}

impl ProgressionSnapshot {
    pub fn failed_checks(&self) -> impl Iterator<Item = &EligibilityCheck> {
        self.eligibility.iter().filter(|c| !c.met)
    }
}

/// Everything the snapshot needs that the engine looks up.
#[derive(Debug, Clone)]
pub struct ProgressionInputs<'a> {
    pub enrollment: &'a CourseEnrollment,
    pub course: &'a Course,
    pub attendance_rate: f64,
    pub technique_coverage: f64,
    pub recorded_degrees: Vec<DegreeRecord>,
    pub now: DateTime<Utc>,
}

pub fn snapshot(policy: &GraduationPolicy, inputs: ProgressionInputs<'_>) -> ProgressionSnapshot {
    let ProgressionInputs {
        enrollment,
        course,
        attendance_rate,
        technique_coverage,
        mut recorded_degrees,
        now,
    } = inputs;

    let total = course.total_lessons;
    let completed = enrollment.lessons_completed;
    let progress_percent = if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    };

    let lpd = lessons_per_degree(total, policy.degree_step_percent);
    let degree = computed_degree(completed, lpd, policy.max_degree);
    let (next_degree, percent_toward_next, lessons_for_next) = if degree < policy.max_degree {
        let into_block = completed - degree as u32 * lpd;
        let next_at = (degree as u32 + 1) * lpd;
        (
            Some(degree + 1),
            into_block as f64 / lpd as f64 * 100.0,
            next_at - completed,
        )
    } else {
        (None, 100.0, 0)
    };

    recorded_degrees.sort_by_key(|d| d.degree);

    let months = months_between(enrollment.enrolled_at, now);
    let eligibility = vec![
        EligibilityCheck {
            requirement: Requirement::ActiveEnrollment,
            met: enrollment.is_active(),
            reason: format!("enrollment is {}", enrollment.status.as_str().to_lowercase()),
        },
        EligibilityCheck {
            requirement: Requirement::AllDegrees,
            met: degree >= policy.max_degree,
            reason: format!("degree {} of {}", degree, policy.max_degree),
        },
        EligibilityCheck {
            requirement: Requirement::Attendance,
            met: attendance_rate >= policy.min_attendance_rate,
            reason: format!(
                "attendance {:.0}% (minimum {:.0}%)",
                attendance_rate * 100.0,
                policy.min_attendance_rate * 100.0
            ),
        },
        EligibilityCheck {
            requirement: Requirement::TechniqueCoverage,
            met: technique_coverage >= policy.min_technique_coverage,
            reason: format!(
                "{:.0}% of required techniques proficient (minimum {:.0}%)",
                technique_coverage * 100.0,
                policy.min_technique_coverage * 100.0
            ),
        },
        EligibilityCheck {
            requirement: Requirement::TimeEnrolled,
            met: months >= policy.min_months_enrolled,
            reason: format!(
                "{} months enrolled (minimum {})",
                months, policy.min_months_enrolled
            ),
        },
        EligibilityCheck {
            requirement: Requirement::NoDisciplinaryHolds,
            met: enrollment.disciplinary_holds.is_empty(),
            reason: if enrollment.disciplinary_holds.is_empty() {
                "no pending holds".to_string()
            } else {
                format!("pending holds: {}", enrollment.disciplinary_holds.join(", "))
            },
        },
    ];
    let eligible = eligibility.iter().all(|c| c.met);

    ProgressionSnapshot {
        student_id: enrollment.student_id.clone(),
        course_id: course.id.clone(),
        enrollment_id: enrollment.id.clone(),
        current_belt: enrollment.current_belt.clone(),
        total_lessons: total,
        completed_lessons: completed,
        progress_percent,
        lessons_per_degree: lpd,
        current_degree: degree,
        next_degree,
        percent_toward_next_degree: percent_toward_next,
        lessons_for_next_degree: lessons_for_next,
        recorded_degrees,
        is_eligible_for_belt_change: eligible,
        eligibility,
    }
}

/// Why a degree may not be recorded, or `Ok` when it may.
pub fn check_degree_request(
    degree: u8,
    computed: u8,
    recorded: &[DegreeRecord],
    max_degree: u8,
) -> Result<(), String> {
    if degree == 0 || degree > max_degree {
        return Err(format!("degree must be between 1 and {}", max_degree));
    }
    if degree > computed {
        return Err(format!(
            "degree {} not reached yet (current degree {})",
            degree, computed
        ));
    }
    if recorded.iter().any(|r| r.degree == degree) {
        return Err(format!("degree {} already recorded", degree));
    }
    if degree > 1 && !recorded.iter().any(|r| r.degree == degree - 1) {
        return Err(format!("degree {} must be recorded first", degree - 1));
    }
    Ok(())
}

// =====================================================
// Course completion
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionWeights {
    pub attendance: f64,
    pub techniques: f64,
    pub challenges: f64,
    pub evaluations: f64,
}

impl Default for CompletionWeights {
    fn default() -> Self {
        Self {
            attendance: 0.4,
            techniques: 0.3,
            challenges: 0.2,
            evaluations: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseCompletion {
    pub attendance_score: f64,
    pub technique_score: f64,
    pub challenge_score: f64,
    pub evaluation_score: f64,
    /// Weighted total, 0-100
    pub overall_percent: f64,
    pub estimated_completion: Option<DateTime<Utc>>,
}

/// Inputs as ratios in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionInputs {
    pub attendance_rate: f64,
    pub technique_ratio: f64,
    pub challenge_ratio: f64,
    pub evaluation_ratio: f64,
    pub lessons_completed: u32,
    pub total_lessons: u32,
}

pub fn course_completion(
    weights: &CompletionWeights,
    inputs: CompletionInputs,
    enrolled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CourseCompletion {
    let pct = |r: f64| r.clamp(0.0, 1.0) * 100.0;
    let attendance_score = pct(inputs.attendance_rate);
    let technique_score = pct(inputs.technique_ratio);
    let challenge_score = pct(inputs.challenge_ratio);
    let evaluation_score = pct(inputs.evaluation_ratio);
    let overall_percent = attendance_score * weights.attendance
        + technique_score * weights.techniques
        + challenge_score * weights.challenges
        + evaluation_score * weights.evaluations;

    let weeks = weeks_between(enrolled_at, now).max(1) as f64;
    let pace = inputs.lessons_completed as f64 / weeks;
    let remaining = inputs.total_lessons.saturating_sub(inputs.lessons_completed);
    let estimated_completion = if remaining == 0 {
        Some(now)
    } else if pace > 0.0 {
        let weeks_left = remaining as f64 / pace;
        Some(now + Duration::days((weeks_left * 7.0).ceil() as i64))
    } else {
        None
    };

    CourseCompletion {
        attendance_score,
        technique_score,
        challenge_score,
        evaluation_score,
        overall_percent,
        estimated_completion,
    }
}
