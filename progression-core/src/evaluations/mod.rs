//! Checkpoint evaluations (mini-tests and the final exam).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled evaluation at a given lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCheckpoint {
    pub lesson: u32,
    pub name: String,
    pub passing_score: f64,
    pub base_xp: i64,
}

pub fn default_schedule() -> Vec<EvaluationCheckpoint> {
    [
        (8, "Mini-Test 1", 70.0, 100),
        (16, "Mini-Test 2", 75.0, 150),
        (24, "Mini-Test 3", 75.0, 200),
        (32, "Mini-Test 4", 80.0, 250),
        (40, "Mini-Test 5", 80.0, 300),
        (48, "Final Exam", 85.0, 500),
    ]
    .into_iter()
    .map(|(lesson, name, passing_score, base_xp)| EvaluationCheckpoint {
        lesson,
        name: name.to_string(),
        passing_score,
        base_xp,
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueResult {
    pub technique_id: String,
    pub accuracy: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalTest {
    pub name: String,
    pub completed: u32,
    pub target: u32,
    pub time_secs: Option<u32>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub enrollment_id: String,
    pub lesson: u32,
    pub technique_results: Vec<TechniqueResult>,
    pub physical_test: Option<PhysicalTest>,
    pub overall_score: f64,
    pub passed: bool,
    pub notes: Option<String>,
    pub evaluator_id: String,
    pub evaluated_at: DateTime<Utc>,
}

/// XP policy for an evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationXpPolicy {
    pub reference_score: f64,
    /// Extra XP for every 5 points above the reference score
    pub step_xp: i64,
    pub pass_bonus: i64,
    pub minimum: i64,
}

impl Default for EvaluationXpPolicy {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            reference_score: EVALUATION_REFERENCE_SCORE,
            step_xp: EVALUATION_STEP_XP,
            pass_bonus: EVALUATION_PASS_BONUS_XP,
            minimum: EVALUATION_MIN_XP,
        }
    }
}

impl EvaluationXpPolicy {
    /// `max(base + step × floor((score − reference) / 5) + pass bonus, minimum)`
    pub fn xp_for(&self, base_xp: i64, score: f64, passed: bool) -> i64 {
        let steps = ((score - self.reference_score) / 5.0).floor().max(0.0) as i64;
        let bonus = if passed { self.pass_bonus } else { 0 };
        (base_xp + steps * self.step_xp + bonus).max(self.minimum)
    }
}

/// The checkpoint whose lesson matches, if any.
pub fn checkpoint_for(schedule: &[EvaluationCheckpoint], lesson: u32) -> Option<&EvaluationCheckpoint> {
    schedule.iter().find(|c| c.lesson == lesson)
}

/// First checkpoint not yet passed.
pub fn next_evaluation<'a>(
    schedule: &'a [EvaluationCheckpoint],
    taken: &[Evaluation],
) -> Option<&'a EvaluationCheckpoint> {
    let mut ordered: Vec<&EvaluationCheckpoint> = schedule.iter().collect();
    ordered.sort_by_key(|c| c.lesson);
    ordered
        .into_iter()
        .find(|c| !taken.iter().any(|e| e.lesson == c.lesson && e.passed))
}

/// One independent requirement with its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementCheck {
    pub name: String,
    pub met: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReadiness {
    pub checkpoint: Option<EvaluationCheckpoint>,
    pub checks: Vec<RequirementCheck>,
}

impl EvaluationReadiness {
    pub fn can_take(&self) -> bool {
        self.checkpoint.is_some() && self.checks.iter().all(|c| c.met)
    }

    pub fn missing(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.met)
            .map(|c| c.detail.as_str())
            .collect()
    }
}

/// Requirements for sitting `checkpoint`.
pub fn readiness(
    checkpoint: Option<&EvaluationCheckpoint>,
    attendance_rate: f64,
    min_attendance: f64,
    proficient_techniques: usize,
    required_techniques: usize,
    min_coverage: f64,
    lessons_completed: u32,
) -> EvaluationReadiness {
    let needed_techniques = (required_techniques as f64 * min_coverage).floor() as usize;
    let mut checks = vec![
        RequirementCheck {
            name: "attendance".into(),
            met: attendance_rate >= min_attendance,
            detail: format!(
                "attendance {:.0}% (minimum {:.0}%)",
                attendance_rate * 100.0,
                min_attendance * 100.0
            ),
        },
        RequirementCheck {
            name: "techniques".into(),
            met: proficient_techniques >= needed_techniques,
            detail: format!(
                "{} proficient techniques (minimum {})",
                proficient_techniques, needed_techniques
            ),
        },
    ];
    if let Some(c) = checkpoint {
        checks.push(RequirementCheck {
            name: "lessons".into(),
            met: lessons_completed >= c.lesson,
            detail: format!("{} lessons completed (needs {})", lessons_completed, c.lesson),
        });
    }
    EvaluationReadiness {
        checkpoint: checkpoint.cloned(),
        checks,
    }
}
