//! Personalised next steps for an enrollment.

use serde::{Deserialize, Serialize};

use crate::challenges::{ChallengeProgress, ChallengeStatus, CourseChallenge};
use crate::techniques::{TechniqueProgress, TechniqueStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecommendationKind {
    StrugglingTechnique,
    NextTechnique,
    IncompleteChallenge,
    Attendance,
    Streak,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub title: String,
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationPolicy {
    /// A technique is struggling above this many attempts...
    pub struggling_min_attempts: u32,
    /// ...with accuracy below this
    pub struggling_max_accuracy: f64,
    pub max_struggling: usize,
    pub max_next_techniques: usize,
    pub max_incomplete_challenges: usize,
    pub min_attendance_rate: f64,
    pub min_progress_percent: f64,
}

impl Default for RecommendationPolicy {
    fn default() -> Self {
        Self {
            struggling_min_attempts: 5,
            struggling_max_accuracy: 70.0,
            max_struggling: 3,
            max_next_techniques: 2,
            max_incomplete_challenges: 2,
            min_attendance_rate: 0.8,
            min_progress_percent: 50.0,
        }
    }
}

pub struct RecommendationInputs<'a> {
    pub techniques: &'a [TechniqueProgress],
    pub required_techniques: &'a [String],
    pub challenges: &'a [(CourseChallenge, ChallengeProgress)],
    pub attendance_rate: f64,
    pub current_streak: u32,
    pub progress_percent: f64,
}

pub fn recommend(policy: &RecommendationPolicy, inputs: &RecommendationInputs<'_>) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let mut struggling: Vec<&TechniqueProgress> = inputs
        .techniques
        .iter()
        .filter(|t| {
            t.attempts > policy.struggling_min_attempts
                && t.accuracy < policy.struggling_max_accuracy
                && t.status != TechniqueStatus::Mastered
        })
        .collect();
    struggling.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));
    for t in struggling.iter().take(policy.max_struggling) {
        out.push(Recommendation {
            kind: RecommendationKind::StrugglingTechnique,
            priority: Priority::High,
            title: format!(
                "Review technique {} (accuracy {:.0}%)",
                t.technique_id, t.accuracy
            ),
            reference_id: Some(t.technique_id.clone()),
        });
    }

    let next = inputs
        .required_techniques
        .iter()
        .filter(|id| !struggling.iter().any(|s| &s.technique_id == *id))
        .filter(|id| {
            !inputs
                .techniques
                .iter()
                .any(|t| &t.technique_id == *id && t.status == TechniqueStatus::Mastered)
        })
        .take(policy.max_next_techniques);
    for id in next {
        out.push(Recommendation {
            kind: RecommendationKind::NextTechnique,
            priority: Priority::Medium,
            title: format!("Practice technique {}", id),
            reference_id: Some(id.clone()),
        });
    }

    let incomplete = inputs
        .challenges
        .iter()
        .filter(|(_, p)| matches!(p.status, ChallengeStatus::Attempted | ChallengeStatus::Failed))
        .take(policy.max_incomplete_challenges);
    for (challenge, _) in incomplete {
        out.push(Recommendation {
            kind: RecommendationKind::IncompleteChallenge,
            priority: Priority::High,
            title: format!(
                "Finish week {} challenge: {}",
                challenge.week_number, challenge.activity
            ),
            reference_id: Some(challenge.id.clone()),
        });
    }

    if inputs.attendance_rate < policy.min_attendance_rate {
        out.push(Recommendation {
            kind: RecommendationKind::Attendance,
            priority: Priority::High,
            title: "Attend more classes to stay on track".into(),
            reference_id: None,
        });
    }
    if inputs.current_streak == 0 {
        out.push(Recommendation {
            kind: RecommendationKind::Streak,
            priority: Priority::Medium,
            title: "Start a new training streak".into(),
            reference_id: None,
        });
    }
    if inputs.progress_percent < policy.min_progress_percent {
        out.push(Recommendation {
            kind: RecommendationKind::Progress,
            priority: Priority::Low,
            title: "Keep attending to reach the next degree".into(),
            reference_id: None,
        });
    }

    out.sort_by_key(|r| r.priority);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenges::ChallengeKind;
    use chrono::{TimeZone, Utc};

    fn technique(id: &str, attempts: u32, accuracy: f64, status: TechniqueStatus) -> TechniqueProgress {
        let mut t = TechniqueProgress::new("e1", id, "STRIKES", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        t.attempts = attempts;
        t.accuracy = accuracy;
        t.status = status;
        t
    }

    #[test]
    fn test_struggling_limited_and_sorted() {
        let techniques = vec![
            technique("a", 6, 60.0, TechniqueStatus::Practicing),
            technique("b", 9, 40.0, TechniqueStatus::Practicing),
            technique("c", 7, 65.0, TechniqueStatus::Practicing),
            technique("d", 8, 50.0, TechniqueStatus::Practicing),
            technique("e", 3, 10.0, TechniqueStatus::Learning),
        ];
        let recs = recommend(
            &RecommendationPolicy::default(),
            &RecommendationInputs {
                techniques: &techniques,
                required_techniques: &[],
                challenges: &[],
                attendance_rate: 1.0,
                current_streak: 3,
                progress_percent: 80.0,
            },
        );
        let ids: Vec<_> = recs
            .iter()
            .filter(|r| r.kind == RecommendationKind::StrugglingTechnique)
            .map(|r| r.reference_id.clone().unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "d", "a"]);
    }

    #[test]
    fn test_general_actions_and_challenges() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let challenge = CourseChallenge {
            id: "ch2".into(),
            course_id: "c1".into(),
            week_number: 2,
            kind: ChallengeKind::Technique,
            activity: "50 Straight Punches".into(),
            description: String::new(),
            base_metric: 50,
            base_time_secs: Some(120),
            xp_reward: 20,
        };
        let mut progress = ChallengeProgress::new("e1", "ch2", now);
        progress.status = ChallengeStatus::Failed;
        let required = vec!["t1".to_string()];
        let recs = recommend(
            &RecommendationPolicy::default(),
            &RecommendationInputs {
                techniques: &[],
                required_techniques: &required,
                challenges: &[(challenge, progress)],
                attendance_rate: 0.5,
                current_streak: 0,
                progress_percent: 10.0,
            },
        );
        let kinds: Vec<_> = recs.iter().map(|r| r.kind).collect();
        assert!(kinds.contains(&RecommendationKind::IncompleteChallenge));
        assert!(kinds.contains(&RecommendationKind::NextTechnique));
        assert!(kinds.contains(&RecommendationKind::Attendance));
        assert!(kinds.contains(&RecommendationKind::Streak));
        assert_eq!(recs.last().unwrap().priority, Priority::Low);
        assert_eq!(recs[0].priority, Priority::High);
    }
}
