use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::course::weeks_between;
use crate::engine::context::EngineContext;
use crate::error::ProgressionResult;
use crate::leaderboard::{rank, Contender, LeaderboardEntry, LeaderboardWindow};
use crate::logging::TimingSpan;
use crate::recommendations::{recommend, Recommendation, RecommendationInputs};
use crate::risk::{estimate, RiskAssessment, RiskInputs};

/// Summary shown on a student's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub name: String,
    pub total_xp: i64,
    pub level: u32,
    pub xp_to_next_level: i64,
    pub progress_to_next_level: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub achievements_unlocked: usize,
    pub badges: usize,
    pub challenges_completed: usize,
    /// Techniques at Proficient or above across all enrollments
    pub techniques_learned: usize,
    pub classes_attended: usize,
}

/// InsightService — read-only views: risk, recommendations, rankings
#[derive(Clone)]
pub struct InsightService {
    ctx: Arc<EngineContext>,
}

impl InsightService {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn estimate_risk(&self, student_id: &str) -> ProgressionResult<RiskAssessment> {
        let student = self.ctx.student(student_id).await?;
        let now = self.ctx.now();
        let check_ins: Vec<_> = self
            .ctx
            .store
            .activity
            .attendance_for_student(student_id)
            .await?
            .into_iter()
            .map(|a| a.checked_in_at)
            .collect();

        let mut inputs = RiskInputs {
            student_id: student.id.clone(),
            check_ins,
            attendance_rate: None,
            velocity_ratio: None,
            challenges_completed: 0,
            challenges_available: 0,
            now,
        };

        if let Some(enrollment) = self.ctx.active_enrollments(student_id).await?.into_iter().next() {
            let course = self.ctx.course(&enrollment.course_id).await?;
            inputs.attendance_rate = Some(self.ctx.attendance_rate(&enrollment, &course).await?);

            let weeks = weeks_between(enrollment.enrolled_at, now).max(1) as f64;
            let pace = course.weekly_pace();
            if pace > 0.0 {
                inputs.velocity_ratio = Some(enrollment.lessons_completed as f64 / weeks / pace);
            }

            // only weeks the student has had the chance to attempt
            let reachable_week = weeks_between(enrollment.enrolled_at, now) + 1;
            inputs.challenges_available = self
                .ctx
                .store
                .courses
                .challenges_for_course(&course.id)
                .await?
                .iter()
                .filter(|c| c.week_number <= reachable_week)
                .count();
            inputs.challenges_completed = self
                .ctx
                .store
                .activity
                .challenge_progress(&enrollment.id)
                .await?
                .iter()
                .filter(|p| p.is_completed())
                .count();
        }

        let assessment = estimate(&self.ctx.config.risk, &inputs);
        debug!(
            student = %student_id,
            score = assessment.risk_score,
            level = assessment.risk_level.as_str(),
            confidence = assessment.confidence,
            "Risk estimated"
        );
        Ok(assessment)
    }

    pub async fn recommendations(&self, enrollment_id: &str) -> ProgressionResult<Vec<Recommendation>> {
        let enrollment = self.ctx.enrollment(enrollment_id).await?;
        let course = self.ctx.course(&enrollment.course_id).await?;
        let student = self.ctx.student(&enrollment.student_id).await?;

        let attendance_rate = self.ctx.attendance_rate(&enrollment, &course).await?;
        let techniques = self.ctx.store.activity.technique_progress(&enrollment.id).await?;
        let progress = self.ctx.store.activity.challenge_progress(&enrollment.id).await?;
        let challenges: Vec<_> = self
            .ctx
            .store
            .courses
            .challenges_for_course(&course.id)
            .await?
            .into_iter()
            .filter_map(|c| {
                progress
                    .iter()
                    .find(|p| p.challenge_id == c.id)
                    .map(|p| (c, p.clone()))
            })
            .collect();
        let progress_percent = if course.total_lessons == 0 {
            0.0
        } else {
            (enrollment.lessons_completed as f64 / course.total_lessons as f64 * 100.0).min(100.0)
        };

        Ok(recommend(
            &self.ctx.config.recommendations,
            &RecommendationInputs {
                techniques: &techniques,
                required_techniques: &course.required_techniques,
                challenges: &challenges,
                attendance_rate,
                current_streak: student.current_streak,
                progress_percent,
            },
        ))
    }

    pub async fn leaderboard(&self, organization_id: &str, limit: usize) -> ProgressionResult<Vec<LeaderboardEntry>> {
        self.leaderboard_window(organization_id, LeaderboardWindow::AllTime, limit)
            .await
    }

    pub async fn leaderboard_window(
        &self,
        organization_id: &str,
        window: LeaderboardWindow,
        limit: usize,
    ) -> ProgressionResult<Vec<LeaderboardEntry>> {
        let store = &self.ctx.store;
        let totals: HashMap<String, i64> = store
            .ledger
            .projections_for_organization(organization_id)
            .await?
            .into_iter()
            .map(|p| (p.student_id, p.total_xp))
            .collect();
        let contenders: Vec<Contender> = store
            .students
            .list_by_organization(organization_id, true)
            .await?
            .into_iter()
            .map(|s| Contender {
                total_xp: totals.get(&s.id).copied().unwrap_or(0),
                student_id: s.id,
                name: s.name,
            })
            .collect();
        let entries = store
            .ledger
            .entries_for_organization(organization_id, window.start())
            .await?;

        let _span = TimingSpan::new("leaderboard_rank");
        Ok(rank(&self.ctx.config.levels, &contenders, &entries, window, limit))
    }

    pub async fn student_stats(&self, student_id: &str) -> ProgressionResult<StudentProfile> {
        let student = self.ctx.student(student_id).await?;
        let store = &self.ctx.store;
        let levels = &self.ctx.config.levels;
        let total_xp = store.ledger.projection(student_id).await?.total_xp;

        let mut challenges_completed = 0;
        let mut techniques_learned = 0;
        for enrollment in store.courses.enrollments_for_student(student_id).await? {
            challenges_completed += store
                .activity
                .challenge_progress(&enrollment.id)
                .await?
                .iter()
                .filter(|p| p.is_completed())
                .count();
            techniques_learned += store
                .activity
                .technique_progress(&enrollment.id)
                .await?
                .iter()
                .filter(|t| t.status.is_proficient())
                .count();
        }

        Ok(StudentProfile {
            student_id: student.id.clone(),
            name: student.name.clone(),
            total_xp,
            level: levels.level(total_xp),
            xp_to_next_level: levels.xp_to_next_level(total_xp),
            progress_to_next_level: levels.progress_to_next_level(total_xp),
            current_streak: student.current_streak,
            longest_streak: student.longest_streak,
            achievements_unlocked: store.achievements.unlocks(student_id).await?.len(),
            badges: store.achievements.badge_unlocks(student_id).await?.len(),
            challenges_completed,
            techniques_learned,
            classes_attended: store.activity.attendance_for_student(student_id).await?.len(),
        })
    }
}
