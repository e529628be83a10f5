use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::info;

use crate::achievements::{
    achievement_board, default_catalogue, newly_met, Achievement, AchievementStatus,
    StudentAchievement, StudentStats,
};
use crate::attendance::{classes_in_month, days_in_month, hour_histogram, longest_day_run};
use crate::badges::{Badge, BadgeUnlock};
use crate::engine::context::EngineContext;
use crate::engine::locks::StudentGuard;
use crate::engine::services::xp::XpService;
use crate::error::{Processed, ProgressionError, ProgressionResult, StoreError};
use crate::ledger::{IdempotencyKey, XpSource};
use crate::student::{EnrollmentStatus, Student};

/// AchievementService — unlock evaluation, catalogues and badges
#[derive(Clone)]
pub struct AchievementService {
    ctx: Arc<EngineContext>,
    xp: XpService,
}

impl AchievementService {
    pub fn new(ctx: Arc<EngineContext>, xp: XpService) -> Self {
        Self { ctx, xp }
    }

    /// Aggregate everything unlock criteria look at.
    pub async fn collect_stats(&self, student: &Student) -> ProgressionResult<StudentStats> {
        let store = &self.ctx.store;
        let now = self.ctx.now();

        let total_xp = store.ledger.projection(&student.id).await?.total_xp;
        let check_ins: Vec<_> = store
            .activity
            .attendance_for_student(&student.id)
            .await?
            .into_iter()
            .map(|a| a.checked_in_at)
            .collect();

        let mut stats = StudentStats {
            total_xp,
            level: self.ctx.config.levels.level(total_xp),
            total_classes: check_ins.len() as u32,
            longest_day_run: longest_day_run(&check_ins),
            classes_this_month: classes_in_month(&check_ins, now),
            days_in_month: days_in_month(now),
            check_in_hours: hour_histogram(&check_ins),
            ..StudentStats::default()
        };

        let mut mastered_by_category: HashMap<String, u32> = HashMap::new();
        for enrollment in store.courses.enrollments_for_student(&student.id).await? {
            if enrollment.status == EnrollmentStatus::Completed {
                stats.courses_completed += 1;
            }

            for t in store.activity.technique_progress(&enrollment.id).await? {
                if t.is_mastered() {
                    stats.techniques_mastered += 1;
                    *mastered_by_category.entry(t.technique_category.clone()).or_default() += 1;
                }
            }

            let progress = store.activity.challenge_progress(&enrollment.id).await?;
            let completed: HashSet<&str> = progress
                .iter()
                .filter(|p| p.is_completed())
                .map(|p| p.challenge_id.as_str())
                .collect();
            stats.challenges_completed += completed.len() as u32;

            // week -> (total, completed)
            let mut weeks: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
            for c in store.courses.challenges_for_course(&enrollment.course_id).await? {
                let week = weeks.entry(c.week_number).or_default();
                week.0 += 1;
                if completed.contains(c.id.as_str()) {
                    week.1 += 1;
                }
            }
            stats.perfect_weeks += weeks
                .values()
                .filter(|(total, done)| *total > 0 && total == done)
                .count() as u32;

            stats.degrees_earned += store
                .graduation
                .degrees(&student.id, &enrollment.course_id)
                .await?
                .len() as u32;
        }
        stats.mastered_by_category = mastered_by_category;
        Ok(stats)
    }

    pub async fn evaluate_unlocks(&self, student_id: &str) -> ProgressionResult<Vec<Achievement>> {
        let student = self.ctx.student(student_id).await?;
        let guard = self.ctx.locks.lock(student_id).await;
        self.evaluate_locked(&guard, &student).await
    }

    /// Unlock every newly met achievement and credit its reward, repeating
    /// until nothing new unlocks (rewards can satisfy XP criteria).
    pub(crate) async fn evaluate_locked(
        &self,
        guard: &StudentGuard,
        student: &Student,
    ) -> ProgressionResult<Vec<Achievement>> {
        let catalogue = self
            .ctx
            .store
            .achievements
            .catalogue(&student.organization_id)
            .await?;
        if catalogue.is_empty() {
            return Ok(Vec::new());
        }

        let mut held: HashSet<String> = self
            .ctx
            .store
            .achievements
            .unlocks(&student.id)
            .await?
            .into_iter()
            .map(|u| u.achievement_id)
            .collect();

        let mut stats = self.collect_stats(student).await?;
        let mut unlocked = Vec::new();

        loop {
            let candidates: Vec<Achievement> = newly_met(&catalogue, &held, &stats)
                .into_iter()
                .cloned()
                .collect();
            if candidates.is_empty() {
                break;
            }

            for achievement in candidates {
                held.insert(achievement.id.clone());
                // Reward before the unlock row: until the unlock exists the
                // achievement is re-evaluated, and the key pays it only once.
                if achievement.xp_reward > 0 {
                    let key = IdempotencyKey::new(&student.id, XpSource::Achievement, &achievement.id);
                    self.xp
                        .credit_once(
                            guard,
                            &key,
                            None,
                            achievement.xp_reward,
                            &format!("Achievement unlocked: {}", achievement.name),
                        )
                        .await?;
                }
                let unlock = StudentAchievement {
                    student_id: student.id.clone(),
                    achievement_id: achievement.id.clone(),
                    unlocked_at: self.ctx.now(),
                };
                if !self.ctx.store.achievements.insert_unlock(&unlock).await? {
                    continue;
                }
                info!(
                    student = %student.id,
                    achievement = %achievement.id,
                    reward = achievement.xp_reward,
                    "Achievement unlocked"
                );
                unlocked.push(achievement);
            }

            let total = self.ctx.store.ledger.projection(&student.id).await?.total_xp;
            stats.total_xp = total;
            stats.level = self.ctx.config.levels.level(total);
        }

        Ok(unlocked)
    }

    /// The student's board: unlocked and visible locked achievements with
    /// progress.
    pub async fn student_achievements(&self, student_id: &str) -> ProgressionResult<Vec<AchievementStatus>> {
        let student = self.ctx.student(student_id).await?;
        let catalogue = self
            .ctx
            .store
            .achievements
            .catalogue(&student.organization_id)
            .await?;
        let unlocks = self.ctx.store.achievements.unlocks(student_id).await?;
        let stats = self.collect_stats(&student).await?;
        Ok(achievement_board(&catalogue, &unlocks, &stats))
    }

    pub async fn seed_default_achievements(&self, organization_id: &str) -> ProgressionResult<usize> {
        let catalogue = default_catalogue(organization_id);
        match self
            .ctx
            .store
            .achievements
            .seed(organization_id, &catalogue)
            .await
        {
            Ok(count) => {
                info!(organization = %organization_id, count, "Default achievements seeded");
                Ok(count)
            }
            Err(StoreError::Conflict(msg)) => Err(ProgressionError::InvalidState(msg)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn grant_badge(
        &self,
        student_id: &str,
        badge_id: &str,
        granted_by: &str,
        note: Option<String>,
    ) -> ProgressionResult<Processed<BadgeUnlock>> {
        let student = self.ctx.student(student_id).await?;
        let badge: Badge = self
            .ctx
            .store
            .achievements
            .get_badge(badge_id)
            .await?
            .ok_or_else(|| ProgressionError::not_found("badge", badge_id))?;
        if badge.organization_id != student.organization_id {
            return Err(ProgressionError::invalid(format!(
                "badge {} belongs to another organization",
                badge_id
            )));
        }

        let _guard = self.ctx.locks.lock(student_id).await;
        let unlock = BadgeUnlock {
            student_id: student_id.to_string(),
            badge_id: badge_id.to_string(),
            granted_by: granted_by.to_string(),
            note,
            granted_at: self.ctx.now(),
        };
        if !self.ctx.store.achievements.insert_badge_unlock(&unlock).await? {
            return Ok(Processed::already(format!(
                "student {} already holds badge {}",
                student_id, badge_id
            )));
        }
        info!(student = %student_id, badge = %badge_id, by = %granted_by, "Badge granted");
        Ok(Processed::Applied(unlock))
    }

    pub async fn student_badges(&self, student_id: &str) -> ProgressionResult<Vec<BadgeUnlock>> {
        self.ctx.student(student_id).await?;
        Ok(self.ctx.store.achievements.badge_unlocks(student_id).await?)
    }
}
