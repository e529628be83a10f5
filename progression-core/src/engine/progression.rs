use std::sync::Arc;

use crate::achievements::{Achievement, AchievementStatus};
use crate::badges::BadgeUnlock;
use crate::challenges::{ChallengeRanking, WeeklyChallengeStats};
use crate::clock::{Clock, SystemClock};
use crate::constants::DEFAULT_LEADERBOARD_LIMIT;
use crate::engine::config::EngineConfig;
use crate::engine::context::EngineContext;
use crate::engine::services::{
    AchievementService, ChallengeLeaderboardEntry, ChallengeOutcome, ChallengeService,
    CheckInOutcome, DegreeOutcome, EvaluationInput, EvaluationOutcome, GraduationApproval,
    GraduationService, InsightService, PracticeOutcome, StudentChallenge, StudentProfile,
    SubmissionReview, TrainingService, XpService,
};
use crate::error::{Processed, ProgressionResult};
use crate::evaluations::{EvaluationCheckpoint, EvaluationReadiness};
use crate::graduation::{CourseCompletion, GraduationRecord, ProgressionSnapshot};
use crate::leaderboard::{LeaderboardEntry, LeaderboardWindow};
use crate::ledger::{AwardReceipt, CourseXp, IdempotencyKey, PointsTransaction, ReplayReport, XpSource};
use crate::recommendations::Recommendation;
use crate::risk::RiskAssessment;
use crate::store::StorageManager;
use crate::techniques::PracticeUpdate;

/// Entry point for every progression operation. Cheap to share behind an
/// `Arc`; all methods take `&self` and may run concurrently.
pub struct ProgressionEngine {
    ctx: Arc<EngineContext>,
    pub xp: XpService,
    pub achievements: AchievementService,
    pub challenges: ChallengeService,
    pub training: TrainingService,
    pub graduation: GraduationService,
    pub insight: InsightService,
}

impl ProgressionEngine {
    pub fn new(store: StorageManager, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: StorageManager, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let ctx = Arc::new(EngineContext::new(Arc::new(store), clock, config));
        let xp = XpService::new(ctx.clone());
        let achievements = AchievementService::new(ctx.clone(), xp.clone());
        Self {
            challenges: ChallengeService::new(ctx.clone(), xp.clone(), achievements.clone()),
            training: TrainingService::new(ctx.clone(), xp.clone(), achievements.clone()),
            graduation: GraduationService::new(ctx.clone(), xp.clone(), achievements.clone()),
            insight: InsightService::new(ctx.clone()),
            achievements,
            xp,
            ctx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn store(&self) -> &StorageManager {
        &self.ctx.store
    }

    /// Drop lock slots for students nobody is writing to.
    pub fn prune_locks(&self) -> usize {
        self.ctx.locks.prune()
    }

    // =====================================================
    // XP ledger
    // =====================================================

    pub async fn award(
        &self,
        student_id: &str,
        amount: i64,
        source: XpSource,
        reference_type: Option<&str>,
        reference_id: Option<&str>,
        reason: &str,
    ) -> ProgressionResult<AwardReceipt> {
        self.xp
            .award(student_id, amount, source, reference_type, reference_id, reason)
            .await
    }

    pub async fn award_once(
        &self,
        key: &IdempotencyKey,
        amount: i64,
        reason: &str,
    ) -> ProgressionResult<Processed<AwardReceipt>> {
        self.xp.award_once(key, amount, reason).await
    }

    pub async fn grant_bonus(
        &self,
        student_id: &str,
        amount: i64,
        reason: &str,
        granted_by: &str,
    ) -> ProgressionResult<AwardReceipt> {
        self.xp.grant_bonus(student_id, amount, reason, granted_by).await
    }

    pub async fn total_xp(&self, student_id: &str) -> ProgressionResult<i64> {
        self.xp.total_xp(student_id).await
    }

    pub async fn level(&self, student_id: &str) -> ProgressionResult<u32> {
        self.xp.level(student_id).await
    }

    /// Level for a total under the configured thresholds.
    pub fn level_for(&self, total_xp: i64) -> u32 {
        self.ctx.config.levels.level(total_xp)
    }

    pub async fn course_xp(&self, enrollment_id: &str) -> ProgressionResult<CourseXp> {
        self.xp.course_xp(enrollment_id).await
    }

    pub async fn history(
        &self,
        student_id: &str,
        limit: usize,
        offset: usize,
    ) -> ProgressionResult<Vec<PointsTransaction>> {
        self.xp.history(student_id, limit, offset).await
    }

    pub async fn replay(&self, student_id: &str) -> ProgressionResult<ReplayReport> {
        self.xp.replay(student_id).await
    }

    // =====================================================
    // Achievements & badges
    // =====================================================

    pub async fn evaluate_unlocks(&self, student_id: &str) -> ProgressionResult<Vec<Achievement>> {
        self.achievements.evaluate_unlocks(student_id).await
    }

    pub async fn student_achievements(&self, student_id: &str) -> ProgressionResult<Vec<AchievementStatus>> {
        self.achievements.student_achievements(student_id).await
    }

    pub async fn seed_default_achievements(&self, organization_id: &str) -> ProgressionResult<usize> {
        self.achievements.seed_default_achievements(organization_id).await
    }

    pub async fn grant_badge(
        &self,
        student_id: &str,
        badge_id: &str,
        granted_by: &str,
        note: Option<String>,
    ) -> ProgressionResult<Processed<BadgeUnlock>> {
        self.achievements
            .grant_badge(student_id, badge_id, granted_by, note)
            .await
    }

    pub async fn student_badges(&self, student_id: &str) -> ProgressionResult<Vec<BadgeUnlock>> {
        self.achievements.student_badges(student_id).await
    }

    // =====================================================
    // Challenges
    // =====================================================

    pub async fn submit_challenge(
        &self,
        enrollment_id: &str,
        challenge_id: &str,
        actual_metric: Option<u32>,
        actual_time_secs: Option<u32>,
    ) -> ProgressionResult<ChallengeOutcome> {
        self.challenges
            .submit(enrollment_id, challenge_id, actual_metric, actual_time_secs)
            .await
    }

    pub async fn validate_submission(
        &self,
        enrollment_id: &str,
        challenge_id: &str,
        review: SubmissionReview,
    ) -> ProgressionResult<ChallengeOutcome> {
        self.challenges
            .validate_submission(enrollment_id, challenge_id, review)
            .await
    }

    pub async fn seed_weekly_challenges(&self, course_id: &str) -> ProgressionResult<usize> {
        self.challenges.seed_weekly_challenges(course_id).await
    }

    pub async fn challenge_leaderboard(
        &self,
        challenge_id: &str,
        ranking: ChallengeRanking,
        limit: usize,
    ) -> ProgressionResult<Vec<ChallengeLeaderboardEntry>> {
        self.challenges
            .challenge_leaderboard(challenge_id, ranking, limit)
            .await
    }

    pub async fn challenge_stats(&self, challenge_id: &str) -> ProgressionResult<WeeklyChallengeStats> {
        self.challenges.challenge_stats(challenge_id).await
    }

    pub async fn student_challenges(&self, student_id: &str) -> ProgressionResult<Vec<StudentChallenge>> {
        self.challenges.student_challenges(student_id).await
    }

    // =====================================================
    // Attendance, techniques & evaluations
    // =====================================================

    pub async fn process_check_in(
        &self,
        student_id: &str,
        course_id: Option<&str>,
        lesson_ref: &str,
        techniques_practiced: usize,
    ) -> ProgressionResult<Processed<CheckInOutcome>> {
        self.training
            .process_check_in(student_id, course_id, lesson_ref, techniques_practiced)
            .await
    }

    pub async fn record_technique_practice(
        &self,
        enrollment_id: &str,
        technique_id: &str,
        update: PracticeUpdate,
    ) -> ProgressionResult<PracticeOutcome> {
        self.training
            .record_technique_practice(enrollment_id, technique_id, update)
            .await
    }

    pub async fn record_evaluation(&self, input: EvaluationInput) -> ProgressionResult<Processed<EvaluationOutcome>> {
        self.training.record_evaluation(input).await
    }

    pub async fn next_evaluation(&self, enrollment_id: &str) -> ProgressionResult<Option<EvaluationCheckpoint>> {
        self.training.next_evaluation(enrollment_id).await
    }

    pub async fn can_take_evaluation(&self, enrollment_id: &str) -> ProgressionResult<EvaluationReadiness> {
        self.training.can_take_evaluation(enrollment_id).await
    }

    // =====================================================
    // Degrees & graduation
    // =====================================================

    pub async fn calculate_progression(&self, student_id: &str, course_id: &str) -> ProgressionResult<ProgressionSnapshot> {
        self.graduation.calculate_progression(student_id, course_id).await
    }

    pub async fn record_degree_achievement(
        &self,
        student_id: &str,
        course_id: &str,
        degree: u8,
    ) -> ProgressionResult<DegreeOutcome> {
        self.graduation
            .record_degree_achievement(student_id, course_id, degree)
            .await
    }

    pub async fn check_and_record_degrees(&self, student_id: &str, course_id: &str) -> ProgressionResult<Vec<DegreeOutcome>> {
        self.graduation
            .check_and_record_degrees(student_id, course_id)
            .await
    }

    pub async fn approve_graduation(
        &self,
        student_id: &str,
        course_id: &str,
        approval: GraduationApproval,
    ) -> ProgressionResult<GraduationRecord> {
        self.graduation
            .approve_graduation(student_id, course_id, approval)
            .await
    }

    pub async fn get_eligible_students(&self, course_id: &str) -> ProgressionResult<Vec<ProgressionSnapshot>> {
        self.graduation.get_eligible_students(course_id).await
    }

    pub async fn course_completion(&self, enrollment_id: &str) -> ProgressionResult<CourseCompletion> {
        self.graduation.course_completion(enrollment_id).await
    }

    // =====================================================
    // Insight
    // =====================================================

    pub async fn estimate_risk(&self, student_id: &str) -> ProgressionResult<RiskAssessment> {
        self.insight.estimate_risk(student_id).await
    }

    pub async fn recommendations(&self, enrollment_id: &str) -> ProgressionResult<Vec<Recommendation>> {
        self.insight.recommendations(enrollment_id).await
    }

    pub async fn leaderboard(&self, organization_id: &str, limit: Option<usize>) -> ProgressionResult<Vec<LeaderboardEntry>> {
        self.insight
            .leaderboard(organization_id, limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT))
            .await
    }

    pub async fn leaderboard_window(
        &self,
        organization_id: &str,
        window: LeaderboardWindow,
        limit: Option<usize>,
    ) -> ProgressionResult<Vec<LeaderboardEntry>> {
        self.insight
            .leaderboard_window(organization_id, window, limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT))
            .await
    }

    pub async fn student_stats(&self, student_id: &str) -> ProgressionResult<StudentProfile> {
        self.insight.student_stats(student_id).await
    }
}
