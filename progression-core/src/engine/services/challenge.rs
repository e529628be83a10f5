use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::achievements::Achievement;
use crate::challenges::{
    challenges_from_template, evaluate_attempt, rank_completed, weekly_stats, AttemptVerdict,
    ChallengeProgress, ChallengeRanking, ChallengeStatus, CourseChallenge, WeeklyChallengeStats,
};
use crate::engine::context::EngineContext;
use crate::engine::locks::StudentGuard;
use crate::engine::services::achievement::AchievementService;
use crate::engine::services::xp::XpService;
use crate::error::{ProgressionError, ProgressionResult};
use crate::ledger::{AwardReceipt, IdempotencyKey, XpSource};
use crate::student::{CourseEnrollment, Student};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeOutcome {
    pub progress: ChallengeProgress,
    pub verdict: Option<AttemptVerdict>,
    /// Present only on the submission that first completed the challenge
    pub award: Option<AwardReceipt>,
    pub unlocked: Vec<Achievement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeLeaderboardEntry {
    pub rank: usize,
    pub student_id: String,
    pub enrollment_id: String,
    pub best_metric: Option<u32>,
    pub time_secs: Option<u32>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A challenge as one student sees it: targets scaled to their snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentChallenge {
    pub enrollment_id: String,
    pub challenge: CourseChallenge,
    pub adjusted_metric: u32,
    pub adjusted_time_secs: Option<u32>,
    pub progress: ChallengeProgress,
    pub progress_percent: f64,
}

/// Instructor decision on a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReview {
    pub instructor_id: String,
    pub approved: bool,
    pub corrected_metric: Option<u32>,
    pub corrected_time_secs: Option<u32>,
    pub notes: Option<String>,
}

/// ChallengeService — weekly challenge submissions and rankings
#[derive(Clone)]
pub struct ChallengeService {
    ctx: Arc<EngineContext>,
    xp: XpService,
    achievements: AchievementService,
}

impl ChallengeService {
    pub fn new(ctx: Arc<EngineContext>, xp: XpService, achievements: AchievementService) -> Self {
        Self {
            ctx,
            xp,
            achievements,
        }
    }

    /// Load and check the pair a submission refers to.
    async fn load_pair(
        &self,
        enrollment_id: &str,
        challenge_id: &str,
    ) -> ProgressionResult<(CourseEnrollment, CourseChallenge)> {
        let enrollment = self.ctx.enrollment(enrollment_id).await?;
        if !enrollment.is_active() {
            return Err(ProgressionError::invalid(format!(
                "enrollment {} is not active",
                enrollment_id
            )));
        }
        let challenge = self.ctx.challenge(challenge_id).await?;
        if challenge.course_id != enrollment.course_id {
            return Err(ProgressionError::invalid(format!(
                "challenge {} does not belong to course {}",
                challenge_id, enrollment.course_id
            )));
        }
        Ok((enrollment, challenge))
    }

    async fn current_progress(
        &self,
        enrollment_id: &str,
        challenge_id: &str,
    ) -> ProgressionResult<ChallengeProgress> {
        Ok(self
            .ctx
            .store
            .activity
            .challenge_progress(enrollment_id)
            .await?
            .into_iter()
            .find(|p| p.challenge_id == challenge_id)
            .unwrap_or_else(|| ChallengeProgress::new(enrollment_id, challenge_id, self.ctx.now())))
    }

    /// Credit the reward for a first completion. The ledger key makes a
    /// retry after a partial failure harmless.
    async fn reward_completion(
        &self,
        guard: &StudentGuard,
        student_id: &str,
        challenge: &CourseChallenge,
        progress: &mut ChallengeProgress,
    ) -> ProgressionResult<Option<AwardReceipt>> {
        if challenge.xp_reward <= 0 {
            return Ok(None);
        }
        let key = IdempotencyKey::new(student_id, XpSource::Challenge, &challenge.id);
        let award = self
            .xp
            .credit_once(
                guard,
                &key,
                Some(progress.enrollment_id.as_str()),
                challenge.xp_reward,
                &format!("Week {} challenge: {}", challenge.week_number, challenge.activity),
            )
            .await?
            .applied();
        progress.xp_earned = challenge.xp_reward;
        Ok(award)
    }

    async fn finish(
        &self,
        guard: &StudentGuard,
        student: &Student,
        progress: ChallengeProgress,
        verdict: Option<AttemptVerdict>,
        award: Option<AwardReceipt>,
        newly_completed: bool,
    ) -> ProgressionResult<ChallengeOutcome> {
        self.ctx
            .store
            .activity
            .upsert_challenge_progress(&progress)
            .await?;
        let unlocked = if newly_completed {
            self.achievements.evaluate_locked(guard, student).await?
        } else {
            Vec::new()
        };
        Ok(ChallengeOutcome {
            progress,
            verdict,
            award,
            unlocked,
        })
    }

    pub async fn submit(
        &self,
        enrollment_id: &str,
        challenge_id: &str,
        actual_metric: Option<u32>,
        actual_time_secs: Option<u32>,
    ) -> ProgressionResult<ChallengeOutcome> {
        let (enrollment, challenge) = self.load_pair(enrollment_id, challenge_id).await?;
        let student = self.ctx.student(&enrollment.student_id).await?;
        let guard = self.ctx.locks.lock(&student.id).await;

        let mut progress = self.current_progress(enrollment_id, challenge_id).await?;
        let verdict = evaluate_attempt(
            &self.ctx.config.multipliers,
            &enrollment.profile,
            &challenge,
            actual_metric,
            actual_time_secs,
        );
        let newly_completed =
            progress.record_attempt(&verdict, actual_metric, actual_time_secs, self.ctx.now());

        info!(
            student = %student.id,
            challenge = %challenge_id,
            metric = ?actual_metric,
            target = verdict.adjusted_metric,
            status = progress.status.as_str(),
            "Challenge submission"
        );

        let award = if newly_completed {
            self.reward_completion(&guard, &student.id, &challenge, &mut progress)
                .await?
        } else {
            None
        };
        self.finish(&guard, &student, progress, Some(verdict), award, newly_completed)
            .await
    }

    /// Instructor approval or rejection of a submission.
    pub async fn validate_submission(
        &self,
        enrollment_id: &str,
        challenge_id: &str,
        review: SubmissionReview,
    ) -> ProgressionResult<ChallengeOutcome> {
        let (enrollment, challenge) = self.load_pair(enrollment_id, challenge_id).await?;
        let student = self.ctx.student(&enrollment.student_id).await?;
        let guard = self.ctx.locks.lock(&student.id).await;
        let now = self.ctx.now();

        let mut progress = self.current_progress(enrollment_id, challenge_id).await?;
        if let Some(metric) = review.corrected_metric {
            progress.actual_metric = Some(metric);
            progress.best_metric = Some(progress.best_metric.map_or(metric, |b| b.max(metric)));
        }
        if review.corrected_time_secs.is_some() {
            progress.actual_time_secs = review.corrected_time_secs;
        }
        progress.adjusted_metric = self
            .ctx
            .config
            .multipliers
            .adjust(&enrollment.profile, challenge.base_metric);

        if !review.approved {
            if progress.is_completed() {
                return Err(ProgressionError::invalid(format!(
                    "challenge {} is already completed",
                    challenge_id
                )));
            }
            progress.status = ChallengeStatus::Failed;
            progress.validated_by = Some(review.instructor_id.clone());
            if review.notes.is_some() {
                progress.notes = review.notes;
            }
            progress.updated_at = now;
            warn!(
                student = %student.id,
                challenge = %challenge_id,
                by = %review.instructor_id,
                "Challenge submission rejected"
            );
            return self.finish(&guard, &student, progress, None, None, false).await;
        }

        let newly_completed = progress.approve(&review.instructor_id, review.notes, now);
        info!(
            student = %student.id,
            challenge = %challenge_id,
            by = %review.instructor_id,
            "Challenge submission approved"
        );
        let award = if newly_completed {
            self.reward_completion(&guard, &student.id, &challenge, &mut progress)
                .await?
        } else {
            None
        };
        self.finish(&guard, &student, progress, None, award, newly_completed)
            .await
    }

    /// Install the weekly template for a course. Returns how many weeks
    /// were added; weeks that already have a challenge are skipped.
    pub async fn seed_weekly_challenges(&self, course_id: &str) -> ProgressionResult<usize> {
        let course = self.ctx.course(course_id).await?;
        let mut inserted = 0;
        for challenge in challenges_from_template(&course.id, course.duration_weeks) {
            if self.ctx.store.courses.insert_challenge(&challenge).await? {
                inserted += 1;
            }
        }
        info!(course = %course_id, inserted, "Weekly challenges seeded");
        Ok(inserted)
    }

    pub async fn challenge_leaderboard(
        &self,
        challenge_id: &str,
        ranking: ChallengeRanking,
        limit: usize,
    ) -> ProgressionResult<Vec<ChallengeLeaderboardEntry>> {
        self.ctx.challenge(challenge_id).await?;
        let progress = self
            .ctx
            .store
            .activity
            .challenge_progress_for_challenge(challenge_id)
            .await?;

        let mut board = Vec::new();
        for (i, p) in rank_completed(&progress, ranking, limit).into_iter().enumerate() {
            let student_id = match self.ctx.store.courses.get_enrollment(&p.enrollment_id).await? {
                Some(e) => e.student_id,
                None => continue,
            };
            board.push(ChallengeLeaderboardEntry {
                rank: i + 1,
                student_id,
                enrollment_id: p.enrollment_id.clone(),
                best_metric: p.best_metric,
                time_secs: p.actual_time_secs,
                completed_at: p.completed_at,
            });
        }
        Ok(board)
    }

    pub async fn challenge_stats(&self, challenge_id: &str) -> ProgressionResult<WeeklyChallengeStats> {
        self.ctx.challenge(challenge_id).await?;
        let progress = self
            .ctx
            .store
            .activity
            .challenge_progress_for_challenge(challenge_id)
            .await?;
        Ok(weekly_stats(challenge_id, &progress))
    }

    /// Every challenge of the student's active enrollments with the
    /// student's own targets.
    pub async fn student_challenges(&self, student_id: &str) -> ProgressionResult<Vec<StudentChallenge>> {
        self.ctx.student(student_id).await?;
        let table = &self.ctx.config.multipliers;
        let mut out = Vec::new();

        for enrollment in self.ctx.active_enrollments(student_id).await? {
            let existing = self
                .ctx
                .store
                .activity
                .challenge_progress(&enrollment.id)
                .await?;
            for challenge in self
                .ctx
                .store
                .courses
                .challenges_for_course(&enrollment.course_id)
                .await?
            {
                let progress = existing
                    .iter()
                    .find(|p| p.challenge_id == challenge.id)
                    .cloned()
                    .unwrap_or_else(|| {
                        ChallengeProgress::new(&enrollment.id, &challenge.id, self.ctx.now())
                    });
                let adjusted_metric = table.adjust(&enrollment.profile, challenge.base_metric);
                let adjusted_time_secs = challenge
                    .base_time_secs
                    .map(|t| table.adjust(&enrollment.profile, t));
                let mut scaled = progress.clone();
                scaled.adjusted_metric = adjusted_metric;
                out.push(StudentChallenge {
                    enrollment_id: enrollment.id.clone(),
                    progress_percent: scaled.progress_percent(),
                    adjusted_metric,
                    adjusted_time_secs,
                    challenge,
                    progress,
                });
            }
        }
        Ok(out)
    }
}
