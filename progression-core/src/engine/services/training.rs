use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::achievements::Achievement;
use crate::attendance::{is_first_of_month, next_streak, CheckInXp};
use crate::engine::context::EngineContext;
use crate::engine::services::achievement::AchievementService;
use crate::engine::services::xp::XpService;
use crate::error::{Processed, ProgressionError, ProgressionResult};
use crate::evaluations::{
    checkpoint_for, next_evaluation, readiness, Evaluation, EvaluationCheckpoint,
    EvaluationReadiness, PhysicalTest, TechniqueResult,
};
use crate::ledger::{AwardReceipt, IdempotencyKey, XpSource};
use crate::student::{Attendance, CourseEnrollment};
use crate::techniques::{PracticeUpdate, TechniqueProgress};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInOutcome {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub xp: CheckInXp,
    pub award: Option<AwardReceipt>,
    /// New lesson count when the check-in was for a course
    pub lessons_completed: Option<u32>,
    pub unlocked: Vec<Achievement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeOutcome {
    pub progress: TechniqueProgress,
    /// Present when this update first mastered the technique
    pub mastery_award: Option<AwardReceipt>,
    pub unlocked: Vec<Achievement>,
}

/// An evaluation as submitted by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub id: String,
    pub enrollment_id: String,
    pub lesson: u32,
    pub technique_results: Vec<TechniqueResult>,
    pub physical_test: Option<PhysicalTest>,
    pub overall_score: f64,
    pub notes: Option<String>,
    pub evaluator_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub evaluation: Evaluation,
    pub award: Option<AwardReceipt>,
    pub unlocked: Vec<Achievement>,
}

/// TrainingService — check-ins, technique practice and evaluations
#[derive(Clone)]
pub struct TrainingService {
    ctx: Arc<EngineContext>,
    xp: XpService,
    achievements: AchievementService,
}

impl TrainingService {
    pub fn new(ctx: Arc<EngineContext>, xp: XpService, achievements: AchievementService) -> Self {
        Self {
            ctx,
            xp,
            achievements,
        }
    }

    // =====================================================
    // Check-ins
    // =====================================================

    pub async fn process_check_in(
        &self,
        student_id: &str,
        course_id: Option<&str>,
        lesson_ref: &str,
        techniques_practiced: usize,
    ) -> ProgressionResult<Processed<CheckInOutcome>> {
        let student = self.ctx.student(student_id).await?;
        if !student.is_active {
            return Err(ProgressionError::invalid(format!(
                "student {} is deactivated",
                student_id
            )));
        }
        let enrollment = match course_id {
            Some(course) => {
                let e = self.ctx.enrollment_in(student_id, course).await?;
                if !e.is_active() {
                    return Err(ProgressionError::invalid(format!(
                        "enrollment {} is not active",
                        e.id
                    )));
                }
                Some(e)
            }
            None => None,
        };

        let guard = self.ctx.locks.lock(student_id).await;
        let now = self.ctx.now();
        // re-read under the lock so the streak sees the latest check-in
        let student = self.ctx.student(student_id).await?;

        let previous: Vec<_> = self
            .ctx
            .store
            .activity
            .attendance_for_student(student_id)
            .await?
            .into_iter()
            .map(|a| a.checked_in_at)
            .collect();

        let recorded = self
            .ctx
            .store
            .activity
            .record_attendance(&Attendance {
                student_id: student_id.to_string(),
                course_id: course_id.map(str::to_string),
                lesson_ref: lesson_ref.to_string(),
                checked_in_at: now,
            })
            .await?;
        if !recorded {
            debug!(student = %student_id, lesson = %lesson_ref, "Duplicate check-in");
            return Ok(Processed::already(format!(
                "check-in for lesson {} already recorded",
                lesson_ref
            )));
        }

        let lessons_completed = match &enrollment {
            Some(e) => Some(self.ctx.store.courses.increment_lessons(&e.id).await?),
            None => None,
        };

        let policy = &self.ctx.config.check_in;
        let current = next_streak(student.last_check_in, student.current_streak, now, policy.grace_days);
        let longest = student.longest_streak.max(current);
        self.ctx
            .store
            .students
            .update_streak(student_id, current, longest, now)
            .await?;

        let xp = policy.xp(current, techniques_practiced, is_first_of_month(&previous, now));
        let award = if xp.total > 0 {
            let key = IdempotencyKey::new(student_id, XpSource::Attendance, lesson_ref);
            self.xp
                .credit_once(
                    &guard,
                    &key,
                    enrollment.as_ref().map(|e| e.id.as_str()),
                    xp.total,
                    &format!("Class check-in: {}", lesson_ref),
                )
                .await?
                .applied()
        } else {
            None
        };

        info!(
            student = %student_id,
            lesson = %lesson_ref,
            streak = current,
            xp = xp.total,
            "Check-in processed"
        );

        let unlocked = self.achievements.evaluate_locked(&guard, &student).await?;
        Ok(Processed::Applied(CheckInOutcome {
            current_streak: current,
            longest_streak: longest,
            xp,
            award,
            lessons_completed,
            unlocked,
        }))
    }

    // =====================================================
    // Techniques
    // =====================================================

    pub async fn record_technique_practice(
        &self,
        enrollment_id: &str,
        technique_id: &str,
        update: PracticeUpdate,
    ) -> ProgressionResult<PracticeOutcome> {
        let enrollment = self.ctx.enrollment(enrollment_id).await?;
        let student = self.ctx.student(&enrollment.student_id).await?;
        let guard = self.ctx.locks.lock(&student.id).await;

        let mut progress = self.technique_row(&enrollment, technique_id, &update).await?;
        let first_mastery = progress.apply(&update, self.ctx.now());
        self.ctx
            .store
            .activity
            .upsert_technique_progress(&progress)
            .await?;

        if !first_mastery {
            return Ok(PracticeOutcome {
                progress,
                mastery_award: None,
                unlocked: Vec::new(),
            });
        }

        info!(student = %student.id, technique = %technique_id, "Technique mastered");
        let amount = self.ctx.config.technique_mastery_xp;
        let mastery_award = if amount > 0 {
            let key = IdempotencyKey::new(
                &student.id,
                XpSource::Technique,
                format!("{}/{}", enrollment_id, technique_id),
            );
            self.xp
                .credit_once(
                    &guard,
                    &key,
                    Some(enrollment_id),
                    amount,
                    &format!("Technique mastered: {}", technique_id),
                )
                .await?
                .applied()
        } else {
            None
        };
        let unlocked = self.achievements.evaluate_locked(&guard, &student).await?;
        Ok(PracticeOutcome {
            progress,
            mastery_award,
            unlocked,
        })
    }

    async fn technique_row(
        &self,
        enrollment: &CourseEnrollment,
        technique_id: &str,
        update: &PracticeUpdate,
    ) -> ProgressionResult<TechniqueProgress> {
        let existing = self
            .ctx
            .store
            .activity
            .technique_progress(&enrollment.id)
            .await?
            .into_iter()
            .find(|t| t.technique_id == technique_id);
        Ok(existing.unwrap_or_else(|| {
            TechniqueProgress::new(
                &enrollment.id,
                technique_id,
                update.technique_category.clone().unwrap_or_else(|| "GENERAL".into()),
                self.ctx.now(),
            )
        }))
    }

    // =====================================================
    // Evaluations
    // =====================================================

    async fn readiness_for(
        &self,
        enrollment: &CourseEnrollment,
        checkpoint: Option<&EvaluationCheckpoint>,
    ) -> ProgressionResult<EvaluationReadiness> {
        let course = self.ctx.course(&enrollment.course_id).await?;
        let rate = self.ctx.attendance_rate(enrollment, &course).await?;
        let (_, techniques) = self.ctx.technique_coverage(enrollment, &course).await?;
        let proficient = course
            .required_techniques
            .iter()
            .filter(|id| {
                techniques
                    .iter()
                    .any(|t| &t.technique_id == *id && t.status.is_proficient())
            })
            .count();
        let policy = &self.ctx.config.graduation;
        Ok(readiness(
            checkpoint,
            rate,
            policy.min_attendance_rate,
            proficient,
            course.required_techniques.len(),
            policy.min_technique_coverage,
            enrollment.lessons_completed,
        ))
    }

    pub async fn next_evaluation(&self, enrollment_id: &str) -> ProgressionResult<Option<EvaluationCheckpoint>> {
        let enrollment = self.ctx.enrollment(enrollment_id).await?;
        let taken = self.ctx.store.activity.evaluations(&enrollment.id).await?;
        Ok(next_evaluation(&self.ctx.config.evaluation_schedule, &taken).cloned())
    }

    pub async fn can_take_evaluation(&self, enrollment_id: &str) -> ProgressionResult<EvaluationReadiness> {
        let enrollment = self.ctx.enrollment(enrollment_id).await?;
        let next = self.next_evaluation(enrollment_id).await?;
        self.readiness_for(&enrollment, next.as_ref()).await
    }

    pub async fn record_evaluation(&self, input: EvaluationInput) -> ProgressionResult<Processed<EvaluationOutcome>> {
        let enrollment = self.ctx.enrollment(&input.enrollment_id).await?;
        let checkpoint = checkpoint_for(&self.ctx.config.evaluation_schedule, input.lesson)
            .cloned()
            .ok_or_else(|| {
                ProgressionError::invalid(format!("no evaluation scheduled at lesson {}", input.lesson))
            })?;

        let ready = self.readiness_for(&enrollment, Some(&checkpoint)).await?;
        if !ready.can_take() {
            return Err(ProgressionError::invalid(format!(
                "requirements not met: {}",
                ready.missing().join("; ")
            )));
        }

        let student = self.ctx.student(&enrollment.student_id).await?;
        let guard = self.ctx.locks.lock(&student.id).await;
        let now = self.ctx.now();

        let evaluation = Evaluation {
            id: input.id.clone(),
            enrollment_id: enrollment.id.clone(),
            lesson: input.lesson,
            technique_results: input.technique_results,
            physical_test: input.physical_test,
            overall_score: input.overall_score,
            passed: input.overall_score >= checkpoint.passing_score,
            notes: input.notes,
            evaluator_id: input.evaluator_id,
            evaluated_at: now,
        };
        if !self.ctx.store.activity.insert_evaluation(&evaluation).await? {
            return Ok(Processed::already(format!(
                "evaluation {} already recorded",
                evaluation.id
            )));
        }

        for result in &evaluation.technique_results {
            let update = PracticeUpdate {
                accuracy: Some(result.accuracy),
                validated_by: Some(evaluation.evaluator_id.clone()),
                ..PracticeUpdate::default()
            };
            let mut row = self.technique_row(&enrollment, &result.technique_id, &update).await?;
            row.apply(&update, now);
            self.ctx.store.activity.upsert_technique_progress(&row).await?;
        }

        let amount = self.ctx.config.evaluation_xp.xp_for(
            checkpoint.base_xp,
            evaluation.overall_score,
            evaluation.passed,
        );
        let key = IdempotencyKey::new(&student.id, XpSource::Evaluation, &evaluation.id);
        let award = self
            .xp
            .credit_once(
                &guard,
                &key,
                Some(enrollment.id.as_str()),
                amount,
                &format!("{} (score {:.0})", checkpoint.name, evaluation.overall_score),
            )
            .await?
            .applied();

        info!(
            student = %student.id,
            evaluation = %evaluation.id,
            score = evaluation.overall_score,
            passed = evaluation.passed,
            xp = amount,
            "Evaluation recorded"
        );

        let unlocked = self.achievements.evaluate_locked(&guard, &student).await?;
        Ok(Processed::Applied(EvaluationOutcome {
            evaluation,
            award,
            unlocked,
        }))
    }
}
