use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::achievements::Achievement;
use crate::course::Course;
use crate::engine::context::EngineContext;
use crate::engine::locks::StudentGuard;
use crate::engine::services::achievement::AchievementService;
use crate::engine::services::xp::XpService;
use crate::error::{ProgressionError, ProgressionResult, StoreError};
use crate::graduation::{
    check_degree_request, course_completion, snapshot, CompletionInputs, CourseCompletion,
    DegreeRecord, GraduationRecord, ProgressionInputs, ProgressionSnapshot,
};
use crate::ledger::{AwardReceipt, IdempotencyKey, XpSource};
use crate::student::CourseEnrollment;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegreeOutcome {
    pub record: DegreeRecord,
    pub award: Option<AwardReceipt>,
    pub unlocked: Vec<Achievement>,
}

/// Instructor approval of a belt change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraduationApproval {
    pub instructor_id: String,
    pub to_belt: String,
    pub ceremony_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// GraduationService — degrees, belt changes and course completion
#[derive(Clone)]
pub struct GraduationService {
    ctx: Arc<EngineContext>,
    xp: XpService,
    achievements: AchievementService,
}

impl GraduationService {
    pub fn new(ctx: Arc<EngineContext>, xp: XpService, achievements: AchievementService) -> Self {
        Self {
            ctx,
            xp,
            achievements,
        }
    }

    async fn snapshot_for(&self, enrollment: &CourseEnrollment, course: &Course) -> ProgressionResult<ProgressionSnapshot> {
        let attendance_rate = self.ctx.attendance_rate(enrollment, course).await?;
        let (technique_coverage, _) = self.ctx.technique_coverage(enrollment, course).await?;
        let recorded_degrees = self
            .ctx
            .store
            .graduation
            .degrees(&enrollment.student_id, &course.id)
            .await?;
        Ok(snapshot(
            &self.ctx.config.graduation,
            ProgressionInputs {
                enrollment,
                course,
                attendance_rate,
                technique_coverage,
                recorded_degrees,
                now: self.ctx.now(),
            },
        ))
    }

    pub async fn calculate_progression(&self, student_id: &str, course_id: &str) -> ProgressionResult<ProgressionSnapshot> {
        self.ctx.student(student_id).await?;
        let course = self.ctx.course(course_id).await?;
        let enrollment = self.ctx.enrollment_in(student_id, course_id).await?;
        self.snapshot_for(&enrollment, &course).await
    }

    /// Validate one degree, credit its XP, then append the record. The
    /// keyed credit comes first so a failed append can be retried without
    /// losing the reward.
    async fn record_degree_locked(
        &self,
        guard: &StudentGuard,
        snapshot: &ProgressionSnapshot,
        recorded: &[DegreeRecord],
        degree: u8,
    ) -> ProgressionResult<(DegreeRecord, Option<AwardReceipt>)> {
        check_degree_request(
            degree,
            snapshot.current_degree,
            recorded,
            self.ctx.config.graduation.max_degree,
        )
        .map_err(ProgressionError::InvalidState)?;

        let record = DegreeRecord {
            student_id: snapshot.student_id.clone(),
            course_id: snapshot.course_id.clone(),
            degree,
            achieved_at: self.ctx.now(),
            lessons_completed: snapshot.completed_lessons,
            progress_percent: snapshot.progress_percent,
        };
        let amount = self.ctx.config.degree_xp;
        let award = if amount > 0 {
            let key = IdempotencyKey::new(
                &record.student_id,
                XpSource::Degree,
                format!("{}/{}", record.course_id, degree),
            );
            self.xp
                .credit_once(
                    guard,
                    &key,
                    Some(snapshot.enrollment_id.as_str()),
                    amount,
                    &format!("Degree {} earned", degree),
                )
                .await?
                .applied()
        } else {
            None
        };

        match self.ctx.store.graduation.insert_degree(&record).await {
            Ok(()) => {}
            Err(StoreError::Conflict(msg)) => return Err(ProgressionError::InvalidState(msg)),
            Err(e) => return Err(e.into()),
        }
        info!(
            student = %record.student_id,
            course = %record.course_id,
            degree,
            "Degree recorded"
        );
        Ok((record, award))
    }

    pub async fn record_degree_achievement(
        &self,
        student_id: &str,
        course_id: &str,
        degree: u8,
    ) -> ProgressionResult<DegreeOutcome> {
        let student = self.ctx.student(student_id).await?;
        let course = self.ctx.course(course_id).await?;
        let enrollment = self.ctx.enrollment_in(student_id, course_id).await?;
        let guard = self.ctx.locks.lock(student_id).await;

        let snapshot = self.snapshot_for(&enrollment, &course).await?;
        let (record, award) = self
            .record_degree_locked(&guard, &snapshot, &snapshot.recorded_degrees, degree)
            .await?;
        let unlocked = self.achievements.evaluate_locked(&guard, &student).await?;
        Ok(DegreeOutcome {
            record,
            award,
            unlocked,
        })
    }

    /// Record every earned but unrecorded degree, lowest first.
    pub async fn check_and_record_degrees(&self, student_id: &str, course_id: &str) -> ProgressionResult<Vec<DegreeOutcome>> {
        let student = self.ctx.student(student_id).await?;
        let course = self.ctx.course(course_id).await?;
        let enrollment = self.ctx.enrollment_in(student_id, course_id).await?;
        let guard = self.ctx.locks.lock(student_id).await;

        let snapshot = self.snapshot_for(&enrollment, &course).await?;
        let mut recorded = snapshot.recorded_degrees.clone();
        let have: HashSet<u8> = recorded.iter().map(|d| d.degree).collect();

        let mut outcomes = Vec::new();
        for degree in 1..=snapshot.current_degree {
            if have.contains(&degree) {
                continue;
            }
            let (record, award) = self
                .record_degree_locked(&guard, &snapshot, &recorded, degree)
                .await?;
            recorded.push(record.clone());
            outcomes.push(DegreeOutcome {
                record,
                award,
                unlocked: Vec::new(),
            });
        }

        if !outcomes.is_empty() {
            let unlocked = self.achievements.evaluate_locked(&guard, &student).await?;
            if let Some(last) = outcomes.last_mut() {
                last.unlocked = unlocked;
            }
        }
        Ok(outcomes)
    }

    /// Explicit instructor action; never triggered automatically. The
    /// record notes whether the student met every requirement.
    pub async fn approve_graduation(
        &self,
        student_id: &str,
        course_id: &str,
        approval: GraduationApproval,
    ) -> ProgressionResult<GraduationRecord> {
        if approval.to_belt.trim().is_empty() {
            return Err(ProgressionError::invalid("target belt must not be empty"));
        }
        self.ctx.student(student_id).await?;
        let course = self.ctx.course(course_id).await?;
        let enrollment = self.ctx.enrollment_in(student_id, course_id).await?;
        let _guard = self.ctx.locks.lock(student_id).await;

        let snapshot = self.snapshot_for(&enrollment, &course).await?;
        if !snapshot.is_eligible_for_belt_change {
            let failed: Vec<&str> = snapshot.failed_checks().map(|c| c.reason.as_str()).collect();
            warn!(
                student = %student_id,
                course = %course_id,
                failed = ?failed,
                "Graduation approved without full eligibility"
            );
        }

        let in_course = self
            .ctx
            .store
            .graduation
            .graduations(student_id)
            .await?
            .iter()
            .filter(|g| g.course_id == course_id)
            .count();
        let record = GraduationRecord {
            id: format!("{}:{}:{}", student_id, course_id, in_course + 1),
            student_id: student_id.to_string(),
            course_id: course_id.to_string(),
            from_belt: enrollment.current_belt.clone(),
            to_belt: approval.to_belt,
            approved_by: approval.instructor_id,
            ceremony_date: approval.ceremony_date,
            notes: approval.notes,
            was_eligible: snapshot.is_eligible_for_belt_change,
            approved_at: self.ctx.now(),
        };
        self.ctx
            .store
            .graduation
            .record_graduation(&record, &enrollment.id)
            .await?;
        info!(
            student = %student_id,
            from = %record.from_belt,
            to = %record.to_belt,
            by = %record.approved_by,
            "Graduation approved"
        );
        Ok(record)
    }

    pub async fn get_eligible_students(&self, course_id: &str) -> ProgressionResult<Vec<ProgressionSnapshot>> {
        let course = self.ctx.course(course_id).await?;
        let mut eligible = Vec::new();
        for enrollment in self.ctx.store.courses.enrollments_for_course(course_id).await? {
            if !enrollment.is_active() {
                continue;
            }
            let snapshot = self.snapshot_for(&enrollment, &course).await?;
            if snapshot.is_eligible_for_belt_change {
                eligible.push(snapshot);
            }
        }
        Ok(eligible)
    }

    pub async fn course_completion(&self, enrollment_id: &str) -> ProgressionResult<CourseCompletion> {
        let enrollment = self.ctx.enrollment(enrollment_id).await?;
        let course = self.ctx.course(&enrollment.course_id).await?;
        let store = &self.ctx.store;

        let attendance_rate = self.ctx.attendance_rate(&enrollment, &course).await?;
        let (technique_ratio, _) = self.ctx.technique_coverage(&enrollment, &course).await?;

        let challenges = store.courses.challenges_for_course(&course.id).await?;
        let completed = store
            .activity
            .challenge_progress(&enrollment.id)
            .await?
            .iter()
            .filter(|p| p.is_completed())
            .count();
        let challenge_ratio = if challenges.is_empty() {
            0.0
        } else {
            completed as f64 / challenges.len() as f64
        };

        let schedule = &self.ctx.config.evaluation_schedule;
        let passed: HashSet<u32> = store
            .activity
            .evaluations(&enrollment.id)
            .await?
            .iter()
            .filter(|e| e.passed)
            .map(|e| e.lesson)
            .collect();
        let evaluation_ratio = if schedule.is_empty() {
            0.0
        } else {
            schedule.iter().filter(|c| passed.contains(&c.lesson)).count() as f64
                / schedule.len() as f64
        };

        Ok(course_completion(
            &self.ctx.config.completion,
            CompletionInputs {
                attendance_rate,
                technique_ratio,
                challenge_ratio,
                evaluation_ratio,
                lessons_completed: enrollment.lessons_completed,
                total_lessons: course.total_lessons,
            },
            enrollment.enrolled_at,
            self.ctx.now(),
        ))
    }

    /// Belt changes recorded for a student, oldest first.
    pub async fn graduations(&self, student_id: &str) -> ProgressionResult<Vec<GraduationRecord>> {
        self.ctx.student(student_id).await?;
        Ok(self.ctx.store.graduation.graduations(student_id).await?)
    }
}
