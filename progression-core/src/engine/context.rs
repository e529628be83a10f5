//! Shared state handed to every engine service, plus the lookups they all
//! repeat (load-or-NotFound, attendance rate, technique coverage).

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::challenges::CourseChallenge;
use crate::clock::Clock;
use crate::course::Course;
use crate::engine::config::EngineConfig;
use crate::engine::locks::StudentLocks;
use crate::error::{ProgressionError, ProgressionResult};
use crate::store::StorageManager;
use crate::student::{CourseEnrollment, Student};
use crate::techniques::{technique_coverage, TechniqueProgress};

pub struct EngineContext {
    pub store: Arc<StorageManager>,
    pub clock: Arc<dyn Clock>,
    pub config: EngineConfig,
    pub locks: StudentLocks,
}

impl EngineContext {
    pub fn new(store: Arc<StorageManager>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
            locks: StudentLocks::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn student(&self, id: &str) -> ProgressionResult<Student> {
        self.store
            .students
            .get(id)
            .await?
            .ok_or_else(|| ProgressionError::not_found("student", id))
    }

    pub async fn course(&self, id: &str) -> ProgressionResult<Course> {
        self.store
            .courses
            .get(id)
            .await?
            .ok_or_else(|| ProgressionError::not_found("course", id))
    }

    pub async fn enrollment(&self, id: &str) -> ProgressionResult<CourseEnrollment> {
        self.store
            .courses
            .get_enrollment(id)
            .await?
            .ok_or_else(|| ProgressionError::not_found("enrollment", id))
    }

    /// The student's enrollment in `course_id`, active or not.
    pub async fn enrollment_in(&self, student_id: &str, course_id: &str) -> ProgressionResult<CourseEnrollment> {
        self.store
            .courses
            .find_enrollment(student_id, course_id)
            .await?
            .ok_or_else(|| {
                ProgressionError::not_found("enrollment", format!("{}/{}", student_id, course_id))
            })
    }

    pub async fn challenge(&self, id: &str) -> ProgressionResult<CourseChallenge> {
        self.store
            .courses
            .get_challenge(id)
            .await?
            .ok_or_else(|| ProgressionError::not_found("challenge", id))
    }

    /// Active enrollments, most recent first.
    pub async fn active_enrollments(&self, student_id: &str) -> ProgressionResult<Vec<CourseEnrollment>> {
        let mut list: Vec<CourseEnrollment> = self
            .store
            .courses
            .enrollments_for_student(student_id)
            .await?
            .into_iter()
            .filter(|e| e.is_active())
            .collect();
        list.sort_by(|a, b| b.enrolled_at.cmp(&a.enrolled_at));
        Ok(list)
    }

    /// Check-ins for the course since enrollment over classes expected by now.
    pub async fn attendance_rate(&self, enrollment: &CourseEnrollment, course: &Course) -> ProgressionResult<f64> {
        let attended = self
            .store
            .activity
            .attendance_for_student(&enrollment.student_id)
            .await?
            .iter()
            .filter(|a| a.course_id.as_deref() == Some(course.id.as_str()))
            .filter(|a| a.checked_in_at >= enrollment.enrolled_at)
            .count() as u32;
        let expected = course.expected_classes(enrollment.enrolled_at, self.now());
        Ok(crate::attendance::attendance_rate(attended, expected))
    }

    /// Coverage of the course's required techniques, with the progress rows.
    pub async fn technique_coverage(
        &self,
        enrollment: &CourseEnrollment,
        course: &Course,
    ) -> ProgressionResult<(f64, Vec<TechniqueProgress>)> {
        let progress = self.store.activity.technique_progress(&enrollment.id).await?;
        Ok((technique_coverage(&course.required_techniques, &progress), progress))
    }
}
