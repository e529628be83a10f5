//! Students, enrollments and attendance records.
//!
//! A student's total XP and level are not stored here: both are read from
//! the XP projection kept by the ledger (see `ledger`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Age bracket used for physical-metric adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StudentCategory {
    Adult,
    /// 35+
    Master1,
    /// 45+
    Master2,
    /// 55+
    Master3,
    /// 6-9
    Hero1,
    /// 10-12
    Hero2,
    /// 13-15
    Hero3,
}

impl StudentCategory {
    pub const ALL: [StudentCategory; 7] = [
        StudentCategory::Adult,
        StudentCategory::Master1,
        StudentCategory::Master2,
        StudentCategory::Master3,
        StudentCategory::Hero1,
        StudentCategory::Hero2,
        StudentCategory::Hero3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StudentCategory::Adult => "ADULT",
            StudentCategory::Master1 => "MASTER_1",
            StudentCategory::Master2 => "MASTER_2",
            StudentCategory::Master3 => "MASTER_3",
            StudentCategory::Hero1 => "HERO_1",
            StudentCategory::Hero2 => "HERO_2",
            StudentCategory::Hero3 => "HERO_3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Unspecified,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Unspecified];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::Unspecified => "UNSPECIFIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.as_str() == s)
    }
}

/// Physical-condition tier recorded at enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhysicalCondition {
    Limited,
    Standard,
    Conditioned,
}

impl PhysicalCondition {
    pub const ALL: [PhysicalCondition; 3] = [
        PhysicalCondition::Limited,
        PhysicalCondition::Standard,
        PhysicalCondition::Conditioned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhysicalCondition::Limited => "LIMITED",
            PhysicalCondition::Standard => "STANDARD",
            PhysicalCondition::Conditioned => "CONDITIONED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

/// The attributes a metric adjustment depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjustmentProfile {
    pub category: StudentCategory,
    pub gender: Gender,
    pub condition: PhysicalCondition,
}

impl AdjustmentProfile {
    pub fn new(category: StudentCategory, gender: Gender, condition: PhysicalCondition) -> Self {
        Self {
            category,
            gender,
            condition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub category: StudentCategory,
    pub gender: Gender,
    pub condition: PhysicalCondition,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_check_in: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        name: impl Into<String>,
        profile: AdjustmentProfile,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            name: name.into(),
            category: profile.category,
            gender: profile.gender,
            condition: profile.condition,
            current_streak: 0,
            longest_streak: 0,
            last_check_in: None,
            is_active: true,
            created_at,
        }
    }

    pub fn profile(&self) -> AdjustmentProfile {
        AdjustmentProfile::new(self.category, self.gender, self.condition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Withdrawn,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "ACTIVE",
            EnrollmentStatus::Completed => "COMPLETED",
            EnrollmentStatus::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(EnrollmentStatus::Active),
            "COMPLETED" => Some(EnrollmentStatus::Completed),
            "WITHDRAWN" => Some(EnrollmentStatus::Withdrawn),
            _ => None,
        }
    }
}

/// A student's enrollment in a course.
///
/// `profile` is a snapshot taken at enrollment time; later changes to the
/// student record do not move challenge targets mid-course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseEnrollment {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub profile: AdjustmentProfile,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub expected_end_date: Option<DateTime<Utc>>,
    pub lessons_completed: u32,
    pub current_belt: String,
    /// Pending disciplinary holds; any entry blocks belt changes
    pub disciplinary_holds: Vec<String>,
}

impl CourseEnrollment {
    pub fn new(
        id: impl Into<String>,
        student: &Student,
        course_id: impl Into<String>,
        belt: impl Into<String>,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            student_id: student.id.clone(),
            course_id: course_id.into(),
            profile: student.profile(),
            status: EnrollmentStatus::Active,
            enrolled_at,
            expected_end_date: None,
            lessons_completed: 0,
            current_belt: belt.into(),
            disciplinary_holds: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}

/// One class check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendance {
    pub student_id: String,
    pub course_id: Option<String>,
    /// Caller-supplied lesson identifier; unique per student
    pub lesson_ref: String,
    pub checked_in_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 18, 0, 0).unwrap()
    }

    #[test]
    fn test_category_parse_roundtrip() {
        for c in StudentCategory::ALL {
            assert_eq!(StudentCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(StudentCategory::parse("KID"), None);
    }

    #[test]
    fn test_enrollment_snapshots_profile() {
        let mut student = Student::new(
            "s1",
            "org",
            "Ana",
            AdjustmentProfile::new(StudentCategory::Adult, Gender::Female, PhysicalCondition::Standard),
            at(),
        );
        let enrollment = CourseEnrollment::new("e1", &student, "c1", "white", at());
        student.category = StudentCategory::Master1;
        assert_eq!(enrollment.profile.category, StudentCategory::Adult);
        assert_eq!(enrollment.profile.gender, Gender::Female);
        assert!(enrollment.is_active());
    }

    #[test]
    fn test_new_student_defaults() {
        let student = Student::new(
            "s1",
            "org",
            "Ana",
            AdjustmentProfile::new(StudentCategory::Hero2, Gender::Male, PhysicalCondition::Limited),
            at(),
        );
        assert!(student.is_active);
        assert_eq!(student.current_streak, 0);
        assert!(student.last_check_in.is_none());
    }
}
