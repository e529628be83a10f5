//! Achievement System
//!
//! Achievements belong to an organization and unlock when a student's
//! aggregated stats satisfy their typed criteria. Each unlock is recorded
//! once per (student, achievement) and credits the achievement's XP reward.
//!
//! Hidden achievements are not shown to a student until unlocked.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AchievementCategory {
    Attendance,
    Technique,
    Progression,
    Challenge,
    Social,
    Special,
}

impl AchievementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementCategory::Attendance => "ATTENDANCE",
            AchievementCategory::Technique => "TECHNIQUE",
            AchievementCategory::Progression => "PROGRESSION",
            AchievementCategory::Challenge => "CHALLENGE",
            AchievementCategory::Social => "SOCIAL",
            AchievementCategory::Special => "SPECIAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ATTENDANCE" => Some(AchievementCategory::Attendance),
            "TECHNIQUE" => Some(AchievementCategory::Technique),
            "PROGRESSION" => Some(AchievementCategory::Progression),
            "CHALLENGE" => Some(AchievementCategory::Challenge),
            "SOCIAL" => Some(AchievementCategory::Social),
            "SPECIAL" => Some(AchievementCategory::Special),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "COMMON",
            Rarity::Uncommon => "UNCOMMON",
            Rarity::Rare => "RARE",
            Rarity::Epic => "EPIC",
            Rarity::Legendary => "LEGENDARY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "COMMON" => Some(Rarity::Common),
            "UNCOMMON" => Some(Rarity::Uncommon),
            "RARE" => Some(Rarity::Rare),
            "EPIC" => Some(Rarity::Epic),
            "LEGENDARY" => Some(Rarity::Legendary),
            _ => None,
        }
    }
}

/// Typed unlock rule. Stored as tagged JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockCriteria {
    FirstClass,
    TotalClasses { count: u32 },
    /// Longest run of consecutive calendar days with a check-in
    ConsecutiveDays { days: u32 },
    /// Check-ins during the current calendar month
    MonthlyAttendance { classes: u32 },
    /// At least min(20, days in month) check-ins this month
    PerfectMonth,
    /// Check-ins that started before `before_hour` (UTC)
    EarlyBird { before_hour: u32, count: u32 },
    TechniquesMastered { count: u32 },
    CategoryMastery { category: String, count: u32 },
    LevelReached { level: u32 },
    XpEarned { amount: i64 },
    CoursesCompleted { count: u32 },
    ChallengesCompleted { count: u32 },
    /// Every challenge of a course week completed
    PerfectWeek,
    DegreesEarned { count: u32 },
}

fn ratio(have: f64, need: f64) -> f32 {
    if need <= 0.0 {
        return 1.0;
    }
    (have / need).clamp(0.0, 1.0) as f32
}

impl UnlockCriteria {
    pub fn is_met(&self, stats: &StudentStats) -> bool {
        self.progress(stats) >= 1.0
    }

    /// Progress toward the criteria in [0, 1].
    pub fn progress(&self, stats: &StudentStats) -> f32 {
        match self {
            UnlockCriteria::FirstClass => ratio(stats.total_classes as f64, 1.0),
            UnlockCriteria::TotalClasses { count } => {
                ratio(stats.total_classes as f64, *count as f64)
            }
            UnlockCriteria::ConsecutiveDays { days } => {
                ratio(stats.longest_day_run as f64, *days as f64)
            }
            UnlockCriteria::MonthlyAttendance { classes } => {
                ratio(stats.classes_this_month as f64, *classes as f64)
            }
            UnlockCriteria::PerfectMonth => {
                let target = stats.days_in_month.clamp(1, 20);
                ratio(stats.classes_this_month as f64, target as f64)
            }
            UnlockCriteria::EarlyBird { before_hour, count } => {
                ratio(stats.check_ins_before(*before_hour) as f64, *count as f64)
            }
            UnlockCriteria::TechniquesMastered { count } => {
                ratio(stats.techniques_mastered as f64, *count as f64)
            }
            UnlockCriteria::CategoryMastery { category, count } => {
                let have = stats.mastered_by_category.get(category).copied().unwrap_or(0);
                ratio(have as f64, *count as f64)
            }
            UnlockCriteria::LevelReached { level } => ratio(stats.level as f64, *level as f64),
            UnlockCriteria::XpEarned { amount } => ratio(stats.total_xp as f64, *amount as f64),
            UnlockCriteria::CoursesCompleted { count } => {
                ratio(stats.courses_completed as f64, *count as f64)
            }
            UnlockCriteria::ChallengesCompleted { count } => {
                ratio(stats.challenges_completed as f64, *count as f64)
            }
            UnlockCriteria::PerfectWeek => ratio(stats.perfect_weeks as f64, 1.0),
            UnlockCriteria::DegreesEarned { count } => {
                ratio(stats.degrees_earned as f64, *count as f64)
            }
        }
    }

    /// Criteria whose outcome can change when XP is credited.
    pub fn depends_on_xp(&self) -> bool {
        matches!(
            self,
            UnlockCriteria::LevelReached { .. } | UnlockCriteria::XpEarned { .. }
        )
    }
}

/// Aggregated view of a student used to test unlock criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentStats {
    pub total_xp: i64,
    pub level: u32,
    pub total_classes: u32,
    pub longest_day_run: u32,
    pub classes_this_month: u32,
    pub days_in_month: u32,
    /// Check-ins per starting hour (UTC), index 0..24
    pub check_in_hours: Vec<u32>,
    pub techniques_mastered: u32,
    pub mastered_by_category: HashMap<String, u32>,
    pub courses_completed: u32,
    pub challenges_completed: u32,
    pub perfect_weeks: u32,
    pub degrees_earned: u32,
}

impl StudentStats {
    pub fn check_ins_before(&self, hour: u32) -> u32 {
        self.check_in_hours
            .iter()
            .take(hour.min(24) as usize)
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub description: String,
    pub category: AchievementCategory,
    pub rarity: Rarity,
    pub xp_reward: i64,
    pub criteria: UnlockCriteria,
    pub is_hidden: bool,
}

/// Record of a student unlocking an achievement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAchievement {
    pub student_id: String,
    pub achievement_id: String,
    pub unlocked_at: DateTime<Utc>,
}

/// How an achievement appears to a given student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AchievementView {
    LockedVisible,
    LockedHidden,
    Unlocked { at: DateTime<Utc> },
}

impl AchievementView {
    pub fn of(achievement: &Achievement, unlocked_at: Option<DateTime<Utc>>) -> Self {
        match unlocked_at {
            Some(at) => AchievementView::Unlocked { at },
            None if achievement.is_hidden => AchievementView::LockedHidden,
            None => AchievementView::LockedVisible,
        }
    }

    pub fn is_visible(&self) -> bool {
        !matches!(self, AchievementView::LockedHidden)
    }
}

/// One row of a student's achievement board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementStatus {
    pub achievement: Achievement,
    pub view: AchievementView,
    pub progress: f32,
}

/// Board for a student: unlocked and visible locked achievements. Hidden
/// locked ones are left out.
pub fn achievement_board(
    catalogue: &[Achievement],
    unlocks: &[StudentAchievement],
    stats: &StudentStats,
) -> Vec<AchievementStatus> {
    let unlocked: HashMap<&str, DateTime<Utc>> = unlocks
        .iter()
        .map(|u| (u.achievement_id.as_str(), u.unlocked_at))
        .collect();

    catalogue
        .iter()
        .filter_map(|a| {
            let at = unlocked.get(a.id.as_str()).copied();
            let view = AchievementView::of(a, at);
            if !view.is_visible() {
                return None;
            }
            let progress = if at.is_some() {
                1.0
            } else {
                a.criteria.progress(stats)
            };
            Some(AchievementStatus {
                achievement: a.clone(),
                view,
                progress,
            })
        })
        .collect()
}

/// Achievements in `catalogue` that `stats` satisfies and are not in
/// `already_unlocked`.
pub fn newly_met<'a>(
    catalogue: &'a [Achievement],
    already_unlocked: &HashSet<String>,
    stats: &StudentStats,
) -> Vec<&'a Achievement> {
    catalogue
        .iter()
        .filter(|a| !already_unlocked.contains(&a.id))
        .filter(|a| a.criteria.is_met(stats))
        .collect()
}

// =====================================================
// Default catalogue
// =====================================================

/// Stable id for a catalogue entry within an organization.
pub fn catalogue_id(organization_id: &str, key: &str) -> String {
    format!("{}:{}", organization_id, key)
}

/// Default achievements installed for a new organization.
pub fn default_catalogue(organization_id: &str) -> Vec<Achievement> {
    let entry = |key: &str,
                 name: &str,
                 description: &str,
                 category: AchievementCategory,
                 criteria: UnlockCriteria,
                 xp_reward: i64,
                 rarity: Rarity| Achievement {
        id: catalogue_id(organization_id, key),
        organization_id: organization_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        rarity,
        xp_reward,
        criteria,
        is_hidden: false,
    };

    vec![
        entry(
            "first_class",
            "First Class",
            "Completed your first class",
            AchievementCategory::Special,
            UnlockCriteria::FirstClass,
            50,
            Rarity::Common,
        ),
        entry(
            "dedicated_warrior",
            "Dedicated Warrior",
            "Attended 10 classes",
            AchievementCategory::Attendance,
            UnlockCriteria::TotalClasses { count: 10 },
            100,
            Rarity::Common,
        ),
        entry(
            "persistent_fighter",
            "Persistent Fighter",
            "Attended 50 classes",
            AchievementCategory::Attendance,
            UnlockCriteria::TotalClasses { count: 50 },
            250,
            Rarity::Uncommon,
        ),
        entry(
            "consistency_master",
            "Consistency Master",
            "Attended classes 7 days in a row",
            AchievementCategory::Attendance,
            UnlockCriteria::ConsecutiveDays { days: 7 },
            150,
            Rarity::Uncommon,
        ),
        entry(
            "first_mastery",
            "First Mastery",
            "Mastered your first technique",
            AchievementCategory::Technique,
            UnlockCriteria::TechniquesMastered { count: 1 },
            75,
            Rarity::Common,
        ),
        entry(
            "advanced_technician",
            "Advanced Technician",
            "Mastered 10 techniques",
            AchievementCategory::Technique,
            UnlockCriteria::TechniquesMastered { count: 10 },
            200,
            Rarity::Rare,
        ),
        entry(
            "leveling_up",
            "Leveling Up",
            "Reached level 5",
            AchievementCategory::Progression,
            UnlockCriteria::LevelReached { level: 5 },
            100,
            Rarity::Uncommon,
        ),
        entry(
            "experienced_warrior",
            "Experienced Warrior",
            "Reached level 10",
            AchievementCategory::Progression,
            UnlockCriteria::LevelReached { level: 10 },
            300,
            Rarity::Rare,
        ),
        entry(
            "challenger",
            "Challenger",
            "Completed 5 challenges",
            AchievementCategory::Challenge,
            UnlockCriteria::ChallengesCompleted { count: 5 },
            125,
            Rarity::Common,
        ),
        entry(
            "perfect_week",
            "Perfect Week",
            "Completed every challenge of a week",
            AchievementCategory::Challenge,
            UnlockCriteria::PerfectWeek,
            200,
            Rarity::Rare,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 7, 30, 0).unwrap()
    }

    fn achievement(id: &str, criteria: UnlockCriteria, hidden: bool) -> Achievement {
        Achievement {
            id: id.into(),
            organization_id: "org".into(),
            name: id.into(),
            description: String::new(),
            category: AchievementCategory::Special,
            rarity: Rarity::Common,
            xp_reward: 10,
            criteria,
            is_hidden: hidden,
        }
    }

    #[test]
    fn test_total_classes_progress() {
        let criteria = UnlockCriteria::TotalClasses { count: 10 };
        let stats = StudentStats {
            total_classes: 5,
            ..Default::default()
        };
        assert!((criteria.progress(&stats) - 0.5).abs() < f32::EPSILON);
        assert!(!criteria.is_met(&stats));

        let stats = StudentStats {
            total_classes: 12,
            ..Default::default()
        };
        assert_eq!(criteria.progress(&stats), 1.0);
        assert!(criteria.is_met(&stats));
    }

    #[test]
    fn test_first_class_needs_one_check_in() {
        assert!(!UnlockCriteria::FirstClass.is_met(&StudentStats::default()));
        let stats = StudentStats {
            total_classes: 1,
            ..Default::default()
        };
        assert!(UnlockCriteria::FirstClass.is_met(&stats));
    }

    #[test]
    fn test_perfect_month_caps_at_twenty() {
        let stats = StudentStats {
            classes_this_month: 20,
            days_in_month: 31,
            ..Default::default()
        };
        assert!(UnlockCriteria::PerfectMonth.is_met(&stats));
        let stats = StudentStats {
            classes_this_month: 19,
            days_in_month: 31,
            ..Default::default()
        };
        assert!(!UnlockCriteria::PerfectMonth.is_met(&stats));
    }

    #[test]
    fn test_early_bird_counts_hours() {
        let mut hours = vec![0; 24];
        hours[6] = 2;
        hours[7] = 1;
        hours[9] = 4;
        let stats = StudentStats {
            check_in_hours: hours,
            ..Default::default()
        };
        assert_eq!(stats.check_ins_before(8), 3);
        assert!(UnlockCriteria::EarlyBird {
            before_hour: 8,
            count: 3
        }
        .is_met(&stats));
        assert!(!UnlockCriteria::EarlyBird {
            before_hour: 7,
            count: 3
        }
        .is_met(&stats));
    }

    #[test]
    fn test_category_mastery() {
        let mut stats = StudentStats::default();
        stats.mastered_by_category.insert("STRIKES".into(), 3);
        let criteria = UnlockCriteria::CategoryMastery {
            category: "STRIKES".into(),
            count: 3,
        };
        assert!(criteria.is_met(&stats));
        let other = UnlockCriteria::CategoryMastery {
            category: "DEFENSES".into(),
            count: 1,
        };
        assert!(!other.is_met(&stats));
    }

    #[test]
    fn test_criteria_json_is_tagged() {
        let json = serde_json::to_string(&UnlockCriteria::LevelReached { level: 5 }).unwrap();
        assert_eq!(json, r#"{"type":"level_reached","level":5}"#);
        let parsed: UnlockCriteria = serde_json::from_str(r#"{"type":"perfect_week"}"#).unwrap();
        assert_eq!(parsed, UnlockCriteria::PerfectWeek);
    }

    #[test]
    fn test_no_double_unlock() {
        let catalogue = vec![achievement("a1", UnlockCriteria::FirstClass, false)];
        let stats = StudentStats {
            total_classes: 1,
            ..Default::default()
        };
        let mut unlocked = HashSet::new();
        assert_eq!(newly_met(&catalogue, &unlocked, &stats).len(), 1);
        unlocked.insert("a1".to_string());
        assert!(newly_met(&catalogue, &unlocked, &stats).is_empty());
    }

    #[test]
    fn test_hidden_achievements_excluded_until_unlocked() {
        let catalogue = vec![
            achievement("visible", UnlockCriteria::FirstClass, false),
            achievement("secret", UnlockCriteria::TotalClasses { count: 100 }, true),
        ];
        let board = achievement_board(&catalogue, &[], &StudentStats::default());
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].view, AchievementView::LockedVisible);

        let unlocks = vec![StudentAchievement {
            student_id: "s1".into(),
            achievement_id: "secret".into(),
            unlocked_at: at(),
        }];
        let board = achievement_board(&catalogue, &unlocks, &StudentStats::default());
        assert_eq!(board.len(), 2);
        let secret = board.iter().find(|s| s.achievement.id == "secret").unwrap();
        assert_eq!(secret.view, AchievementView::Unlocked { at: at() });
        assert_eq!(secret.progress, 1.0);
    }

    #[test]
    fn test_default_catalogue() {
        let catalogue = default_catalogue("org-1");
        assert_eq!(catalogue.len(), 10);
        let ids: HashSet<_> = catalogue.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids.len(), 10);
        assert!(ids.contains("org-1:first_class"));
        assert!(catalogue.iter().all(|a| a.xp_reward > 0));
    }
}
