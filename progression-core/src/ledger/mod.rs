//! XP Ledger
//!
//! The append-only list of points transactions is the source of truth for a
//! student's XP. The cached `XpProjection` (total + last change) exists for
//! fast reads and can always be rebuilt by replaying the ledger. Levels are
//! never stored: they are derived from the total on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::LEVEL_THRESHOLDS;
use crate::student::StudentCategory;

// =====================================================
// Transactions
// =====================================================

/// What an XP credit was awarded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XpSource {
    Attendance,
    Technique,
    Challenge,
    Evaluation,
    Achievement,
    Degree,
    Bonus,
}

impl XpSource {
    pub const ALL: [XpSource; 7] = [
        XpSource::Attendance,
        XpSource::Technique,
        XpSource::Challenge,
        XpSource::Evaluation,
        XpSource::Achievement,
        XpSource::Degree,
        XpSource::Bonus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            XpSource::Attendance => "ATTENDANCE",
            XpSource::Technique => "TECHNIQUE",
            XpSource::Challenge => "CHALLENGE",
            XpSource::Evaluation => "EVALUATION",
            XpSource::Achievement => "ACHIEVEMENT",
            XpSource::Degree => "DEGREE",
            XpSource::Bonus => "BONUS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|src| src.as_str() == s)
    }
}

/// Guards a credit against being applied twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub student_id: String,
    pub source: XpSource,
    pub reference: String,
}

impl IdempotencyKey {
    pub fn new(student_id: impl Into<String>, source: XpSource, reference: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            source,
            reference: reference.into(),
        }
    }

    /// Stable string form used as the unique column in storage.
    ///
    /// The student id is length-prefixed, so ids and references containing
    /// `:` can never make two different keys collide.
    pub fn as_string(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.student_id.len(),
            self.student_id,
            self.source.as_str(),
            self.reference
        )
    }
}

/// A transaction before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub student_id: String,
    /// Enrollment whose course XP this credit also counts toward
    pub enrollment_id: Option<String>,
    pub amount: i64,
    pub source: XpSource,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

pub type TransactionId = i64;

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: TransactionId,
    pub student_id: String,
    pub enrollment_id: Option<String>,
    pub amount: i64,
    pub source: XpSource,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Cached running total for one student.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct XpProjection {
    pub student_id: String,
    pub total_xp: i64,
    pub last_changed_at: Option<DateTime<Utc>>,
}

/// Result of an atomic append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Appended {
        transaction: PointsTransaction,
        new_total: i64,
    },
    /// The idempotency key was already used; nothing was written.
    Duplicate { existing: PointsTransaction },
}

/// What the caller of an award gets back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwardReceipt {
    pub transaction_id: TransactionId,
    pub amount: i64,
    pub new_total: i64,
    pub level_before: u32,
    pub level_after: u32,
}

impl AwardReceipt {
    pub fn leveled_up(&self) -> bool {
        self.level_after > self.level_before
    }
}

/// Outcome of recomputing a projection from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub student_id: String,
    pub entries: usize,
    pub ledger_total: i64,
    pub projected_total: i64,
    pub repaired: bool,
}

impl ReplayReport {
    pub fn drift(&self) -> i64 {
        self.projected_total - self.ledger_total
    }
}

/// Course-scoped XP for one enrollment, derived from the ledger entries
/// tagged with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseXp {
    pub enrollment_id: String,
    pub course_id: String,
    pub total_xp: i64,
    pub level: u32,
    pub xp_to_next_level: i64,
    pub progress_to_next_level: f64,
}

impl CourseXp {
    pub fn from_entries(
        enrollment_id: &str,
        course_id: &str,
        entries: &[PointsTransaction],
        levels: &LevelTable,
    ) -> Self {
        let total_xp: i64 = entries
            .iter()
            .filter(|t| t.enrollment_id.as_deref() == Some(enrollment_id))
            .map(|t| t.amount)
            .sum();
        Self {
            enrollment_id: enrollment_id.to_string(),
            course_id: course_id.to_string(),
            total_xp,
            level: levels.level(total_xp),
            xp_to_next_level: levels.xp_to_next_level(total_xp),
            progress_to_next_level: levels.progress_to_next_level(total_xp),
        }
    }
}

/// Sum of every ledger entry.
pub fn ledger_total(entries: &[PointsTransaction]) -> i64 {
    entries.iter().map(|t| t.amount).sum()
}

/// Latest change timestamp among `entries`.
pub fn last_change(entries: &[PointsTransaction]) -> Option<DateTime<Utc>> {
    entries.iter().map(|t| t.created_at).max()
}

/// Order used by history pages: most recent first, ties by id descending.
pub fn sort_history(entries: &mut [PointsTransaction]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

// =====================================================
// Category XP multipliers
// =====================================================

/// Scales earned XP by age bracket. Instructor bonuses are exempt: the
/// granted amount is what lands in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryXpMultipliers {
    pub adult: f64,
    pub master_1: f64,
    pub master_2: f64,
    pub master_3: f64,
    pub hero_1: f64,
    pub hero_2: f64,
    pub hero_3: f64,
}

impl Default for CategoryXpMultipliers {
    fn default() -> Self {
        Self {
            adult: 1.0,
            master_1: 1.1,
            master_2: 1.2,
            master_3: 1.3,
            hero_1: 0.7,
            hero_2: 0.8,
            hero_3: 0.9,
        }
    }
}

impl CategoryXpMultipliers {
    /// Every category at ×1.0.
    pub fn neutral() -> Self {
        Self {
            adult: 1.0,
            master_1: 1.0,
            master_2: 1.0,
            master_3: 1.0,
            hero_1: 1.0,
            hero_2: 1.0,
            hero_3: 1.0,
        }
    }

    pub fn for_category(&self, category: StudentCategory) -> f64 {
        match category {
            StudentCategory::Adult => self.adult,
            StudentCategory::Master1 => self.master_1,
            StudentCategory::Master2 => self.master_2,
            StudentCategory::Master3 => self.master_3,
            StudentCategory::Hero1 => self.hero_1,
            StudentCategory::Hero2 => self.hero_2,
            StudentCategory::Hero3 => self.hero_3,
        }
    }

    pub fn all(&self) -> [(StudentCategory, f64); 7] {
        StudentCategory::ALL.map(|c| (c, self.for_category(c)))
    }

    /// Amount actually credited for a positive `amount`; never below 1.
    pub fn apply(&self, category: StudentCategory, source: XpSource, amount: i64) -> i64 {
        if source == XpSource::Bonus {
            return amount;
        }
        ((amount as f64) * self.for_category(category)).round().max(1.0) as i64
    }
}

// =====================================================
// Levels
// =====================================================

/// Cumulative XP thresholds; index `i` is the XP needed for level `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelTable {
    thresholds: Vec<i64>,
}

impl Default for LevelTable {
    fn default() -> Self {
        Self {
            thresholds: LEVEL_THRESHOLDS.to_vec(),
        }
    }
}

impl LevelTable {
    pub fn new(thresholds: Vec<i64>) -> Result<Self, String> {
        let table = Self { thresholds };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.thresholds.first() {
            None => return Err("level thresholds must not be empty".into()),
            Some(&first) if first != 0 => {
                return Err(format!("first level threshold must be 0, got {}", first))
            }
            _ => {}
        }
        for pair in self.thresholds.windows(2) {
            if pair[1] <= pair[0] {
                return Err(format!(
                    "level thresholds must be strictly increasing ({} then {})",
                    pair[0], pair[1]
                ));
            }
        }
        Ok(())
    }

    pub fn max_level(&self) -> u32 {
        self.thresholds.len() as u32
    }

    pub fn thresholds(&self) -> &[i64] {
        &self.thresholds
    }

    /// Level for a total. Monotonic step function; negative totals are level 1.
    pub fn level(&self, total_xp: i64) -> u32 {
        let reached = self.thresholds.partition_point(|&t| t <= total_xp);
        reached.max(1) as u32
    }

    /// XP still needed for the next level, 0 at the top level.
    pub fn xp_to_next_level(&self, total_xp: i64) -> i64 {
        let level = self.level(total_xp) as usize;
        match self.thresholds.get(level) {
            Some(&next) => (next - total_xp).max(0),
            None => 0,
        }
    }

    /// Percent of the way from the current level's threshold to the next.
    pub fn progress_to_next_level(&self, total_xp: i64) -> f64 {
        let level = self.level(total_xp) as usize;
        let current = self.thresholds.get(level - 1).copied().unwrap_or(0);
        match self.thresholds.get(level) {
            Some(&next) => {
                let span = (next - current) as f64;
                (((total_xp - current).max(0) as f64 / span) * 100.0).clamp(0.0, 100.0)
            }
            None => 100.0,
        }
    }
}
