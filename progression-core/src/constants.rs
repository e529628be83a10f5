//! Centralized progression constants for the academy core.
//!
//! Default policy values used by `EngineConfig::default()`. Every value here
//! can be overridden through configuration; engine services read the config,
//! never these constants directly.

// =====================================================
// Levels
// =====================================================

/// Cumulative XP required to reach each level (index 0 = level 1)
pub const LEVEL_THRESHOLDS: [i64; 20] = [
    0, 100, 250, 450, 700, 1000, 1350, 1750, 2200, 2700, 3250, 3850, 4500, 5200, 5950, 6750,
    7600, 8500, 9450, 10450,
];

// =====================================================
// Check-in rewards
// =====================================================

/// Base XP for attending a class
pub const CHECK_IN_BASE_XP: i64 = 50;

/// Extra XP per technique practiced during the class
pub const CHECK_IN_TECHNIQUE_XP: i64 = 10;

/// Bonus for the first check-in of a calendar month
pub const FIRST_OF_MONTH_BONUS_XP: i64 = 25;

/// Streak length (days) → multiplier applied to the base check-in XP
pub const STREAK_MULTIPLIERS: [(u32, f64); 4] = [(7, 1.5), (30, 2.0), (60, 2.5), (100, 3.0)];

/// Largest gap in days between check-ins that keeps a streak alive
pub const STREAK_GRACE_DAYS: i64 = 3;

// =====================================================
// Rewards
// =====================================================

/// XP credited the first time a technique reaches Mastered
pub const TECHNIQUE_MASTERY_XP: i64 = 50;

/// XP credited when a belt degree is recorded
pub const DEGREE_XP: i64 = 100;

/// Instructor bonus bounds (inclusive)
pub const BONUS_MIN_XP: i64 = 1;
pub const BONUS_MAX_XP: i64 = 500;

/// Evaluation XP: bonus per 5 points above the reference score
pub const EVALUATION_STEP_XP: i64 = 10;
pub const EVALUATION_REFERENCE_SCORE: f64 = 70.0;
pub const EVALUATION_PASS_BONUS_XP: i64 = 50;
pub const EVALUATION_MIN_XP: i64 = 25;

// =====================================================
// Graduation
// =====================================================

/// Number of degrees before a belt change
pub const MAX_DEGREE: u8 = 4;

/// Share of the course (percent) that makes up one degree
pub const DEGREE_STEP_PERCENT: u32 = 20;

/// Minimum attendance rate for belt eligibility and evaluations
pub const MIN_ATTENDANCE_RATE: f64 = 0.8;

/// Minimum share of required techniques at Proficient or above
pub const MIN_TECHNIQUE_COVERAGE: f64 = 0.7;

/// Minimum months enrolled before a belt change
pub const MIN_MONTHS_ENROLLED: u32 = 3;

// =====================================================
// Dropout risk
// =====================================================

/// Risk score boundaries: below LOW → Low, below MEDIUM → Medium, below HIGH → High
pub const RISK_LOW_BELOW: u32 = 25;
pub const RISK_MEDIUM_BELOW: u32 = 50;
pub const RISK_HIGH_BELOW: u32 = 75;

/// Check-ins needed before the estimate reaches full confidence
pub const RISK_FULL_CONFIDENCE_CHECK_INS: usize = 10;

// =====================================================
// Challenges
// =====================================================

/// Weeks covered by the standard challenge template
pub const CHALLENGE_TEMPLATE_WEEKS: u32 = 24;

/// Leaderboard default page size
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 50;
