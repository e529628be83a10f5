//! Metric Adjuster
//!
//! Scales a challenge's base metric or time to a student's profile:
//! `adjusted = round(base × multiplier)`. The multiplier comes from an
//! explicit table keyed by (category, gender, physical condition).
//!
//! A combination missing from a custom table is a configuration gap: the
//! adjuster falls back to ×1.0 and logs a warning instead of failing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::student::{AdjustmentProfile, Gender, PhysicalCondition, StudentCategory};

/// One row of the multiplier table as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiplierEntry {
    pub category: StudentCategory,
    pub gender: Gender,
    pub condition: PhysicalCondition,
    pub multiplier: f64,
}

/// Exhaustively keyed multiplier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<MultiplierEntry>", into = "Vec<MultiplierEntry>")]
pub struct MultiplierTable {
    entries: HashMap<AdjustmentProfile, f64>,
}

/// (male, female) factor per category
fn category_factors(category: StudentCategory) -> (f64, f64) {
    match category {
        StudentCategory::Adult => (1.0, 0.8),
        StudentCategory::Master1 => (0.9, 0.72),
        StudentCategory::Master2 => (0.8, 0.64),
        StudentCategory::Master3 => (0.7, 0.56),
        StudentCategory::Hero1 => (0.6, 0.48),
        StudentCategory::Hero2 => (0.7, 0.56),
        StudentCategory::Hero3 => (0.8, 0.64),
    }
}

fn condition_factor(condition: PhysicalCondition) -> f64 {
    match condition {
        PhysicalCondition::Limited => 0.85,
        PhysicalCondition::Standard => 1.0,
        PhysicalCondition::Conditioned => 1.1,
    }
}

impl MultiplierTable {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Default academy table: category/gender factor times condition factor.
    /// `Unspecified` gender uses the male factor.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        for category in StudentCategory::ALL {
            let (male, female) = category_factors(category);
            for gender in Gender::ALL {
                let base = match gender {
                    Gender::Female => female,
                    Gender::Male | Gender::Unspecified => male,
                };
                for condition in PhysicalCondition::ALL {
                    let m = base * condition_factor(condition);
                    // keep table values at two decimals, as published
                    let m = (m * 100.0).round() / 100.0;
                    table.set(AdjustmentProfile::new(category, gender, condition), m);
                }
            }
        }
        table
    }

    pub fn set(&mut self, profile: AdjustmentProfile, multiplier: f64) {
        self.entries.insert(profile, multiplier);
    }

    pub fn lookup(&self, profile: &AdjustmentProfile) -> Option<f64> {
        self.entries.get(profile).copied()
    }

    /// Multiplier for `profile`, falling back to 1.0 on a configuration gap.
    pub fn multiplier(&self, profile: &AdjustmentProfile) -> f64 {
        match self.lookup(profile) {
            Some(m) => m,
            None => {
                warn!(
                    category = profile.category.as_str(),
                    gender = profile.gender.as_str(),
                    condition = profile.condition.as_str(),
                    "ConfigurationGap: no multiplier configured, using 1.0"
                );
                1.0
            }
        }
    }

    /// `round(base × multiplier)`, never negative.
    pub fn adjust(&self, profile: &AdjustmentProfile, base: u32) -> u32 {
        adjust_with(self.multiplier(profile), base)
    }

    /// Combinations with no configured multiplier.
    pub fn missing_combinations(&self) -> Vec<AdjustmentProfile> {
        let mut missing = Vec::new();
        for category in StudentCategory::ALL {
            for gender in Gender::ALL {
                for condition in PhysicalCondition::ALL {
                    let p = AdjustmentProfile::new(category, gender, condition);
                    if !self.entries.contains_key(&p) {
                        missing.push(p);
                    }
                }
            }
        }
        missing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AdjustmentProfile, &f64)> {
        self.entries.iter()
    }
}

impl Default for MultiplierTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl From<Vec<MultiplierEntry>> for MultiplierTable {
    fn from(rows: Vec<MultiplierEntry>) -> Self {
        let mut table = Self::empty();
        for row in rows {
            table.set(
                AdjustmentProfile::new(row.category, row.gender, row.condition),
                row.multiplier,
            );
        }
        table
    }
}

impl From<MultiplierTable> for Vec<MultiplierEntry> {
    fn from(table: MultiplierTable) -> Self {
        let mut rows: Vec<MultiplierEntry> = table
            .entries
            .into_iter()
            .map(|(p, multiplier)| MultiplierEntry {
                category: p.category,
                gender: p.gender,
                condition: p.condition,
                multiplier,
            })
            .collect();
        rows.sort_by(|a, b| {
            (a.category.as_str(), a.gender.as_str(), a.condition.as_str()).cmp(&(
                b.category.as_str(),
                b.gender.as_str(),
                b.condition.as_str(),
            ))
        });
        rows
    }
}

/// Apply a raw multiplier to a base value.
pub fn adjust_with(multiplier: f64, base: u32) -> u32 {
    let scaled = (base as f64 * multiplier).round();
    if scaled.is_finite() && scaled > 0.0 {
        scaled.min(u32::MAX as f64) as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(c: StudentCategory, g: Gender, p: PhysicalCondition) -> AdjustmentProfile {
        AdjustmentProfile::new(c, g, p)
    }

    #[test]
    fn test_standard_table_is_exhaustive() {
        let table = MultiplierTable::standard();
        assert!(table.missing_combinations().is_empty());
        assert_eq!(table.len(), 7 * 3 * 3);
    }

    #[test]
    fn test_adult_female_standard_is_point_eight() {
        let table = MultiplierTable::standard();
        let p = profile(StudentCategory::Adult, Gender::Female, PhysicalCondition::Standard);
        assert_eq!(table.lookup(&p), Some(0.8));
        assert_eq!(table.adjust(&p, 20), 16);
    }

    #[test]
    fn test_rounding_half_up() {
        assert_eq!(adjust_with(0.72, 25), 18);
        assert_eq!(adjust_with(0.5, 27), 14);
        assert_eq!(adjust_with(0.48, 30), 14);
    }

    #[test]
    fn test_never_negative() {
        assert_eq!(adjust_with(-1.0, 20), 0);
        assert_eq!(adjust_with(f64::NAN, 20), 0);
        assert_eq!(adjust_with(0.5, 0), 0);
    }

    #[test]
    fn test_condition_scales_multiplier() {
        let table = MultiplierTable::standard();
        let limited = profile(StudentCategory::Adult, Gender::Male, PhysicalCondition::Limited);
        let conditioned =
            profile(StudentCategory::Adult, Gender::Male, PhysicalCondition::Conditioned);
        assert_eq!(table.lookup(&limited), Some(0.85));
        assert_eq!(table.lookup(&conditioned), Some(1.1));
    }

    #[test]
    fn test_gap_falls_back_to_identity() {
        let mut table = MultiplierTable::empty();
        let known = profile(StudentCategory::Adult, Gender::Male, PhysicalCondition::Standard);
        table.set(known, 0.5);
        let unknown = profile(StudentCategory::Hero1, Gender::Female, PhysicalCondition::Limited);
        assert_eq!(table.adjust(&known, 40), 20);
        assert_eq!(table.adjust(&unknown, 40), 40);
        assert_eq!(table.missing_combinations().len(), 62);
    }

    #[test]
    fn test_table_serializes_as_rows() {
        let table = MultiplierTable::standard();
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.starts_with('['));
        let parsed: MultiplierTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), table.len());
        let p = profile(StudentCategory::Hero3, Gender::Female, PhysicalCondition::Standard);
        assert!((parsed.lookup(&p).unwrap() - 0.64).abs() < 1e-9);
    }
}
