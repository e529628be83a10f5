use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::adjuster::MultiplierTable;
use crate::attendance::CheckInPolicy;
use crate::constants::{BONUS_MAX_XP, BONUS_MIN_XP, DEGREE_XP, TECHNIQUE_MASTERY_XP};
use crate::error::{ProgressionError, ProgressionResult};
use crate::evaluations::{default_schedule, EvaluationCheckpoint, EvaluationXpPolicy};
use crate::graduation::{CompletionWeights, GraduationPolicy};
use crate::ledger::{CategoryXpMultipliers, LevelTable};
use crate::recommendations::RecommendationPolicy;
use crate::risk::RiskPolicy;

/// Every tunable table the engine uses. Missing fields in a config file
/// fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub levels: LevelTable,
    pub multipliers: MultiplierTable,
    pub xp_multipliers: CategoryXpMultipliers,
    pub bonus_min_xp: i64,
    pub bonus_max_xp: i64,
    pub check_in: CheckInPolicy,
    pub technique_mastery_xp: i64,
    pub degree_xp: i64,
    pub evaluation_schedule: Vec<EvaluationCheckpoint>,
    pub evaluation_xp: EvaluationXpPolicy,
    pub graduation: GraduationPolicy,
    pub completion: CompletionWeights,
    pub risk: RiskPolicy,
    pub recommendations: RecommendationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            levels: LevelTable::default(),
            multipliers: MultiplierTable::standard(),
            xp_multipliers: CategoryXpMultipliers::default(),
            bonus_min_xp: BONUS_MIN_XP,
            bonus_max_xp: BONUS_MAX_XP,
            check_in: CheckInPolicy::default(),
            technique_mastery_xp: TECHNIQUE_MASTERY_XP,
            degree_xp: DEGREE_XP,
            evaluation_schedule: default_schedule(),
            evaluation_xp: EvaluationXpPolicy::default(),
            graduation: GraduationPolicy::default(),
            completion: CompletionWeights::default(),
            risk: RiskPolicy::default(),
            recommendations: RecommendationPolicy::default(),
        }
    }
}

fn fraction(name: &str, value: f64) -> ProgressionResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ProgressionError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

impl EngineConfig {
    /// Load from a `.json` or `.ron` file and validate.
    pub fn load(path: impl AsRef<Path>) -> ProgressionResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProgressionError::Config(format!("read {}: {}", path.display(), e)))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("ron") => Self::from_ron(&content)?,
            Some("json") | None => Self::from_json(&content)?,
            Some(other) => {
                return Err(ProgressionError::Config(format!(
                    "unsupported config extension: {}",
                    other
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> ProgressionResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| ProgressionError::Config(format!("JSON parse error: {}", e)))
    }

    pub fn from_ron(content: &str) -> ProgressionResult<Self> {
        ron::from_str(content).map_err(|e| ProgressionError::Config(format!("RON parse error: {}", e)))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> ProgressionResult<()> {
        self.levels.validate().map_err(ProgressionError::Config)?;

        if let Some((profile, m)) = self.multipliers.iter().find(|(_, m)| !(**m >= 0.0)) {
            return Err(ProgressionError::Config(format!(
                "multiplier for {:?} must be non-negative, got {}",
                profile, m
            )));
        }

        if let Some((category, m)) = self.xp_multipliers.all().into_iter().find(|(_, m)| !(*m > 0.0)) {
            return Err(ProgressionError::Config(format!(
                "XP multiplier for {} must be positive, got {}",
                category.as_str(),
                m
            )));
        }

        if self.bonus_min_xp < 1 || self.bonus_min_xp > self.bonus_max_xp {
            return Err(ProgressionError::Config(format!(
                "bonus range must satisfy 1 <= min <= max, got {}..={}",
                self.bonus_min_xp, self.bonus_max_xp
            )));
        }
        if self.technique_mastery_xp < 0 || self.degree_xp < 0 || self.check_in.base_xp < 0 {
            return Err(ProgressionError::Config("reward amounts must be non-negative".into()));
        }
        if self.check_in.streak_tiers.iter().any(|t| t.multiplier < 1.0) {
            return Err(ProgressionError::Config("streak multipliers must be at least 1.0".into()));
        }

        let g = &self.graduation;
        if g.degree_step_percent == 0 || g.degree_step_percent > 100 {
            return Err(ProgressionError::Config(format!(
                "degree_step_percent must be within 1..=100, got {}",
                g.degree_step_percent
            )));
        }
        if g.max_degree == 0 {
            return Err(ProgressionError::Config("max_degree must be at least 1".into()));
        }
        fraction("graduation.min_attendance_rate", g.min_attendance_rate)?;
        fraction("graduation.min_technique_coverage", g.min_technique_coverage)?;

        let w = &self.completion;
        for (name, v) in [
            ("completion.attendance", w.attendance),
            ("completion.techniques", w.techniques),
            ("completion.challenges", w.challenges),
            ("completion.evaluations", w.evaluations),
        ] {
            fraction(name, v)?;
        }

        let r = &self.risk;
        if !(r.low_below < r.medium_below && r.medium_below < r.high_below && r.high_below <= 100) {
            return Err(ProgressionError::Config(format!(
                "risk thresholds must increase: {} < {} < {} <= 100",
                r.low_below, r.medium_below, r.high_below
            )));
        }
        for band in r.attendance.iter().chain(&r.velocity).chain(&r.challenges) {
            fraction("risk band", band.below)?;
        }
        fraction(
            "recommendations.min_attendance_rate",
            self.recommendations.min_attendance_rate,
        )?;

        let mut lessons: Vec<u32> = self.evaluation_schedule.iter().map(|c| c.lesson).collect();
        lessons.sort_unstable();
        lessons.dedup();
        if lessons.len() != self.evaluation_schedule.len() {
            return Err(ProgressionError::Config(
                "evaluation checkpoints must have distinct lessons".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_load_json_with_partial_overrides() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{ "bonus_max_xp": 250, "degree_xp": 150 }}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.bonus_max_xp, 250);
        assert_eq!(config.degree_xp, 150);
        assert_eq!(config.bonus_min_xp, BONUS_MIN_XP);
        assert_eq!(config.levels.max_level(), 20);
    }

    #[test]
    fn test_load_ron() {
        let mut file = tempfile::Builder::new().suffix(".ron").tempfile().unwrap();
        write!(file, "(technique_mastery_xp: 75, levels: [0, 10, 20])").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.technique_mastery_xp, 75);
        assert_eq!(config.levels.level(15), 2);
    }

    #[test]
    fn test_invalid_bonus_range_rejected() {
        let config = EngineConfig {
            bonus_min_xp: 10,
            bonus_max_xp: 5,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ProgressionError::Config(_))));
    }

    #[test]
    fn test_invalid_levels_rejected_on_load() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "levels": [0, 100, 50] }}"#).unwrap();
        // no extension: parsed as JSON
        assert!(EngineConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_zero_xp_multiplier_rejected() {
        let mut config = EngineConfig::default();
        config.xp_multipliers.hero_2 = 0.0;
        assert!(matches!(config.validate(), Err(ProgressionError::Config(_))));
    }

    #[test]
    fn test_risk_thresholds_must_increase() {
        let mut config = EngineConfig::default();
        config.risk.medium_below = config.risk.low_below;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/progression.json");
        let shipped = EngineConfig::load(path).unwrap();
        let defaults = EngineConfig::default();
        assert_eq!(shipped.levels, defaults.levels);
        assert_eq!(shipped.xp_multipliers, defaults.xp_multipliers);
        assert_eq!(shipped.check_in, defaults.check_in);
        assert_eq!(shipped.evaluation_schedule, defaults.evaluation_schedule);
        assert_eq!(shipped.graduation, defaults.graduation);
        assert_eq!(shipped.recommendations, defaults.recommendations);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ProgressionError::Config(_))
        ));
    }
}
