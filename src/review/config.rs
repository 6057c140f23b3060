use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-user learning parameters. Created lazily with defaults on first use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSettings {
    pub desired_retention: f64,
    pub initial_stability: f64,
    pub initial_difficulty: f64,
    pub promote_stability_multiplier: f64,
    pub promote_difficulty_delta: f64,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            desired_retention: 0.90,
            initial_stability: 1.0,
            initial_difficulty: 5.0,
            promote_stability_multiplier: 0.85,
            promote_difficulty_delta: 0.5,
        }
    }
}

impl LearningSettings {
    pub fn validate(&self) -> Result<(), InvalidSettings> {
        if !(0.0..=1.0).contains(&self.desired_retention) {
            return Err(InvalidSettings(format!(
                "desiredRetention must be within [0, 1], got {}",
                self.desired_retention
            )));
        }
        if !(self.initial_stability.is_finite() && self.initial_stability > 0.0) {
            return Err(InvalidSettings(format!(
                "initialStability must be positive, got {}",
                self.initial_stability
            )));
        }
        if !(1.0..=10.0).contains(&self.initial_difficulty) {
            return Err(InvalidSettings(format!(
                "initialDifficulty must be within [1, 10], got {}",
                self.initial_difficulty
            )));
        }
        if !(self.promote_stability_multiplier.is_finite() && self.promote_stability_multiplier > 0.0)
        {
            return Err(InvalidSettings(format!(
                "promoteStabilityMultiplier must be positive, got {}",
                self.promote_stability_multiplier
            )));
        }
        if !self.promote_difficulty_delta.is_finite() {
            return Err(InvalidSettings(format!(
                "promoteDifficultyDelta must be finite, got {}",
                self.promote_difficulty_delta
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid learning settings: {0}")]
pub struct InvalidSettings(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(LearningSettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let base = LearningSettings::default();

        let zero_stability = LearningSettings {
            initial_stability: 0.0,
            ..base
        };
        assert!(zero_stability.validate().is_err());

        let hard_start = LearningSettings {
            initial_difficulty: 11.0,
            ..base
        };
        assert!(hard_start.validate().is_err());

        let retention = LearningSettings {
            desired_retention: f64::NAN,
            ..base
        };
        assert!(retention.validate().is_err());

        let negative_delta = LearningSettings {
            promote_difficulty_delta: -2.0,
            ..base
        };
        assert!(negative_delta.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(LearningSettings::default()).unwrap();
        assert_eq!(json["promoteStabilityMultiplier"], 0.85);
        assert_eq!(json["initialDifficulty"], 5.0);
    }
}
