use serde::Serialize;

use crate::error::{NpactError, Result};

/// Average published standardized mean difference, used for per-cell
/// (two-sample) implied-power analyses. Taken from the external
/// effect-size literature; not derived anywhere in this codebase.
pub const EFFECT_SIZE_D: f64 = 0.408;

/// Average published correlation, used for per-study implied-power
/// analyses. External convention, same provenance as [`EFFECT_SIZE_D`].
pub const EFFECT_SIZE_R: f64 = 0.20;

/// Two-sided significance level shared by the power and FDR formulas.
pub const ALPHA: f64 = 0.05;

/// Assumed prior probabilities that the null hypothesis is true,
/// evaluated side by side in the error-rate tables.
pub const NULL_PRIORS: [f64; 2] = [0.50, 0.80];

/// Power threshold for the trend extrapolation.
pub const TARGET_POWER: f64 = 0.80;

/// Constants for the implied-power and false-discovery-rate formulas.
///
/// The same `alpha` feeds both formulas; constructing the config through
/// [`AnalysisConfig::validate`] is what guarantees they cannot disagree.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisConfig {
    pub effect_size_d: f64,
    pub effect_size_r: f64,
    pub alpha: f64,
    pub null_priors: Vec<f64>,
    pub target_power: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            effect_size_d: EFFECT_SIZE_D,
            effect_size_r: EFFECT_SIZE_R,
            alpha: ALPHA,
            null_priors: NULL_PRIORS.to_vec(),
            target_power: TARGET_POWER,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(NpactError::Configuration(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.effect_size_d <= 0.0 {
            return Err(NpactError::Configuration(format!(
                "effect_size_d must be positive, got {}",
                self.effect_size_d
            )));
        }
        if !(self.effect_size_r > 0.0 && self.effect_size_r < 1.0) {
            return Err(NpactError::Configuration(format!(
                "effect_size_r must be in (0, 1), got {}",
                self.effect_size_r
            )));
        }
        if self.null_priors.is_empty() {
            return Err(NpactError::Configuration(
                "at least one null prior is required".into(),
            ));
        }
        for &p in &self.null_priors {
            if !(p > 0.0 && p < 1.0) {
                return Err(NpactError::Configuration(format!(
                    "null prior must be in (0, 1), got {p}"
                )));
            }
        }
        if !(self.target_power > 0.0 && self.target_power < 1.0) {
            return Err(NpactError::Configuration(format!(
                "target_power must be in (0, 1), got {}",
                self.target_power
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_alpha_is_rejected() {
        let config = AnalysisConfig {
            alpha: 1.5,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(NpactError::Configuration(_))
        ));
    }

    #[test]
    fn bad_null_prior_is_rejected() {
        let config = AnalysisConfig {
            null_priors: vec![0.5, 0.0],
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
