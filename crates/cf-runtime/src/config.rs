use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Dimensions that carry acquisition bookkeeping or tag codes rather than
/// marker intensities; pairwise statistics skip them unless asked for.
pub const DEFAULT_PAIRWISE_EXCLUDED_DIMS: &[&str] = &[
    "Cell Length",
    "Time",
    "191-DNA",
    "193-DNA",
    "103-Viability",
    "cluster_name",
    "stim",
    "cluster_num",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound, in values, on one batch of materialized windows.
    pub window_batch_values: usize,
    pub min_pair_samples: usize,
    pub pairwise_excluded_dims: Vec<String>,
    pub mutual_information_bins: usize,
    /// Histogram bins behind the `gaussian_fit` column of `Table::stats`.
    pub gaussian_fit_bins: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_batch_values: 50_000_000,
            min_pair_samples: 100,
            pairwise_excluded_dims: DEFAULT_PAIRWISE_EXCLUDED_DIMS
                .iter()
                .map(|dim| (*dim).to_owned())
                .collect(),
            mutual_information_bins: 32,
            gaussian_fit_bins: 100,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, RuntimeError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.window_batch_values == 0 {
            return Err(RuntimeError::InvalidSetting {
                field: "window_batch_values",
                requirement: "greater than zero",
            });
        }
        if self.mutual_information_bins < 2 {
            return Err(RuntimeError::InvalidSetting {
                field: "mutual_information_bins",
                requirement: "at least 2",
            });
        }
        if self.gaussian_fit_bins == 0 {
            return Err(RuntimeError::InvalidSetting {
                field: "gaussian_fit_bins",
                requirement: "greater than zero",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn with_window_batch_values(mut self, values: usize) -> Self {
        self.window_batch_values = values;
        self
    }

    #[must_use]
    pub fn with_min_pair_samples(mut self, samples: usize) -> Self {
        self.min_pair_samples = samples;
        self
    }

    #[must_use]
    pub fn with_pairwise_excluded_dims(mut self, dims: Vec<String>) -> Self {
        self.pairwise_excluded_dims = dims;
        self
    }

    #[must_use]
    pub fn with_gaussian_fit_bins(mut self, bins: usize) -> Self {
        self.gaussian_fit_bins = bins;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"min_pair_samples": 10}"#).expect("config");
        assert_eq!(config.min_pair_samples, 10);
        assert_eq!(config.window_batch_values, 50_000_000);
        assert!(config.pairwise_excluded_dims.iter().any(|dim| dim == "Time"));
    }

    #[test]
    fn zero_batch_budget_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"window_batch_values": 0}"#)
            .expect_err("must fail");
        assert_eq!(
            err.to_string(),
            "invalid engine configuration: window_batch_values must be greater than zero"
        );
    }
}
