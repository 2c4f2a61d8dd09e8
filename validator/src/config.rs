use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ibft_validator_set::ProposerPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Cluster parameters, loadable from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of in-process validators.
    pub validators: usize,
    /// Stop once every validator's chain reaches this height.
    pub target_height: u64,
    /// Base round timeout in milliseconds.
    pub round_timeout_ms: u64,
    /// Per-round backoff added on top of the base timeout.
    pub round_backoff_ms: u64,
    pub proposer_policy: ProposerPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            target_height: 5,
            round_timeout_ms: 3000,
            round_backoff_ms: 500,
            proposer_policy: ProposerPolicy::RoundRobin,
        }
    }
}

impl ClusterConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validators == 0 {
            return Err(ConfigError::Invalid("validator count must be positive".into()));
        }
        if self.target_height == 0 {
            return Err(ConfigError::Invalid("target height must be positive".into()));
        }
        if self.round_timeout_ms == 0 {
            return Err(ConfigError::Invalid("round timeout must be positive".into()));
        }
        Ok(())
    }

    /// How many Byzantine validators this cluster size tolerates.
    pub fn fault_tolerance(&self) -> usize {
        self.validators.saturating_sub(1) / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ClusterConfig::default();
        config.validate().expect("default config should be valid");
        assert_eq!(config.fault_tolerance(), 1);
    }

    #[test]
    fn test_zero_validators_rejected() {
        let config = ClusterConfig {
            validators: 0,
            ..ClusterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_through_file() {
        let config = ClusterConfig {
            validators: 7,
            target_height: 10,
            ..ClusterConfig::default()
        };
        let tmp = std::env::temp_dir().join("ibft_test_cluster.json");
        std::fs::write(&tmp, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ClusterConfig::from_file(&tmp).expect("config read should succeed");
        assert_eq!(loaded.validators, 7);
        assert_eq!(loaded.target_height, 10);
        assert_eq!(loaded.fault_tolerance(), 2);

        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = std::env::temp_dir().join("ibft_test_partial.json");
        std::fs::write(&tmp, r#"{ "validators": 10 }"#).unwrap();

        let loaded = ClusterConfig::from_file(&tmp).expect("partial config parses");
        assert_eq!(loaded.validators, 10);
        assert_eq!(loaded.target_height, ClusterConfig::default().target_height);

        let _ = std::fs::remove_file(&tmp);
    }
}
