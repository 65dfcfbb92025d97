//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use alarm_rules::EvaluatorConfig;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for the alarm engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the harvest task re-evaluates entities (in seconds).
    pub evaluation_interval_secs: u64,
    /// Clear alarms of rules without a clear condition as soon as no create
    /// condition matches.
    pub implicit_clear: bool,
    /// How many times a save is retried after a revision conflict.
    pub max_save_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 15,
            implicit_clear: true,
            max_save_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Longest allowed harvest interval (one day).
    pub const MAX_EVALUATION_INTERVAL_SECS: u64 = 86_400;

    /// Most save retries allowed.
    pub const MAX_SAVE_RETRIES: u32 = 100;

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` if the file cannot be read, parsed,
    /// or fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::InvalidConfig {
                reason: format!(
                    "failed to read config file '{}': {e}",
                    path.as_ref().display()
                ),
            }
        })?;

        Self::from_json_str(&content)
    }

    /// Parse configuration from a JSON string. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` if the JSON is invalid or fails
    /// validation.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| EngineError::InvalidConfig {
                reason: format!("invalid JSON: {e}"),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_secs == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "evaluation_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.evaluation_interval_secs > Self::MAX_EVALUATION_INTERVAL_SECS {
            return Err(EngineError::InvalidConfig {
                reason: format!(
                    "evaluation_interval_secs cannot exceed {}",
                    Self::MAX_EVALUATION_INTERVAL_SECS
                ),
            });
        }

        if self.max_save_retries > Self::MAX_SAVE_RETRIES {
            return Err(EngineError::InvalidConfig {
                reason: format!("max_save_retries cannot exceed {}", Self::MAX_SAVE_RETRIES),
            });
        }

        Ok(())
    }

    /// Returns the harvest interval as a [`Duration`].
    #[must_use]
    pub const fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    /// Returns the settings passed to the rule evaluator.
    #[must_use]
    pub const fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            implicit_clear: self.implicit_clear,
        }
    }
}
