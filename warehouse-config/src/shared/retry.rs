use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for retrying transient warehouse failures.
///
/// Controls the exponential backoff used when a query fails with a rate limit or another
/// transient condition. Durations are stored in milliseconds for serialization compatibility.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Delay before the first retry.
    ///
    /// Default: 500ms
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Fraction of the current delay used as the jitter window.
    ///
    /// A value of `0.5` draws each delay from `[0.5 * current, 1.5 * current]`. A value of `0`
    /// disables jitter. Must be within `[0, 1]`.
    /// Default: 0.5
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,

    /// Growth factor applied to the delay after every retry.
    ///
    /// Must be >= 1.0.
    /// Default: 1.5
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound for a single delay.
    ///
    /// Default: 60000ms (60 seconds)
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Maximum number of retries after the first attempt. `0` means unlimited.
    ///
    /// Default: 0
    #[serde(default)]
    pub max_retries: u32,

    /// Maximum wall-clock time spent retrying. `0` means unlimited.
    ///
    /// Default: 900000ms (15 minutes)
    #[serde(default = "default_max_elapsed_time_ms")]
    pub max_elapsed_time_ms: u64,
}

impl RetryConfig {
    /// Default delay before the first retry in milliseconds.
    pub const DEFAULT_INITIAL_INTERVAL_MS: u64 = 500;

    /// Default jitter window as a fraction of the current delay.
    pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

    /// Default backoff growth factor.
    pub const DEFAULT_MULTIPLIER: f64 = 1.5;

    /// Default upper bound for a single delay in milliseconds.
    pub const DEFAULT_MAX_INTERVAL_MS: u64 = 60_000;

    /// Default retry budget in milliseconds.
    pub const DEFAULT_MAX_ELAPSED_TIME_MS: u64 = 900_000;

    /// Returns the initial delay as a [`Duration`].
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Returns the maximum delay as a [`Duration`].
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Returns the retry budget as a [`Duration`], or [`None`] when unlimited.
    pub fn max_elapsed_time(&self) -> Option<Duration> {
        if self.max_elapsed_time_ms == 0 {
            return None;
        }

        Some(Duration::from_millis(self.max_elapsed_time_ms))
    }

    /// Validates retry configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.multiplier >= 1.0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.multiplier".to_string(),
                constraint: "must be greater than or equal to 1.0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.randomization_factor".to_string(),
                constraint: "must be within [0, 1]".to_string(),
            });
        }

        if self.max_interval_ms < self.initial_interval_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.max_interval_ms".to_string(),
                constraint: "must be greater than or equal to `initial_interval_ms`".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval_ms(),
            randomization_factor: default_randomization_factor(),
            multiplier: default_multiplier(),
            max_interval_ms: default_max_interval_ms(),
            max_retries: 0,
            max_elapsed_time_ms: default_max_elapsed_time_ms(),
        }
    }
}

fn default_initial_interval_ms() -> u64 {
    RetryConfig::DEFAULT_INITIAL_INTERVAL_MS
}

fn default_randomization_factor() -> f64 {
    RetryConfig::DEFAULT_RANDOMIZATION_FACTOR
}

fn default_multiplier() -> f64 {
    RetryConfig::DEFAULT_MULTIPLIER
}

fn default_max_interval_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_INTERVAL_MS
}

fn default_max_elapsed_time_ms() -> u64 {
    RetryConfig::DEFAULT_MAX_ELAPSED_TIME_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: RetryConfig = serde_json::from_str(r#"{"max_retries": 3}"#).unwrap();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_interval(), Duration::from_millis(500));
        assert_eq!(config.max_interval(), Duration::from_secs(60));
        assert_eq!(config.max_elapsed_time(), Some(Duration::from_secs(900)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_elapsed_time_means_unlimited() {
        let config = RetryConfig {
            max_elapsed_time_ms: 0,
            ..RetryConfig::default()
        };

        assert_eq!(config.max_elapsed_time(), None);
    }

    #[test]
    fn test_validate_rejects_shrinking_multiplier() {
        let config = RetryConfig {
            multiplier: 0.5,
            ..RetryConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "retry.multiplier"
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_randomization_factor() {
        let config = RetryConfig {
            randomization_factor: 1.5,
            ..RetryConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_max_interval_below_initial() {
        let config = RetryConfig {
            initial_interval_ms: 2_000,
            max_interval_ms: 1_000,
            ..RetryConfig::default()
        };

        assert!(config.validate().is_err());
    }
}
