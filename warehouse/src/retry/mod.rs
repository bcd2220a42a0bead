//! Retry of transient warehouse failures with exponential backoff.
//!
//! The engine is warehouse agnostic: which failures are worth retrying is decided by an
//! [`ErrorClassifier`] supplied by the driver, while [`RetryPolicy`] controls how long and how
//! often the engine keeps trying.

mod backoff;
mod executor;

use std::time::Duration;

use warehouse_config::shared::RetryConfig;

use crate::error::WarehouseError;

pub use backoff::ExponentialBackoff;
pub use executor::{execute_with_retry, with_cancellation};

/// Immutable retry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub randomization_factor: f64,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Retries allowed after the first attempt. `0` means unlimited.
    pub max_retries: u32,
    /// Wall-clock budget for the whole operation, [`None`] when unlimited.
    pub max_elapsed_time: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_interval: config.initial_interval(),
            randomization_factor: config.randomization_factor,
            multiplier: config.multiplier,
            max_interval: config.max_interval(),
            max_retries: config.max_retries,
            max_elapsed_time: config.max_elapsed_time(),
        }
    }
}

/// How a failure should be treated by the retry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The warehouse throttled the request.
    RateLimit,
    /// Any other failure expected to go away on its own.
    Transient,
    /// Retrying would produce the same failure.
    Permanent,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }

    /// Value of the `cause` metric label.
    pub fn as_label(self) -> &'static str {
        match self {
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

/// Decides whether a failure is worth retrying.
pub trait ErrorClassifier {
    fn classify(&self, error: &WarehouseError) -> ErrorClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&WarehouseError) -> ErrorClass,
{
    fn classify(&self, error: &WarehouseError) -> ErrorClass {
        self(error)
    }
}
