use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::retry::RetryPolicy;

/// Stateful delay generator for a single retried operation.
///
/// Each delay is drawn uniformly from `[current * (1 - f), current * (1 + f)]` where `f` is the
/// randomization factor clamped to `[0, 1]`, after which `current` grows by the multiplier up to
/// the max interval.
#[derive(Debug)]
pub struct ExponentialBackoff {
    current: Duration,
    randomization_factor: f64,
    multiplier: f64,
    max_interval: Duration,
    max_elapsed_time: Option<Duration>,
    started_at: Instant,
}

impl ExponentialBackoff {
    /// Starts a new backoff sequence. The elapsed-time budget is measured from this call.
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            current: policy.initial_interval,
            randomization_factor: clamp_randomization_factor(policy.randomization_factor),
            multiplier: policy.multiplier,
            max_interval: policy.max_interval,
            max_elapsed_time: policy.max_elapsed_time,
            started_at: Instant::now(),
        }
    }

    /// Time spent since the sequence started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the next delay, or [`None`] when waiting it out would exceed the
    /// elapsed-time budget.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.randomized(self.current);

        let grown_nanos = (self.current.as_nanos() as f64 * self.multiplier).round();
        self.current = if grown_nanos >= self.max_interval.as_nanos() as f64 {
            self.max_interval
        } else {
            Duration::from_nanos(grown_nanos as u64)
        };

        if let Some(max_elapsed_time) = self.max_elapsed_time {
            if self.elapsed() + delay > max_elapsed_time {
                return None;
            }
        }

        Some(delay)
    }

    fn randomized(&self, interval: Duration) -> Duration {
        if self.randomization_factor <= 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let (low, high) = (secs - delta, secs + delta);
        if high <= low {
            return interval;
        }

        Duration::from_secs_f64(rand::thread_rng().gen_range(low..=high))
    }
}

/// Keeps the jitter window non-negative. NaN disables jitter.
fn clamp_randomization_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}
