//! Exponential backoff with jitter.
//!
//! `fastrand` supplies the jitter draw — a cheap random source without
//! pulling in the full `rand` crate.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::error::EngineError;

/// Exponential backoff schedule with a multiplicative jitter term.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    #[builder(default = 2.0)]
    pub multiplier: f64,
    /// Fraction of the base delay added as jitter, drawn from `U[0, jitter_fraction]`.
    #[builder(default = 0.0)]
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    /// Delay before retry attempt `k` (0-based). `backoff(k) = min(initial *
    /// multiplier^k, max) * (1 + U[0, jitter_fraction])`.
    pub fn backoff(&self, k: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(k as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let jitter = if self.jitter_fraction > 0.0 {
            1.0 + fastrand::f64() * self.jitter_fraction
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }

    /// Whether a job that has already retried `retry_counter` times may
    /// retry again.
    pub fn should_retry(&self, retry_counter: u32) -> bool {
        retry_counter < self.max_retries
    }

    /// Sleep for `backoff(k)`, returning early with `Cancelled` if the
    /// token fires first.
    pub async fn sleep(&self, k: u32, cancel: &CancellationToken) -> Result<(), EngineError> {
        tokio::select! {
            _ = tokio::time::sleep(self.backoff(k)) => Ok(()),
            _ = cancel.cancelled() => Err(EngineError::cancelled("retry-backoff")),
        }
    }
}
