//! Three-state circuit breaker.
//!
//! State transitions happen under a single mutex; `state()` is a cheap
//! atomic read so the `allow()` fast path in the closed/half-open case
//! never needs to take the lock.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use typed_builder::TypedBuilder;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that trip the breaker open.
    pub failure_threshold: u32,
    /// Consecutive successes (while half-open) needed to close the breaker.
    pub success_threshold: u32,
    /// How long the breaker stays open before probing again.
    pub timeout: Duration,
}

struct Inner {
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_time: Option<DateTime<Utc>>,
}

/// Failure isolation for calls against an unreliable target.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_time: None,
            }),
            clock,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether a call may proceed right now. In `Open` state, transitions
    /// to `HalfOpen` if the timeout has elapsed.
    pub fn allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                let elapsed = inner
                    .last_failure_time
                    .map(|t| self.clock.now() - t >= chrono_duration(self.config.timeout))
                    .unwrap_or(false);

                if elapsed {
                    inner.consecutive_successes = 0;
                    self.state
                        .store(CircuitState::HalfOpen as u8, Ordering::Release);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match self.state() {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    self.state.store(CircuitState::Closed as u8, Ordering::Release);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match self.state() {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.last_failure_time = Some(self.clock.now());
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.state.store(CircuitState::Open as u8, Ordering::Release);
                }
            }
            CircuitState::HalfOpen => {
                inner.last_failure_time = Some(self.clock.now());
                inner.consecutive_successes = 0;
                self.state.store(CircuitState::Open as u8, Ordering::Release);
            }
            CircuitState::Open => {
                inner.last_failure_time = Some(self.clock.now());
            }
        }
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(f: u32, s: u32, timeout: Duration) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new("2025-01-01T00:00:00Z".parse().unwrap()));
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_threshold(f)
                .success_threshold(s)
                .timeout(timeout)
                .build(),
            clock.clone(),
        );
        (breaker, clock)
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let (cb, _clock) = breaker(3, 2, Duration::from_millis(50));
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let (cb, _clock) = breaker(3, 2, Duration::from_millis(50));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // Would have tripped at 3 consecutive without the reset.
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn full_lifecycle_closed_open_half_open_closed() {
        let (cb, clock) = breaker(3, 2, Duration::from_millis(50));
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.allow());

        clock.advance(chrono::Duration::milliseconds(60));
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn half_open_failure_reopens() {
        let (cb, clock) = breaker(2, 2, Duration::from_millis(10));
        cb.record_failure();
        cb.record_failure();
        clock.advance(chrono::Duration::milliseconds(20));
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());
    }
}
