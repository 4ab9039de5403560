//! # task-engine
//!
//! A general-purpose concurrent task execution substrate: a worker pool for
//! one-shot batches, a cron-driven scheduler with retry and dead-lettering,
//! a dependency-ordered DAG executor, and the reliability primitives
//! (rate limiter, circuit breaker, bounded queue) that guard dispatch to an
//! unreliable target.
//!
//! ## Layout
//!
//! - [`clock`] — injectable time source, so scheduling and backoff tests
//!   don't sleep in real time.
//! - [`pool`] — [`pool::WorkerPool`], the one-shot batch fan-out executor.
//! - [`job`] — [`job::JobRegistry`] and [`job::Scheduler`], the cron-driven
//!   half: registration, tick loop, retry/backoff, dead-lettering.
//! - [`dag`] — [`dag::JobDAG`], sequential dependency-ordered execution with
//!   failure cascade.
//! - [`rate_limiter`], [`circuit_breaker`], [`queue`] — the reliability
//!   primitives shared by dispatch paths.
//! - [`retry`] — [`retry::RetryPolicy`], exponential backoff with jitter.
//! - [`stats`] — thread-safe counters and per-operation latency percentiles.
//! - [`error`] — the single [`error::EngineError`] taxonomy every component
//!   returns.
//!
//! A caller submits either a one-shot batch of [`pool::WorkItem`]s to a
//! [`pool::WorkerPool`], or registers recurring [`job::JobSpec`]s with a
//! [`job::Scheduler`], or builds a [`dag::JobDAG`] for dependency-ordered
//! batch runs. All three share the same [`error::EngineError`] taxonomy and
//! the same `tokio_util::sync::CancellationToken` cancellation plumbing.

pub mod circuit_breaker;
pub mod clock;
pub mod cron;
pub mod dag;
pub mod error;
pub mod job;
pub mod pool;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
pub mod stats;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cron::CronSpec;
pub use dag::JobDAG;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use job::{
    EventSink, FnJobHandler, JobEvent, JobHandler, JobRuntime, JobSpec, JobStatus, JobView,
    JobRegistry, Scheduler, SchedulerConfig, TracingEventSink,
};
pub use pool::{FnHandler, Handler, ResultValue, TerminalStatus, WorkItem, WorkResult, WorkerPool};
pub use queue::{BoundedQueue, QueueStrategy};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::RetryPolicy;
pub use stats::{Percentiles, Stats, StatsSnapshot};
