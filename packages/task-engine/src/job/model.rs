//! [`Job`] data model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::cron::CronSpec;
use crate::error::EngineError;

/// The caller-supplied unit of work a [`crate::job::JobRegistry`] dispatches
/// on a schedule.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn call(&self, cancel: CancellationToken) -> Result<(), EngineError>;
}

/// A plain async closure adapter, for callers who don't need a full
/// `JobHandler` impl.
pub struct FnJobHandler<F>(pub F);

#[async_trait]
impl<F, Fut> JobHandler for FnJobHandler<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), EngineError>> + Send,
{
    async fn call(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        (self.0)(cancel).await
    }
}

/// A job's lifecycle state. `Failed` is terminal for both a DAG cascade
/// failure and a job's own failure (handler error, timeout, exhausted
/// retries, or cancellation mid-run). `JobRuntime::dead_letter` is the
/// orthogonal flag distinguishing "failed because a dependency failed"
/// (false) from "failed on its own and needs attention" (true).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Static definition of a registered job: identity, schedule, and handler.
#[derive(TypedBuilder)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    #[builder(default, setter(strip_option))]
    pub cron: Option<CronSpec>,
    pub handler: Arc<dyn JobHandler>,
    #[builder(default = 0)]
    pub priority: i32,
    pub timeout: Duration,
    #[builder(default = 0)]
    pub max_retries: u32,
    #[builder(default)]
    pub dependencies: Vec<String>,
}

/// Mutable execution state tracked alongside a [`JobSpec`].
#[derive(Debug, Clone)]
pub struct JobRuntime {
    pub status: JobStatus,
    pub retry_counter: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set when this job failed on its own (handler error, timeout,
    /// exhausted retries, cancellation mid-run) rather than via cascade
    /// from a failed dependency. Orthogonal to `status`.
    pub dead_letter: bool,
}

impl Default for JobRuntime {
    fn default() -> Self {
        Self {
            status: JobStatus::Pending,
            retry_counter: 0,
            last_run: None,
            next_run: None,
            last_error: None,
            dead_letter: false,
        }
    }
}

/// Read-only snapshot returned by `GetJob`.
#[derive(Debug, Clone)]
pub struct JobView {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub max_retries: u32,
    pub dependencies: Vec<String>,
    pub status: JobStatus,
    pub retry_counter: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dead_letter: bool,
}
