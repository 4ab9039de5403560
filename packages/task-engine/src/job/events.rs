//! Lifecycle events emitted by the scheduler (expansion, component L).
//!
//! The default sink only logs via `tracing`, but callers that need
//! in-process observability can supply their own [`EventSink`].

use std::time::Duration;

use crate::error::EngineError;

/// A point-in-time occurrence in a job's lifecycle.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Registered { job_id: String },
    Scheduled { job_id: String, next_run: chrono::DateTime<chrono::Utc> },
    Started { job_id: String, attempt: u32 },
    Succeeded { job_id: String, duration: Duration },
    RetryScheduled { job_id: String, attempt: u32, backoff: Duration },
    DeadLettered { job_id: String, error: EngineError },
    Cancelled { job_id: String },
}

/// An in-process observer of [`JobEvent`]s. Implementations must not block;
/// the scheduler calls this synchronously on its tick/execution path.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: JobEvent);
}

/// Default sink: every event becomes a `tracing` line at an appropriate
/// level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_event(&self, event: JobEvent) {
        match event {
            JobEvent::Registered { job_id } => {
                tracing::debug!(job_id, "job registered");
            }
            JobEvent::Scheduled { job_id, next_run } => {
                tracing::debug!(job_id, %next_run, "job scheduled");
            }
            JobEvent::Started { job_id, attempt } => {
                tracing::info!(job_id, attempt, "job started");
            }
            JobEvent::Succeeded { job_id, duration } => {
                tracing::info!(job_id, ?duration, "job succeeded");
            }
            JobEvent::RetryScheduled { job_id, attempt, backoff } => {
                tracing::warn!(job_id, attempt, ?backoff, "job retry scheduled");
            }
            JobEvent::DeadLettered { job_id, error } => {
                tracing::error!(job_id, %error, "job dead-lettered");
            }
            JobEvent::Cancelled { job_id } => {
                tracing::warn!(job_id, "job cancelled");
            }
        }
    }
}
