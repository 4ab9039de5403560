//! Holds registered jobs and guards their status transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::EngineError;

use super::model::{JobRuntime, JobSpec, JobStatus, JobView};

struct JobEntry {
    spec: JobSpec,
    runtime: Mutex<JobRuntime>,
}

/// The scheduler's exclusive store of registered jobs. Callers only ever
/// see read-only [`JobView`] snapshots.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `InvalidInput` on empty id, `AlreadyExists` on duplicate.
    pub fn register(&self, spec: JobSpec) -> Result<(), EngineError> {
        if spec.id.is_empty() {
            return Err(EngineError::invalid_input("job id must not be empty"));
        }
        if self.jobs.contains_key(&spec.id) {
            return Err(EngineError::already_exists(spec.id));
        }
        let id = spec.id.clone();
        let entry = Arc::new(JobEntry {
            spec,
            runtime: Mutex::new(JobRuntime::default()),
        });
        self.jobs.insert(id, entry);
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<JobView, EngineError> {
        let entry = self
            .jobs
            .get(id)
            .ok_or_else(|| EngineError::not_found(id))?
            .clone();
        let runtime = entry.runtime.lock().await;
        Ok(view(&entry.spec, &runtime))
    }

    pub async fn dead_letters(&self) -> Vec<JobView> {
        let mut out = Vec::new();
        for entry in self.jobs.iter() {
            let runtime = entry.runtime.lock().await;
            if runtime.dead_letter {
                out.push(view(&entry.spec, &runtime));
            }
        }
        out
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn cron_of(&self, id: &str) -> Option<crate::cron::CronSpec> {
        self.jobs.get(id).and_then(|e| e.spec.cron.clone())
    }

    pub(crate) fn priority_of(&self, id: &str) -> i32 {
        self.jobs.get(id).map(|e| e.spec.priority).unwrap_or(0)
    }

    pub(crate) fn timeout_of(&self, id: &str) -> std::time::Duration {
        self.jobs
            .get(id)
            .map(|e| e.spec.timeout)
            .unwrap_or(std::time::Duration::from_secs(0))
    }

    pub(crate) fn max_retries_of(&self, id: &str) -> u32 {
        self.jobs.get(id).map(|e| e.spec.max_retries).unwrap_or(0)
    }

    pub(crate) fn handler_of(&self, id: &str) -> Option<Arc<dyn super::model::JobHandler>> {
        self.jobs.get(id).map(|e| e.spec.handler.clone())
    }

    pub(crate) fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.jobs
            .get(id)
            .map(|e| e.spec.dependencies.clone())
            .unwrap_or_default()
    }

    /// Try to atomically move `id` from a non-running state into `Running`.
    /// Returns `false` if another worker already holds it.
    pub(crate) async fn try_start(&self, id: &str, start_time: DateTime<Utc>) -> bool {
        let Some(entry) = self.jobs.get(id).map(|e| e.clone()) else {
            return false;
        };
        let mut runtime = entry.runtime.lock().await;
        if runtime.status == JobStatus::Running {
            return false;
        }
        runtime.status = JobStatus::Running;
        runtime.last_run = Some(start_time);
        true
    }

    pub(crate) async fn mark_completed(&self, id: &str) {
        if let Some(entry) = self.jobs.get(id).map(|e| e.clone()) {
            let mut runtime = entry.runtime.lock().await;
            runtime.status = JobStatus::Completed;
            runtime.retry_counter = 0;
            runtime.last_error = None;
            runtime.dead_letter = false;
        }
    }

    pub(crate) async fn mark_pending_retry(&self, id: &str, retry_counter: u32) {
        if let Some(entry) = self.jobs.get(id).map(|e| e.clone()) {
            let mut runtime = entry.runtime.lock().await;
            runtime.status = JobStatus::Pending;
            runtime.retry_counter = retry_counter;
        }
    }

    /// A job failed on its own — handler error, timeout, exhausted
    /// retries, or cancellation mid-run. Sets the terminal `Failed`
    /// status and flags it as dead-lettered, distinct from a cascade
    /// failure inherited from a dependency.
    pub(crate) async fn mark_failed(&self, id: &str, error: impl Into<String>) {
        if let Some(entry) = self.jobs.get(id).map(|e| e.clone()) {
            let mut runtime = entry.runtime.lock().await;
            runtime.status = JobStatus::Failed;
            runtime.last_error = Some(error.into());
            runtime.dead_letter = true;
        }
    }

    /// Cascade failure from a failed dependency without running the
    /// handler. Reaches the same terminal `Failed` status as
    /// `mark_failed`, but leaves `dead_letter` unset since the root
    /// cause is the dependency, not this job.
    pub(crate) async fn mark_failed_cascade(&self, id: &str, error: impl Into<String>) {
        if let Some(entry) = self.jobs.get(id).map(|e| e.clone()) {
            let mut runtime = entry.runtime.lock().await;
            runtime.status = JobStatus::Failed;
            runtime.last_error = Some(error.into());
        }
    }

    pub(crate) async fn status_of(&self, id: &str) -> Option<JobStatus> {
        let entry = self.jobs.get(id)?.clone();
        let runtime = entry.runtime.lock().await;
        Some(runtime.status)
    }

    pub(crate) async fn set_next_run(&self, id: &str, next_run: Option<DateTime<Utc>>) {
        if let Some(entry) = self.jobs.get(id).map(|e| e.clone()) {
            let mut runtime = entry.runtime.lock().await;
            runtime.next_run = next_run;
        }
    }

    pub(crate) async fn reference_time(&self, id: &str, scheduler_start: DateTime<Utc>) -> DateTime<Utc> {
        let Some(entry) = self.jobs.get(id).map(|e| e.clone()) else {
            return scheduler_start;
        };
        let runtime = entry.runtime.lock().await;
        runtime.next_run.or(runtime.last_run).unwrap_or(scheduler_start)
    }
}

fn view(spec: &JobSpec, runtime: &JobRuntime) -> JobView {
    JobView {
        id: spec.id.clone(),
        name: spec.name.clone(),
        priority: spec.priority,
        max_retries: spec.max_retries,
        dependencies: spec.dependencies.clone(),
        status: runtime.status,
        retry_counter: runtime.retry_counter,
        last_run: runtime.last_run,
        next_run: runtime.next_run,
        last_error: runtime.last_error.clone(),
        dead_letter: runtime.dead_letter,
    }
}
