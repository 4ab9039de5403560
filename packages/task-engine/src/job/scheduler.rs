//! Tick loop, due-job dispatch, retry/backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::clock::Clock;
use crate::error::{EngineError, ErrorKind};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::stats::Stats;

use super::events::{EventSink, JobEvent, TracingEventSink};
use super::model::{JobSpec, JobStatus, JobView};
use super::registry::JobRegistry;

/// Configuration for a [`Scheduler`].
pub struct SchedulerConfig {
    pub workers: usize,
    pub tick_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub circuit_breaker_config: Option<CircuitBreakerConfig>,
    pub event_sink: Arc<dyn EventSink>,
}

impl SchedulerConfig {
    pub fn new(workers: usize, retry_policy: RetryPolicy) -> Self {
        Self {
            workers: workers.max(1),
            tick_interval: Duration::from_secs(60),
            retry_policy,
            rate_limiter: None,
            circuit_breaker_config: None,
            event_sink: Arc::new(TracingEventSink),
        }
    }
}

/// Owns a [`JobRegistry`], ticks on a clock, and dispatches due jobs under a
/// bounded concurrency limit (standing in for dispatch "through the
/// WorkerPool" — job handlers take only a cancellation token, so concurrency
/// here is governed directly by a semaphore rather than the batch
/// `WorkerPool`, which is item-shaped).
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    semaphore: Arc<Semaphore>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    stats: Arc<Stats>,
    scheduler_start: std::sync::OnceLock<chrono::DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.workers));
        Self {
            registry: Arc::new(JobRegistry::new()),
            clock,
            config,
            semaphore,
            breakers: DashMap::new(),
            stats: Arc::new(Stats::new()),
            scheduler_start: std::sync::OnceLock::new(),
        }
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn register(&self, spec: JobSpec) -> Result<(), EngineError> {
        let id = spec.id.clone();
        self.registry.register(spec)?;
        self.config.event_sink.on_event(JobEvent::Registered { job_id: id });
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<JobView, EngineError> {
        self.registry.get_job(id).await
    }

    /// Run the tick loop until `cancel` fires. Each tick snapshots due jobs,
    /// recomputes their cron next-run, and dispatches them.
    pub async fn start(&self, cancel: CancellationToken) {
        let _ = self.scheduler_start.set(self.clock.now());
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(&cancel).await;
                }
            }
        }
    }

    /// Signal shutdown and wait for every in-flight dispatch to finish.
    /// Idempotent: cancelling an already-cancelled token is a no-op, and
    /// acquiring the semaphore's permits after they've already drained
    /// back just resolves immediately.
    pub async fn stop(&self, cancel: &CancellationToken) {
        cancel.cancel();
        let workers = self.config.workers as u32;
        if let Ok(permits) = self.semaphore.acquire_many(workers).await {
            drop(permits);
        }
    }

    /// Run exactly one tick (exposed separately so tests can drive it
    /// without waiting on real wall-clock intervals).
    pub async fn tick(&self, cancel: &CancellationToken) {
        let start = self.scheduler_start.get_or_init(|| self.clock.now());
        let now = self.clock.now();

        for id in self.registry.job_ids() {
            let Some(cron) = self.registry.cron_of(&id) else { continue };
            if self.registry.status_of(&id).await == Some(JobStatus::Running) {
                continue;
            }

            let reference = self.registry.reference_time(&id, *start).await;
            let next_run = match cron.next_run(reference) {
                Ok(t) => t,
                Err(_) => continue,
            };
            self.registry.set_next_run(&id, Some(next_run)).await;
            self.config.event_sink.on_event(JobEvent::Scheduled {
                job_id: id.clone(),
                next_run,
            });

            if now >= next_run {
                self.dispatch(id, cancel.clone()).await;
            }
        }
    }

    fn breaker_for(&self, id: &str) -> Option<Arc<CircuitBreaker>> {
        let cfg = self.config.circuit_breaker_config.clone()?;
        Some(
            self.breakers
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(cfg, self.clock.clone())))
                .clone(),
        )
    }

    async fn dispatch(&self, id: String, cancel: CancellationToken) {
        if let Some(limiter) = &self.config.rate_limiter {
            if !limiter.allow(&id) {
                return;
            }
        }
        if let Some(breaker) = self.breaker_for(&id) {
            if !breaker.allow() {
                return;
            }
        }

        if !self.registry.try_start(&id, self.clock.now()).await {
            return;
        }

        let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore not closed");
        let registry = self.registry.clone();
        let retry_policy = self.config.retry_policy.clone();
        let event_sink = self.config.event_sink.clone();
        let stats = self.stats.clone();
        let breaker = self.breaker_for(&id);
        let clock = self.clock.clone();

        tokio::spawn(async move {
            let _permit = permit;
            Self::execute_with_retry(registry, retry_policy, event_sink, stats, breaker, clock, id, cancel).await;
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_with_retry(
        registry: Arc<JobRegistry>,
        retry_policy: RetryPolicy,
        event_sink: Arc<dyn EventSink>,
        stats: Arc<Stats>,
        breaker: Option<Arc<CircuitBreaker>>,
        clock: Arc<dyn Clock>,
        id: String,
        cancel: CancellationToken,
    ) {
        let Some(handler) = registry.handler_of(&id) else { return };
        let timeout = registry.timeout_of(&id);
        let max_retries = registry.max_retries_of(&id);

        let mut retry_counter = 0u32;
        loop {
            event_sink.on_event(JobEvent::Started { job_id: id.clone(), attempt: retry_counter });
            let job_cancel = cancel.child_token();
            let exec_start = std::time::Instant::now();

            let outcome = tokio::time::timeout(timeout, handler.call(job_cancel.clone())).await;

            let result: Result<(), EngineError> = match outcome {
                Ok(inner) => inner,
                Err(_) => {
                    job_cancel.cancel();
                    Err(EngineError::timeout(id.clone()))
                }
            };

            let duration = exec_start.elapsed();
            stats.record_result("job", result.is_ok(), duration);

            match result {
                Ok(()) => {
                    if let Some(b) = &breaker {
                        b.record_success();
                    }
                    registry.mark_completed(&id).await;
                    event_sink.on_event(JobEvent::Succeeded { job_id: id.clone(), duration });
                    return;
                }
                Err(err) => {
                    if let Some(b) = &breaker {
                        b.record_failure();
                    }
                    if cancel.is_cancelled() {
                        registry.mark_failed(&id, "cancelled").await;
                        event_sink.on_event(JobEvent::Cancelled { job_id: id.clone() });
                        return;
                    }
                    if retry_policy.should_retry(retry_counter) && retry_counter < max_retries {
                        registry.mark_pending_retry(&id, retry_counter + 1).await;
                        let backoff = retry_policy.backoff(retry_counter);
                        event_sink.on_event(JobEvent::RetryScheduled {
                            job_id: id.clone(),
                            attempt: retry_counter + 1,
                            backoff,
                        });
                        if retry_policy.sleep(retry_counter, &cancel).await.is_err() {
                            registry.mark_failed(&id, "cancelled during backoff").await;
                            return;
                        }
                        retry_counter += 1;
                        if !registry.try_start(&id, clock.now()).await {
                            return;
                        }
                        continue;
                    }

                    registry.mark_failed(&id, err.message.clone()).await;
                    event_sink.on_event(JobEvent::DeadLettered { job_id: id.clone(), error: err });
                    return;
                }
            }
        }
    }

    /// Whether `kind` is the sentinel the engine treats as retryable.
    /// Exposed mainly for tests asserting the open-question resolution in
    /// the design notes: timeouts and handler errors retry identically.
    pub fn is_retryable(kind: ErrorKind) -> bool {
        !matches!(
            kind,
            ErrorKind::InvalidInput | ErrorKind::NotFound | ErrorKind::AlreadyExists | ErrorKind::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::job::model::FnJobHandler;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;

    fn retry_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_backoff(Duration::from_millis(5))
            .max_backoff(Duration::from_millis(50))
            .multiplier(2.0)
            .jitter_fraction(0.0)
            .build()
    }

    #[tokio::test]
    async fn retry_then_succeed() {
        let clock = StdArc::new(ManualClock::new("2025-01-01T00:00:00Z".parse().unwrap()));
        let scheduler = Scheduler::new(clock.clone(), SchedulerConfig::new(2, retry_policy()));

        let attempts = StdArc::new(AtomicU32::new(0));
        let attempts2 = attempts.clone();
        let handler = StdArc::new(FnJobHandler(move |_cancel: CancellationToken| {
            let attempts = attempts2.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(EngineError::handler_failure("flaky", "not yet"))
                } else {
                    Ok(())
                }
            }
        }));

        scheduler
            .register(
                JobSpec::builder()
                    .id("flaky".to_string())
                    .name("flaky".to_string())
                    .handler(handler as StdArc<dyn super::model::JobHandler>)
                    .timeout(Duration::from_secs(5))
                    .max_retries(2)
                    .build(),
            )
            .unwrap();

        scheduler.dispatch("flaky".to_string(), CancellationToken::new()).await;

        for _ in 0..50 {
            if scheduler.get_job("flaky").await.unwrap().status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let view = scheduler.get_job("flaky").await.unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dead_letter_after_exhausted_retries() {
        let clock = StdArc::new(ManualClock::new("2025-01-01T00:00:00Z".parse().unwrap()));
        let policy = RetryPolicy::builder()
            .max_retries(1)
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(5))
            .multiplier(2.0)
            .jitter_fraction(0.0)
            .build();
        let scheduler = Scheduler::new(clock, SchedulerConfig::new(2, policy));

        let handler = StdArc::new(FnJobHandler(|_c: CancellationToken| async {
            Err(EngineError::handler_failure("always", "nope"))
        }));

        scheduler
            .register(
                JobSpec::builder()
                    .id("always-fails".to_string())
                    .name("always-fails".to_string())
                    .handler(handler as StdArc<dyn super::model::JobHandler>)
                    .timeout(Duration::from_secs(5))
                    .max_retries(1)
                    .build(),
            )
            .unwrap();

        scheduler
            .dispatch("always-fails".to_string(), CancellationToken::new())
            .await;

        let mut view = scheduler.get_job("always-fails").await.unwrap();
        for _ in 0..50 {
            if view.status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            view = scheduler.get_job("always-fails").await.unwrap();
        }

        assert_eq!(view.status, JobStatus::Failed);
        assert!(view.dead_letter);
        let dead = scheduler.registry().dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, "always-fails");
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_dispatch_and_is_idempotent() {
        let clock = StdArc::new(ManualClock::new("2025-01-01T00:00:00Z".parse().unwrap()));
        let scheduler = Scheduler::new(clock, SchedulerConfig::new(1, retry_policy()));

        let handler = StdArc::new(FnJobHandler(|_c: CancellationToken| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        }));

        scheduler
            .register(
                JobSpec::builder()
                    .id("slow".to_string())
                    .name("slow".to_string())
                    .handler(handler as StdArc<dyn super::model::JobHandler>)
                    .timeout(Duration::from_secs(5))
                    .build(),
            )
            .unwrap();

        let cancel = CancellationToken::new();
        scheduler.dispatch("slow".to_string(), cancel.clone()).await;

        scheduler.stop(&cancel).await;
        assert!(cancel.is_cancelled());
        assert_eq!(scheduler.get_job("slow").await.unwrap().status, JobStatus::Completed);

        // Idempotent: a second call must not hang or panic now that all
        // permits are back in the semaphore.
        scheduler.stop(&cancel).await;
    }

    #[tokio::test]
    async fn duplicate_registration_leaves_first_unchanged() {
        let clock = StdArc::new(ManualClock::new("2025-01-01T00:00:00Z".parse().unwrap()));
        let scheduler = Scheduler::new(clock, SchedulerConfig::new(1, retry_policy()));
        let handler = StdArc::new(FnJobHandler(|_c: CancellationToken| async { Ok(()) }));

        scheduler
            .register(
                JobSpec::builder()
                    .id("dup".to_string())
                    .name("first".to_string())
                    .handler(handler.clone() as StdArc<dyn super::model::JobHandler>)
                    .timeout(Duration::from_secs(1))
                    .build(),
            )
            .unwrap();

        let err = scheduler
            .register(
                JobSpec::builder()
                    .id("dup".to_string())
                    .name("second".to_string())
                    .handler(handler as StdArc<dyn super::model::JobHandler>)
                    .timeout(Duration::from_secs(1))
                    .build(),
            )
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(scheduler.get_job("dup").await.unwrap().name, "first");
    }
}
