//! Fan-out executor with cancellation and result aggregation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, ErrorKind};
use crate::stats::Stats;

use super::work_item::{ResultValue, TerminalStatus, WorkItem, WorkResult};

/// Caller-supplied unit of work, dispatched opaquely by `operation` tag.
/// Handlers must observe the cancellation token promptly.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(
        &self,
        item: &WorkItem,
        cancel: CancellationToken,
    ) -> Result<std::collections::HashMap<String, ResultValue>, EngineError>;
}

/// A fan-out executor over a fixed worker count.
pub struct WorkerPool {
    workers: usize,
    stats: Arc<Stats>,
}

impl WorkerPool {
    /// Non-positive worker counts are normalized to 1.
    pub fn new(workers: i64) -> Self {
        Self {
            workers: if workers < 1 { 1 } else { workers as usize },
            stats: Arc::new(Stats::new()),
        }
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Run `items` through `handler`, fanning out across `min(workers,
    /// items.len())` concurrent consumers.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        items: Vec<WorkItem>,
        handler: Arc<dyn Handler>,
    ) -> Result<(Vec<WorkResult>, TerminalStatus), EngineError> {
        if items.is_empty() {
            return Err(EngineError::invalid_input("work item batch must not be empty"));
        }

        let total = items.len();
        let worker_count = self.workers.min(total);
        self.stats.record_submitted(total as u64);

        let (item_tx, item_rx) = mpsc::channel::<WorkItem>(total);
        let item_rx = Arc::new(Mutex::new(item_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<WorkResult>(total);

        let dispatch_cancel = cancel.clone();
        tokio::spawn(async move {
            for item in items {
                tokio::select! {
                    _ = dispatch_cancel.cancelled() => break,
                    send = item_tx.send(item) => {
                        if send.is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping item_tx here closes the channel for all workers.
        });

        let mut worker_handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let item_rx = item_rx.clone();
            let result_tx = result_tx.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            let stats = self.stats.clone();
            worker_handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let item = {
                        let mut rx = item_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else { break };

                    let result = run_one(&*handler, &item, cancel.clone()).await;
                    stats.record_result(&item.operation, result.success, result.duration);
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        for handle in worker_handles {
            let _ = handle.await;
        }

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }

        let status = if cancel.is_cancelled() {
            TerminalStatus::Cancelled
        } else if results.iter().any(|r| !r.success) {
            TerminalStatus::Partial
        } else {
            TerminalStatus::Ok
        };

        Ok((results, status))
    }
}

async fn run_one(handler: &dyn Handler, item: &WorkItem, cancel: CancellationToken) -> WorkResult {
    let item_cancel = cancel.child_token();
    let start = Instant::now();

    let call_fut = AssertUnwindSafe(handler.call(item, item_cancel.clone())).catch_unwind();

    let outcome = match item.deadline {
        Some(deadline) => match tokio::time::timeout(deadline, call_fut).await {
            Ok(inner) => inner,
            Err(_) => {
                item_cancel.cancel();
                let duration = start.elapsed();
                return WorkResult::failure(&item.id, ErrorKind::Timeout, "item deadline exceeded", duration);
            }
        },
        None => call_fut.await,
    };

    let duration = start.elapsed();
    match outcome {
        Ok(Ok(data)) => WorkResult::success(&item.id, data, duration),
        Ok(Err(engine_err)) => WorkResult::failure(&item.id, engine_err.kind, engine_err.message, duration),
        Err(_panic) => WorkResult::failure(&item.id, ErrorKind::InternalError, "handler panicked", duration),
    }
}

/// Convenience `Handler` wrapping a plain async closure, mirroring the
/// registering handlers without a full trait impl.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(WorkItem, CancellationToken) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<std::collections::HashMap<String, ResultValue>, EngineError>>
        + Send,
{
    async fn call(
        &self,
        item: &WorkItem,
        cancel: CancellationToken,
    ) -> Result<std::collections::HashMap<String, ResultValue>, EngineError> {
        (self.0)(item.clone(), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn item(id: &str) -> WorkItem {
        WorkItem::builder()
            .id(id.to_string())
            .operation("analyze".to_string())
            .input("irrelevant".to_string())
            .build()
    }

    struct AnalyzeHandler;

    #[async_trait]
    impl Handler for AnalyzeHandler {
        async fn call(
            &self,
            _item: &WorkItem,
            _cancel: CancellationToken,
        ) -> Result<HashMap<String, ResultValue>, EngineError> {
            let mut data = HashMap::new();
            data.insert("lines".to_string(), ResultValue::Int(3));
            data.insert("words".to_string(), ResultValue::Int(6));
            Ok(data)
        }
    }

    #[tokio::test]
    async fn pool_runs_all_items_and_reports_success() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationToken::new();
        let items = vec![item("a"), item("b"), item("c")];
        let (results, status) = pool.run(cancel, items, Arc::new(AnalyzeHandler)).await.unwrap();

        assert_eq!(status, TerminalStatus::Ok);
        assert_eq!(results.len(), 3);
        for r in &results {
            assert!(r.success);
            assert_eq!(r.data.get("lines"), Some(&ResultValue::Int(3)));
            assert_eq!(r.data.get("words"), Some(&ResultValue::Int(6)));
        }
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let pool = WorkerPool::new(2);
        let err = pool
            .run(CancellationToken::new(), vec![], Arc::new(AnalyzeHandler))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    struct SleepyHandler(Duration);

    #[async_trait]
    impl Handler for SleepyHandler {
        async fn call(
            &self,
            _item: &WorkItem,
            cancel: CancellationToken,
        ) -> Result<HashMap<String, ResultValue>, EngineError> {
            tokio::select! {
                _ = tokio::time::sleep(self.0) => Ok(HashMap::new()),
                _ = cancel.cancelled() => Err(EngineError::cancelled("sleepy")),
            }
        }
    }

    #[tokio::test]
    async fn cancellation_stops_pool_before_all_items_complete() {
        let pool = WorkerPool::new(1);
        let cancel = CancellationToken::new();
        let items: Vec<_> = (0..10).map(|i| item(&i.to_string())).collect();

        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });

        let (results, status) = pool
            .run(cancel, items, Arc::new(SleepyHandler(Duration::from_millis(50))))
            .await
            .unwrap();

        assert_eq!(status, TerminalStatus::Cancelled);
        assert!(results.len() <= 2);
        assert_eq!(pool.stats().snapshot().processed_items, results.len() as u64);
    }

    struct PanicHandler;

    #[async_trait]
    impl Handler for PanicHandler {
        async fn call(
            &self,
            _item: &WorkItem,
            _cancel: CancellationToken,
        ) -> Result<HashMap<String, ResultValue>, EngineError> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panics_become_internal_error_results() {
        let pool = WorkerPool::new(2);
        let (results, status) = pool
            .run(CancellationToken::new(), vec![item("a")], Arc::new(PanicHandler))
            .await
            .unwrap();

        assert_eq!(status, TerminalStatus::Partial);
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].error_kind, Some(ErrorKind::InternalError));
    }
}
