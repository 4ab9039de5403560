//! Fixed-capacity FIFO with drop/block/adaptive backpressure.
//!
//! Built on `tokio::sync::Mutex` + `Notify` rather than a channel, since the
//! adaptive strategy needs to poll size under backoff rather than simply
//! await channel capacity directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Backpressure strategy applied when `enqueue` would exceed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStrategy {
    /// Reject immediately with `Overflow`.
    Drop,
    /// Wait until space frees up or cancellation fires.
    Block,
    /// Wait with exponential backoff (5ms → 100ms cap) until space frees up.
    Adaptive,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded, multi-producer multi-consumer FIFO queue.
pub struct BoundedQueue<T> {
    capacity: usize,
    strategy: QueueStrategy,
    state: Mutex<State<T>>,
    not_empty: Notify,
    not_full: Notify,
    dropped: AtomicU64,
    processed: AtomicU64,
}

const ADAPTIVE_INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const ADAPTIVE_MAX_BACKOFF: Duration = Duration::from_millis(100);

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, strategy: QueueStrategy) -> Self {
        Self {
            capacity: capacity.max(1),
            strategy,
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        }
    }

    /// Enqueue an item, honoring the configured strategy.
    pub async fn enqueue(&self, item: T, cancel: &CancellationToken) -> Result<(), EngineError> {
        match self.strategy {
            QueueStrategy::Drop => self.enqueue_drop(item),
            QueueStrategy::Block => self.enqueue_block(item, cancel).await,
            QueueStrategy::Adaptive => self.enqueue_adaptive(item, cancel).await,
        }
    }

    fn enqueue_drop(&self, item: T) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.items.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::overflow("queue", "queue at capacity, item dropped"));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    async fn enqueue_block(&self, item: T, cancel: &CancellationToken) -> Result<(), EngineError> {
        let mut item = Some(item);
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.closed {
                    return Err(EngineError::new(
                        crate::error::ErrorKind::InvalidInput,
                        "queue",
                        "queue closed",
                    ));
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(item.take().unwrap());
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                _ = self.not_full.notified() => {}
                _ = cancel.cancelled() => return Err(EngineError::cancelled("queue")),
            }
        }
    }

    async fn enqueue_adaptive(
        &self,
        item: T,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut item = Some(item);
        let mut backoff = ADAPTIVE_INITIAL_BACKOFF;
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.items.len() < self.capacity {
                    state.items.push_back(item.take().unwrap());
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {
                    backoff = (backoff * 2).min(ADAPTIVE_MAX_BACKOFF);
                }
                _ = cancel.cancelled() => return Err(EngineError::cancelled("queue")),
            }
        }
    }

    /// Dequeue the next item, or `Ok(None)` once the queue is closed and
    /// drained.
    pub async fn dequeue(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, EngineError> {
        loop {
            {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    self.not_full.notify_one();
                    return Ok(Some(item));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            tokio::select! {
                _ = self.not_empty.notified() => {}
                _ = cancel.cancelled() => return Err(EngineError::cancelled("queue")),
            }
        }
    }

    /// Close the queue; pending dequeues drain remaining items then observe
    /// closure.
    pub async fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        drop(state);
        self.not_empty.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}
