//! Thread-safe counters and latency percentiles.
//!
//! Counters are plain atomics; the latency list needed for percentile math
//! sits behind a single read-write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// p50/p95/p99 latency snapshot, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentiles {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// A point-in-time snapshot of [`Stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub total_items: u64,
    pub processed_items: u64,
    pub failed_items: u64,
    pub total_duration: Duration,
    pub per_operation: HashMap<String, Percentiles>,
}

impl StatsSnapshot {
    pub fn average_duration(&self) -> Duration {
        if self.processed_items == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.processed_items as u32
        }
    }
}

/// Aggregate counters and per-operation latency histograms for one pool or
/// scheduler run.
#[derive(Debug, Default)]
pub struct Stats {
    total_items: AtomicU64,
    processed_items: AtomicU64,
    failed_items: AtomicU64,
    total_duration_nanos: AtomicU64,
    latencies_ms: RwLock<HashMap<String, Vec<u64>>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self, count: u64) {
        self.total_items.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a completed item's outcome under `operation`.
    pub fn record_result(&self, operation: &str, success: bool, duration: Duration) {
        self.processed_items.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_items.fetch_add(1, Ordering::Relaxed);
        }
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);

        let mut latencies = self.latencies_ms.write().unwrap_or_else(|e| e.into_inner());
        latencies
            .entry(operation.to_string())
            .or_default()
            .push(duration.as_millis() as u64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let latencies = self.latencies_ms.read().unwrap_or_else(|e| e.into_inner());
        let per_operation = latencies
            .iter()
            .map(|(op, samples)| (op.clone(), percentiles(samples)))
            .collect();

        StatsSnapshot {
            total_items: self.total_items.load(Ordering::Relaxed),
            processed_items: self.processed_items.load(Ordering::Relaxed),
            failed_items: self.failed_items.load(Ordering::Relaxed),
            total_duration: Duration::from_nanos(self.total_duration_nanos.load(Ordering::Relaxed)),
            per_operation,
        }
    }
}

fn percentiles(samples: &[u64]) -> Percentiles {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    Percentiles {
        p50_ms: percentile_of(&sorted, 0.50),
        p95_ms: percentile_of(&sorted, 0.95),
        p99_ms: percentile_of(&sorted, 0.99),
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile_of(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p * sorted.len() as f64).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[rank] as f64
}
