//! Execution telemetry with a bounded history window.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Fixed-capacity ring buffer of recent execution times.
///
/// Mean/max are recomputed from the buffer on demand, keeping memory flat
/// over long process lifetimes.
pub(crate) struct ExecutionWindow {
    samples: Vec<Duration>,
    capacity: usize,
    next: usize,
}

impl ExecutionWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { samples: Vec::with_capacity(capacity.max(1)), capacity: capacity.max(1), next: 0 }
    }

    pub(crate) fn push(&mut self, sample: Duration) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub(crate) fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub(crate) fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }
}

pub(crate) struct MetricsInner {
    pub(crate) executed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) timed_out: AtomicU64,
    pub(crate) window: Mutex<ExecutionWindow>,
}

impl MetricsInner {
    pub(crate) fn new(window_capacity: usize) -> Self {
        Self {
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            window: Mutex::new(ExecutionWindow::new(window_capacity)),
        }
    }

    pub(crate) fn record_execution(&self, elapsed: Duration) {
        self.window.lock().unwrap().push(elapsed);
    }
}

/// Point-in-time governor telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorMetrics {
    pub name: String,
    pub max_concurrent: usize,
    pub active_tasks: usize,
    pub available_slots: usize,
    pub executed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub avg_execution_ms: Option<u64>,
    pub max_execution_ms: Option<u64>,
}

impl MetricsInner {
    pub(crate) fn snapshot(
        &self,
        name: &str,
        max_concurrent: usize,
        available_slots: usize,
    ) -> GovernorMetrics {
        let window = self.window.lock().unwrap();
        GovernorMetrics {
            name: name.to_string(),
            max_concurrent,
            active_tasks: max_concurrent.saturating_sub(available_slots),
            available_slots,
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            avg_execution_ms: window.average().map(|d| d.as_millis() as u64),
            max_execution_ms: window.max().map(|d| d.as_millis() as u64),
        }
    }
}
