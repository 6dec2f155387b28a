//! Background progress monitor for layer runs.
//!
//! Layer drivers bump shared atomic counters as batches complete; the monitor
//! wakes on an interval and logs throughput so long runs can be followed
//! without reading per-batch log lines.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::pipeline::Summary;

/// Snapshot of the counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub items_total: usize,
    pub items_evaluated: usize,
    pub items_successful: usize,
    pub batches_completed: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Evaluated share of scheduled items, in percent.
    pub fn percent_complete(&self) -> f64 {
        if self.items_total == 0 {
            0.0
        } else {
            (self.items_evaluated as f64 / self.items_total as f64 * 100.0).min(100.0)
        }
    }
}

/// Shared atomic counters for layer progress.
///
/// Clones share state; the driver increments, the monitor reads.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    /// Items scheduled for evaluation (after resume filtering).
    pub items_total: Arc<AtomicUsize>,
    pub items_evaluated: Arc<AtomicUsize>,
    pub items_successful: Arc<AtomicUsize>,
    pub batches_completed: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            items_total: Arc::new(AtomicUsize::new(0)),
            items_evaluated: Arc::new(AtomicUsize::new(0)),
            items_successful: Arc::new(AtomicUsize::new(0)),
            batches_completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fold one completed batch into the counters.
    pub fn record_batch(&self, summary: &Summary) {
        self.items_evaluated
            .fetch_add(summary.total_tests, Ordering::Relaxed);
        self.items_successful
            .fetch_add(summary.successful, Ordering::Relaxed);
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            items_total: self.items_total.load(Ordering::Relaxed),
            items_evaluated: self.items_evaluated.load(Ordering::Relaxed),
            items_successful: self.items_successful.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs layer progress.
///
/// Call [`ProgressMonitor::stop`] to cancel; dropping the monitor also stops
/// it at the next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a monitor for `layer` that logs every `interval`.
    pub fn start(layer: u8, counters: ProgressCounters, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // first tick fires immediately

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let elapsed_secs = snap.elapsed.as_secs_f64();
                let items_per_sec = if elapsed_secs > 0.0 {
                    snap.items_evaluated as f64 / elapsed_secs
                } else {
                    0.0
                };

                tracing::info!(
                    layer,
                    evaluated = snap.items_evaluated,
                    successful = snap.items_successful,
                    total = snap.items_total,
                    batches = snap.batches_completed,
                    progress_pct = format!("{:.1}%", snap.percent_complete()),
                    elapsed_secs = snap.elapsed.as_secs(),
                    items_per_sec = format!("{:.2}", items_per_sec),
                    "Layer progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signal the monitor to stop and wait for it to finish.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
