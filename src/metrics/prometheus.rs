//! Prometheus metrics registration and export.
//!
//! All metrics live in a private registry created once by [`init_metrics`].
//! Recording before initialization is a no-op.

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Registry holding every workflow_eval metric.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Items evaluated, labeled by layer and outcome (`success` / `failure`).
pub static ITEMS_EVALUATED: OnceLock<CounterVec> = OnceLock::new();

/// Batch wall-clock duration in seconds, labeled by layer.
pub static BATCH_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Checkpoint files written, labeled by layer.
pub static CHECKPOINT_WRITES: OnceLock<CounterVec> = OnceLock::new();

/// Batches replaced by a synthetic failed result, labeled by layer.
pub static FAILED_BATCHES: OnceLock<CounterVec> = OnceLock::new();

/// Create and register all metrics.
///
/// Calling this more than once keeps the first registry.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is invalid or a name
/// is registered twice.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let items_evaluated = CounterVec::new(
        Opts::new(
            "workflow_eval_items_total",
            "Items evaluated per layer and outcome",
        ),
        &["layer", "outcome"],
    )?;

    let batch_duration = HistogramVec::new(
        HistogramOpts::new(
            "workflow_eval_batch_duration_seconds",
            "Batch evaluation duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["layer"],
    )?;

    let checkpoint_writes = CounterVec::new(
        Opts::new(
            "workflow_eval_checkpoint_writes_total",
            "Checkpoint files written per layer",
        ),
        &["layer"],
    )?;

    let failed_batches = CounterVec::new(
        Opts::new(
            "workflow_eval_failed_batches_total",
            "Batches whose worker failed before returning a result",
        ),
        &["layer"],
    )?;

    registry.register(Box::new(items_evaluated.clone()))?;
    registry.register(Box::new(batch_duration.clone()))?;
    registry.register(Box::new(checkpoint_writes.clone()))?;
    registry.register(Box::new(failed_batches.clone()))?;

    // A concurrent initializer may have won; its metrics stay in place.
    let _ = REGISTRY.set(registry);
    let _ = ITEMS_EVALUATED.set(items_evaluated);
    let _ = BATCH_DURATION.set(batch_duration);
    let _ = CHECKPOINT_WRITES.set(checkpoint_writes);
    let _ = FAILED_BATCHES.set(failed_batches);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry is not
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
