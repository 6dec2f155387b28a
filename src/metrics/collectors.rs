//! Recording helpers over the raw Prometheus metrics.

use crate::pipeline::Summary;

use super::prometheus::{BATCH_DURATION, CHECKPOINT_WRITES, FAILED_BATCHES, ITEMS_EVALUATED};

/// Records layer driver activity.
///
/// Cheap to clone. All methods are no-ops until `init_metrics()` has run.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a completed batch. `synthetic` marks a batch whose worker failed.
    pub fn record_batch(&self, layer: u8, summary: &Summary, synthetic: bool) {
        let layer_label = layer.to_string();

        if let Some(items) = ITEMS_EVALUATED.get() {
            items
                .with_label_values(&[layer_label.as_str(), "success"])
                .inc_by(summary.successful as f64);
            items
                .with_label_values(&[layer_label.as_str(), "failure"])
                .inc_by(summary.failed as f64);
        }

        if synthetic {
            if let Some(failed) = FAILED_BATCHES.get() {
                failed.with_label_values(&[layer_label.as_str()]).inc();
            }
        } else if let Some(duration) = BATCH_DURATION.get() {
            duration
                .with_label_values(&[layer_label.as_str()])
                .observe(summary.execution_time);
        }

        tracing::trace!(
            layer,
            successful = summary.successful,
            failed = summary.failed,
            synthetic,
            "Recorded batch metric"
        );
    }

    pub fn record_checkpoint(&self, layer: u8) {
        if let Some(writes) = CHECKPOINT_WRITES.get() {
            writes.with_label_values(&[layer.to_string().as_str()]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_record_batch_updates_counters() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        let summary = Summary {
            total_tests: 3,
            successful: 2,
            failed: 1,
            execution_time: 0.4,
        };
        collector.record_batch(7, &summary, false);
        collector.record_batch(7, &summary, true);
        collector.record_checkpoint(7);

        let text = export_metrics();
        assert!(text.contains("workflow_eval_items_total"));
        assert!(text.contains("workflow_eval_failed_batches_total"));
        assert!(text.contains("layer=\"7\""));
    }
}
