//! Batch and layer result containers, and the additive merge over them.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ErrorDetails;

/// A per-item result record produced by one layer.
pub trait LayerRecord: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Join key linking records across layers.
    fn test_id(&self) -> &str;

    /// Layer-specific success flag.
    fn is_success(&self) -> bool;
}

/// Summary counters, summed elementwise on merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub total_tests: usize,
    #[serde(default)]
    pub successful: usize,
    #[serde(default)]
    pub failed: usize,
    /// Seconds.
    #[serde(default)]
    pub execution_time: f64,
}

impl Summary {
    pub fn accumulate(&mut self, other: &Summary) {
        self.total_tests += other.total_tests;
        self.successful += other.successful;
        self.failed += other.failed;
        self.execution_time += other.execution_time;
    }

    /// Share of successful items, 0.0 when nothing was evaluated.
    pub fn success_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_tests as f64
        }
    }
}

/// Records, captured errors and counters for one batch (or a merge of many).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult<R> {
    #[serde(default = "Vec::new")]
    pub test_results: Vec<R>,
    #[serde(default)]
    pub errors: Vec<ErrorDetails>,
    #[serde(default)]
    pub summary: Summary,
}

impl<R> Default for BatchResult<R> {
    fn default() -> Self {
        Self {
            test_results: Vec::new(),
            errors: Vec::new(),
            summary: Summary::default(),
        }
    }
}

impl<R: LayerRecord> BatchResult<R> {
    /// Ids of every item that already has a result record.
    pub fn completed_ids(&self) -> HashSet<String> {
        self.test_results
            .iter()
            .map(|r| r.test_id().to_string())
            .collect()
    }

    /// Records whose layer success flag is set.
    pub fn successes(&self) -> impl Iterator<Item = &R> {
        self.test_results.iter().filter(|r| r.is_success())
    }

    /// Placeholder for a batch whose worker failed before returning.
    pub fn failed_batch(batch_len: usize, error: ErrorDetails) -> Self {
        Self {
            test_results: Vec::new(),
            errors: vec![error],
            summary: Summary {
                total_tests: batch_len,
                successful: 0,
                failed: batch_len,
                execution_time: 0.0,
            },
        }
    }
}

/// Merged layer output as persisted in checkpoints and results files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerReport<R> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<u8>,
    #[serde(flatten)]
    pub results: BatchResult<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<R> LayerReport<R> {
    pub fn new(layer: u8, results: BatchResult<R>, total_execution_time: f64) -> Self {
        Self {
            layer: Some(layer),
            results,
            total_execution_time: Some(total_execution_time),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
            message: None,
        }
    }

    /// Empty report for a layer that had nothing to evaluate.
    pub fn empty(layer: u8, message: impl Into<String>) -> Self {
        Self {
            layer: Some(layer),
            results: BatchResult::default(),
            total_execution_time: None,
            timestamp: None,
            message: Some(message.into()),
        }
    }

    pub fn summary(&self) -> &Summary {
        &self.results.summary
    }

    pub fn test_results(&self) -> &[R] {
        &self.results.test_results
    }
}

/// Concatenates records and errors in input order and sums the summaries.
///
/// Pass checkpoint data first so resumed records keep their original position.
pub fn merge_results<'a, R, I>(parts: I) -> BatchResult<R>
where
    R: Clone + 'a,
    I: IntoIterator<Item = &'a BatchResult<R>>,
{
    let mut merged = BatchResult::default();
    for part in parts {
        merged.test_results.extend(part.test_results.iter().cloned());
        merged.errors.extend(part.errors.iter().cloned());
        merged.summary.accumulate(&part.summary);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        test_id: String,
        success: bool,
    }

    impl LayerRecord for Rec {
        fn test_id(&self) -> &str {
            &self.test_id
        }
        fn is_success(&self) -> bool {
            self.success
        }
    }

    fn rec(id: &str, success: bool) -> Rec {
        Rec {
            test_id: id.to_string(),
            success,
        }
    }

    fn part(ids: &[&str], time: f64) -> BatchResult<Rec> {
        BatchResult {
            test_results: ids.iter().map(|id| rec(id, true)).collect(),
            errors: Vec::new(),
            summary: Summary {
                total_tests: ids.len(),
                successful: ids.len(),
                failed: 0,
                execution_time: time,
            },
        }
    }

    #[test]
    fn test_merge_is_additive_and_ordered() {
        let a = part(&["a1", "a2"], 1.5);
        let mut b = part(&["b1"], 0.5);
        b.errors
            .push(ErrorDetails::capture(&EvalError::MissingKey("x".into()), "t"));
        b.summary.failed = 1;
        b.summary.total_tests = 2;

        let merged = merge_results([&a, &b]);
        assert_eq!(merged.summary.total_tests, 4);
        assert_eq!(merged.summary.successful, 3);
        assert_eq!(merged.summary.failed, 1);
        assert!((merged.summary.execution_time - 2.0).abs() < 1e-9);
        assert_eq!(
            merged
                .test_results
                .iter()
                .map(|r| r.test_id.as_str())
                .collect::<Vec<_>>(),
            vec!["a1", "a2", "b1"]
        );
        assert_eq!(merged.errors.len(), 1);
    }

    #[test]
    fn test_merge_empty() {
        let merged: BatchResult<Rec> = merge_results(std::iter::empty());
        assert!(merged.test_results.is_empty());
        assert_eq!(merged.summary, Summary::default());
    }

    #[test]
    fn test_missing_fields_default_on_load() {
        let parsed: BatchResult<Rec> = serde_json::from_str("{}").unwrap();
        assert!(parsed.test_results.is_empty());
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.summary.total_tests, 0);

        let parsed: BatchResult<Rec> =
            serde_json::from_str(r#"{"summary": {"total_tests": 3}}"#).unwrap();
        assert_eq!(parsed.summary.total_tests, 3);
        assert_eq!(parsed.summary.successful, 0);
    }

    #[test]
    fn test_completed_ids_and_successes() {
        let batch = BatchResult {
            test_results: vec![rec("a", true), rec("b", false)],
            errors: Vec::new(),
            summary: Summary::default(),
        };
        let ids = batch.completed_ids();
        assert!(ids.contains("a") && ids.contains("b"));
        assert_eq!(batch.successes().count(), 1);
    }

    #[test]
    fn test_failed_batch_counts_all_items() {
        let err = ErrorDetails::capture(&EvalError::WorkerPanic("boom".into()), "t");
        let batch: BatchResult<Rec> = BatchResult::failed_batch(5, err);
        assert_eq!(batch.summary.total_tests, 5);
        assert_eq!(batch.summary.failed, 5);
        assert_eq!(batch.errors.len(), 1);
        assert!(batch.test_results.is_empty());
    }

    #[test]
    fn test_layer_report_flattened_shape() {
        let report = LayerReport::new(1, part(&["a"], 0.1), 2.0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["layer"], 1);
        assert_eq!(json["summary"]["total_tests"], 1);
        assert_eq!(json["test_results"][0]["test_id"], "a");
        assert!(json.get("message").is_none());

        let back: LayerReport<Rec> = serde_json::from_value(json).unwrap();
        assert_eq!(back.test_results().len(), 1);
        assert_eq!(back.layer, Some(1));
    }

    #[test]
    fn test_success_rate() {
        let summary = Summary {
            total_tests: 4,
            successful: 3,
            failed: 1,
            execution_time: 0.0,
        };
        assert!((summary.success_rate() - 0.75).abs() < 1e-9);
        assert_eq!(Summary::default().success_rate(), 0.0);
    }
}
