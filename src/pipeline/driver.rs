//! Generic layer driver: resume, batch, dispatch, checkpoint, persist.
//!
//! Every evaluation layer runs through the same state machine:
//!
//! 1. Load the latest checkpoint and drop items that already have a record.
//! 2. Split the remaining items into contiguous batches.
//! 3. Dispatch batches onto a bounded pool of tokio tasks. Each batch runs its
//!    items sequentially and always returns a [`BatchResult`].
//! 4. As batches complete (in any order), write a growing checkpoint every
//!    `checkpoint_interval` batches.
//! 5. Merge everything with the original checkpoint, write a final checkpoint
//!    and the layer's results file.
//!
//! A batch task that panics is replaced by a synthetic all-failed batch so its
//! siblings are unaffected.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorDetails, EvalError};
use crate::metrics::MetricsCollector;
use crate::progress::ProgressCounters;

use super::batch::split_batches;
use super::checkpoint::CheckpointStore;
use super::results::{merge_results, BatchResult, LayerRecord, LayerReport, Summary};

/// Per-item evaluation logic for one layer.
#[async_trait]
pub trait LayerEvaluator: Send + Sync + 'static {
    type Input: Clone + Send + Sync + 'static;
    type Record: LayerRecord;

    /// Layer number used for checkpoint and results file names.
    fn layer(&self) -> u8;

    /// Completed batches between periodic checkpoints.
    fn checkpoint_interval(&self) -> usize;

    /// Join key of an input item.
    fn input_id<'a>(&self, input: &'a Self::Input) -> &'a str;

    /// Evaluates one item. Item-level failures should be folded into the
    /// returned record; an `Err` is captured at the batch boundary.
    async fn evaluate(&self, input: &Self::Input) -> Result<Self::Record, EvalError>;
}

/// Runs every item of a batch in order and summarizes the outcome.
pub async fn evaluate_batch<E: LayerEvaluator>(
    evaluator: &E,
    batch: &[E::Input],
) -> BatchResult<E::Record> {
    let start = Instant::now();
    let mut result = BatchResult::default();

    for input in batch {
        match evaluator.evaluate(input).await {
            Ok(record) => result.test_results.push(record),
            Err(err) => {
                let test_id = evaluator.input_id(input);
                warn!(
                    layer = evaluator.layer(),
                    test_id,
                    error = %err,
                    "Item evaluation raised outside its record"
                );
                result
                    .errors
                    .push(ErrorDetails::capture(&err, module_path!()).with_test_id(test_id));
            }
        }
    }

    let successful = result.successes().count();
    result.summary = Summary {
        total_tests: batch.len(),
        successful,
        failed: batch.len() - successful,
        execution_time: start.elapsed().as_secs_f64(),
    };
    result
}

/// Drives one layer over a list of inputs.
pub struct LayerDriver<E: LayerEvaluator> {
    evaluator: Arc<E>,
    store: CheckpointStore,
    max_workers: usize,
    batch_size: usize,
    metrics: MetricsCollector,
    progress: Option<ProgressCounters>,
}

impl<E: LayerEvaluator> LayerDriver<E> {
    pub fn new(evaluator: E, store: CheckpointStore, max_workers: usize, batch_size: usize) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            store,
            max_workers: max_workers.max(1),
            batch_size,
            metrics: MetricsCollector::new(),
            progress: None,
        }
    }

    /// Attach shared counters that the progress monitor reads.
    pub fn with_progress(mut self, counters: ProgressCounters) -> Self {
        self.progress = Some(counters);
        self
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub async fn run(&self, items: Vec<E::Input>) -> Result<LayerReport<E::Record>, EvalError> {
        let layer = self.evaluator.layer();
        let start = Instant::now();

        let previous = self.store.load::<LayerReport<E::Record>>(layer).await;
        let checkpoint = match &previous {
            Some(report) => {
                info!(
                    layer,
                    completed = report.test_results().len(),
                    "Resuming from checkpoint"
                );
                report.results.clone()
            }
            None => BatchResult::default(),
        };

        let completed = checkpoint.completed_ids();
        let pending: Vec<E::Input> = items
            .into_iter()
            .filter(|item| !completed.contains(self.evaluator.input_id(item)))
            .collect();

        if pending.is_empty() {
            info!(layer, "All items already evaluated");
            return Ok(previous.unwrap_or_else(|| LayerReport::new(layer, checkpoint, 0.0)));
        }

        let batches = split_batches(&pending, self.batch_size);
        if batches.is_empty() {
            return Err(EvalError::Pipeline(format!(
                "layer {} produced no batches for {} pending items",
                layer,
                pending.len()
            )));
        }

        let total_batches = batches.len();
        let workers = self.max_workers.min(total_batches);
        info!(
            layer,
            items = pending.len(),
            batches = total_batches,
            workers,
            "Dispatching batches"
        );

        if let Some(progress) = &self.progress {
            progress.items_total.fetch_add(pending.len(), Ordering::Relaxed);
        }

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();
        let mut batch_meta = HashMap::with_capacity(total_batches);

        for (index, batch) in batches.into_iter().enumerate() {
            let evaluator = Arc::clone(&self.evaluator);
            let semaphore = Arc::clone(&semaphore);
            let len = batch.len();
            let handle = tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| EvalError::Pipeline(format!("worker pool closed: {}", e)))?;
                Ok::<_, EvalError>(evaluate_batch(evaluator.as_ref(), &batch).await)
            });
            batch_meta.insert(handle.id(), (index, len));
        }

        let interval = self.evaluator.checkpoint_interval().max(1);
        let mut finished: Vec<BatchResult<E::Record>> = Vec::with_capacity(total_batches);

        while let Some(joined) = tasks.join_next_with_id().await {
            let (task_id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(join_err) => (join_err.id(), Err(EvalError::WorkerPanic(join_err.to_string()))),
            };
            let (index, len) = batch_meta.get(&task_id).copied().unwrap_or((0, 0));

            let batch_result = match outcome {
                Ok(result) => {
                    info!(
                        layer,
                        batch = index + 1,
                        total = total_batches,
                        successful = result.summary.successful,
                        failed = result.summary.failed,
                        "Completed batch"
                    );
                    self.metrics.record_batch(layer, &result.summary, false);
                    result
                }
                Err(err) => {
                    error!(layer, batch = index + 1, error = %err, "Batch failed");
                    let result =
                        BatchResult::failed_batch(len, ErrorDetails::capture(&err, module_path!()));
                    self.metrics.record_batch(layer, &result.summary, true);
                    result
                }
            };

            if let Some(progress) = &self.progress {
                progress.record_batch(&batch_result.summary);
            }
            finished.push(batch_result);

            if finished.len() % interval == 0 {
                let snapshot = merge_results(std::iter::once(&checkpoint).chain(finished.iter()));
                let report = LayerReport::new(layer, snapshot, start.elapsed().as_secs_f64());
                let path = self.store.save(layer, &report).await?;
                self.metrics.record_checkpoint(layer);
                debug!(layer, path = %path.display(), batches = finished.len(), "Saved intermediate checkpoint");
            }
        }

        let merged = merge_results(std::iter::once(&checkpoint).chain(finished.iter()));
        let report = LayerReport::new(layer, merged, start.elapsed().as_secs_f64());

        self.store.save(layer, &report).await?;
        self.metrics.record_checkpoint(layer);
        let results_path = self.store.save_results(layer, &report).await?;

        info!(
            layer,
            total = report.summary().total_tests,
            successful = report.summary().successful,
            elapsed_secs = format!("{:.2}", start.elapsed().as_secs_f64()),
            results = %results_path.display(),
            "Layer evaluation completed"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        test_id: String,
        ok: bool,
    }

    impl LayerRecord for Rec {
        fn test_id(&self) -> &str {
            &self.test_id
        }
        fn is_success(&self) -> bool {
            self.ok
        }
    }

    /// Succeeds for ids not starting with `bad`, errors for `err*`, panics for `panic*`.
    struct Probe {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LayerEvaluator for Probe {
        type Input = String;
        type Record = Rec;

        fn layer(&self) -> u8 {
            1
        }

        fn checkpoint_interval(&self) -> usize {
            2
        }

        fn input_id<'a>(&self, input: &'a String) -> &'a str {
            input
        }

        async fn evaluate(&self, input: &String) -> Result<Rec, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if input.starts_with("panic") {
                panic!("evaluator crashed");
            }
            if input.starts_with("err") {
                return Err(EvalError::MissingKey(input.clone()));
            }
            Ok(Rec {
                test_id: input.clone(),
                ok: !input.starts_with("bad"),
            })
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{:02}", i)).collect()
    }

    fn driver(dir: &TempDir, calls: Arc<AtomicUsize>, workers: usize, batch: usize) -> LayerDriver<Probe> {
        let store = CheckpointStore::new(dir.path().join("ckpt"), dir.path().join("results"));
        LayerDriver::new(Probe { calls }, store, workers, batch)
    }

    #[tokio::test]
    async fn test_evaluate_batch_summary() {
        let probe = Probe {
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let batch = vec!["a".to_string(), "bad".to_string(), "err".to_string()];
        let result = evaluate_batch(&probe, &batch).await;

        assert_eq!(result.test_results.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].test_id.as_deref(), Some("err"));
        assert_eq!(result.errors[0].error_type, "KeyError");
        assert_eq!(result.summary.total_tests, 3);
        assert_eq!(result.summary.successful, 1);
        assert_eq!(result.summary.failed, 2);
    }

    #[tokio::test]
    async fn test_run_twelve_items_in_three_batches() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let report = driver(&dir, calls.clone(), 4, 5).run(ids(12)).await.unwrap();

        assert_eq!(report.layer, Some(1));
        assert_eq!(report.summary().total_tests, 12);
        assert_eq!(report.summary().successful, 12);
        assert_eq!(report.test_results().len(), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert!(dir.path().join("results/layer_1_structure_evaluation.json").exists());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let first = driver(&dir, calls.clone(), 2, 3).run(ids(7)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 7);

        let second = driver(&dir, calls.clone(), 2, 3).run(ids(7)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 7);
        assert_eq!(second.test_results(), first.test_results());
        assert_eq!(second.summary().total_tests, first.summary().total_tests);
        assert_eq!(second.timestamp, first.timestamp);
    }

    #[tokio::test]
    async fn test_resume_only_evaluates_new_items() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        driver(&dir, calls.clone(), 2, 2).run(ids(4)).await.unwrap();

        let report = driver(&dir, calls.clone(), 2, 2).run(ids(6)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(report.summary().total_tests, 6);

        let order: Vec<&str> = report.test_results().iter().map(|r| r.test_id.as_str()).collect();
        let mut head = order[..4].to_vec();
        head.sort_unstable();
        assert_eq!(head, vec!["item-00", "item-01", "item-02", "item-03"]);
    }

    #[tokio::test]
    async fn test_panicking_batch_becomes_failed_batch() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let items = vec![
            "a1".to_string(),
            "a2".to_string(),
            "panic-1".to_string(),
            "b2".to_string(),
        ];
        let report = driver(&dir, calls, 2, 2).run(items).await.unwrap();

        assert_eq!(report.summary().total_tests, 4);
        assert_eq!(report.summary().successful, 2);
        assert_eq!(report.summary().failed, 2);
        assert_eq!(report.results.errors.len(), 1);
        assert_eq!(report.results.errors[0].error_type, "WorkerPanic");
    }

    #[tokio::test]
    async fn test_periodic_checkpoints_are_written() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        driver(&dir, calls, 1, 1).run(ids(4)).await.unwrap();

        let count = std::fs::read_dir(dir.path().join("ckpt")).unwrap().count();
        // two periodic (after batches 2 and 4) plus the final one
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_empty_input_returns_empty_report() {
        let dir = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let report = driver(&dir, calls.clone(), 2, 5).run(Vec::new()).await.unwrap();
        assert!(report.test_results().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!dir.path().join("ckpt").exists());
    }
}
