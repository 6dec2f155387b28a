//! Pipeline coordinator: runs the configured layers in order and builds the
//! comprehensive report.
//!
//! Layer N+1 only receives the successful records of layer N. When a layer
//! runs without its predecessor in the same invocation, the predecessor's
//! results file is loaded from disk instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EvaluationConfig;
use crate::data::{load_test_data, TestItem};
use crate::error::EvalError;
use crate::layers::{
    ExecutionEvaluator, ExecutionRecord, OutputQualityEvaluator, OutputRecord, StructureEvaluator,
    StructureRecord,
};
use crate::progress::{ProgressCounters, ProgressMonitor};
use crate::scoring::{
    HeuristicOutputScorer, OutputScorer, PlaceholderStructureScorer, StructureScorer,
};
use crate::workflow::{WorkflowExecutor, WorkflowGenerator};

use super::checkpoint::{file_stamp, write_json_atomic, CheckpointError, CheckpointStore};
use super::driver::{LayerDriver, LayerEvaluator};
use super::results::{LayerRecord, LayerReport, Summary};
use super::retry::RetryPolicy;

const NO_WORKFLOWS_MESSAGE: &str = "No workflows available for execution testing";
const NO_EXECUTIONS_MESSAGE: &str =
    "No successful executions available for output quality evaluation";

/// Retry budget around a single workflow execution.
const EXECUTION_MAX_RETRIES: u32 = 2;
const EXECUTION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Full output of each layer that ran in this invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_1: Option<LayerReport<StructureRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_2: Option<LayerReport<ExecutionRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_3: Option<LayerReport<OutputRecord>>,
}

impl LayerResults {
    pub fn executed_layers(&self) -> Vec<String> {
        let mut layers = Vec::new();
        if self.layer_1.is_some() {
            layers.push("layer_1".to_string());
        }
        if self.layer_2.is_some() {
            layers.push("layer_2".to_string());
        }
        if self.layer_3.is_some() {
            layers.push("layer_3".to_string());
        }
        layers
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    pub total_test_cases: usize,
    pub workflows_generated: usize,
    pub workflows_executed: usize,
    pub output_evaluations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_quality_score: Option<f64>,
}

impl OverallSummary {
    pub fn from_results(results: &LayerResults) -> Self {
        let mut summary = Self::default();
        if let Some(layer_1) = &results.layer_1 {
            summary.total_test_cases = layer_1.summary().total_tests;
            summary.workflows_generated = layer_1.summary().successful;
        }
        if let Some(layer_2) = &results.layer_2 {
            summary.workflows_executed = layer_2.summary().successful;
        }
        if let Some(layer_3) = &results.layer_3 {
            summary.output_evaluations = layer_3.summary().successful;
            summary.average_quality_score = average_quality_score(layer_3);
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetadata {
    pub run_id: Uuid,
    pub timestamp: String,
    /// Seconds since the run started.
    pub total_execution_time: f64,
    pub config: Value,
    pub layers_executed: Vec<String>,
}

/// The comprehensive evaluation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub evaluation_metadata: EvaluationMetadata,
    pub layer_results: LayerResults,
    pub overall_summary: OverallSummary,
    pub recommendations: Vec<String>,
}

/// Mean overall score of the evaluated items that scored above zero.
pub fn average_quality_score(report: &LayerReport<OutputRecord>) -> Option<f64> {
    let scores: Vec<f64> = report
        .test_results()
        .iter()
        .filter_map(OutputRecord::quality_score)
        .collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Mean per-workflow success rate across the successful layer 2 records.
fn average_workflow_success_rate(report: &LayerReport<ExecutionRecord>) -> Option<f64> {
    let rates: Vec<f64> = report
        .test_results()
        .iter()
        .filter(|r| r.overall_success)
        .map(|r| r.statistics.as_ref().map_or(0.0, |s| s.success_rate))
        .collect();
    if rates.is_empty() {
        None
    } else {
        Some(rates.iter().sum::<f64>() / rates.len() as f64)
    }
}

/// Threshold-based advice derived from the layer results.
pub fn generate_recommendations(results: &LayerResults) -> Vec<String> {
    let mut recommendations = Vec::new();

    if let Some(layer_1) = &results.layer_1 {
        if layer_1.summary().success_rate() < 0.8 {
            recommendations.push(
                "Low workflow generation success rate. Consider improving task planning logic."
                    .to_string(),
            );
        }
    }

    if let Some(layer_2) = &results.layer_2 {
        let records = layer_2.test_results();
        let failures = records.iter().filter(|r| !r.overall_success).count();
        if failures as f64 > records.len() as f64 * 0.3 {
            recommendations.push(
                "High execution failure rate. Review workflow execution logic and error handling."
                    .to_string(),
            );
        }
    }

    if let Some(layer_3) = &results.layer_3 {
        if average_quality_score(layer_3).is_some_and(|avg| avg < 6.0) {
            recommendations.push(
                "Low average output quality. Consider improving agent prompts and output validation."
                    .to_string(),
            );
        }
    }

    if recommendations.is_empty() {
        recommendations
            .push("Evaluation results look good! Continue monitoring performance.".to_string());
    }
    recommendations
}

fn print_layer_summary(layer: u8, summary: &Summary, extra: Option<String>) {
    println!("Layer {} summary", layer);
    println!("  Total tests:    {}", summary.total_tests);
    println!("  Successful:     {}", summary.successful);
    println!("  Failed:         {}", summary.failed);
    println!("  Success rate:   {:.1}%", summary.success_rate() * 100.0);
    println!("  Execution time: {:.2}s", summary.execution_time);
    if let Some(extra) = extra {
        println!("  {}", extra);
    }
    println!();
}

fn print_overall_summary(summary: &OverallSummary, report_path: &std::path::Path) {
    println!("{}", "=".repeat(60));
    println!("EVALUATION PIPELINE COMPLETED");
    println!("{}", "=".repeat(60));
    println!("Comprehensive report saved to: {}", report_path.display());
    println!();
    println!("OVERALL SUMMARY:");
    println!("Total test cases processed: {}", summary.total_test_cases);
    println!("Workflows generated: {}", summary.workflows_generated);
    println!("Workflows executed: {}", summary.workflows_executed);
    println!("Output evaluations completed: {}", summary.output_evaluations);
    if let Some(avg) = summary.average_quality_score {
        println!("Average output quality score: {:.2}/10", avg);
    }
    println!();
}

/// Sequences the three layer drivers over one configuration.
pub struct EvaluationPipeline {
    config: EvaluationConfig,
    store: CheckpointStore,
    generator: Arc<dyn WorkflowGenerator>,
    executor: Arc<dyn WorkflowExecutor>,
    structure_scorer: Arc<dyn StructureScorer>,
    output_scorer: Arc<dyn OutputScorer>,
    progress_interval: Option<Duration>,
}

impl EvaluationPipeline {
    pub fn new(
        config: EvaluationConfig,
        generator: Arc<dyn WorkflowGenerator>,
        executor: Arc<dyn WorkflowExecutor>,
    ) -> Self {
        let store = CheckpointStore::new(&config.checkpoint_dir, &config.results_dir);
        Self {
            config,
            store,
            generator,
            executor,
            structure_scorer: Arc::new(PlaceholderStructureScorer),
            output_scorer: Arc::new(HeuristicOutputScorer),
            progress_interval: Some(Duration::from_secs(30)),
        }
    }

    pub fn with_structure_scorer(mut self, scorer: Arc<dyn StructureScorer>) -> Self {
        self.structure_scorer = scorer;
        self
    }

    pub fn with_output_scorer(mut self, scorer: Arc<dyn OutputScorer>) -> Self {
        self.output_scorer = scorer;
        self
    }

    /// Interval of the background progress log; `None` disables it.
    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    async fn drive<E: LayerEvaluator>(
        &self,
        evaluator: E,
        items: Vec<E::Input>,
    ) -> Result<LayerReport<E::Record>, EvalError> {
        let layer = evaluator.layer();
        let counters = ProgressCounters::new();
        let driver = LayerDriver::new(
            evaluator,
            self.store.clone(),
            self.config.effective_workers(),
            self.config.batch_size,
        )
        .with_progress(counters.clone());

        let monitor = self
            .progress_interval
            .map(|interval| ProgressMonitor::start(layer, counters, interval));
        let result = driver.run(items).await;
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        result
    }

    async fn load_layer<R: LayerRecord>(&self, layer: u8) -> Result<LayerReport<R>, EvalError> {
        info!(layer, "Loading layer results from disk");
        self.store.load_results(layer).await.map_err(|e| match e {
            CheckpointError::ResultsNotFound(path) => EvalError::Pipeline(format!(
                "Layer {} results not found at {}; run layer {} first",
                layer,
                path.display(),
                layer
            )),
            other => EvalError::Checkpoint(other),
        })
    }

    pub async fn run_layer_1(
        &self,
        items: Vec<TestItem>,
    ) -> Result<LayerReport<StructureRecord>, EvalError> {
        info!(items = items.len(), "Running layer 1: structure evaluation");
        let evaluator =
            StructureEvaluator::new(Arc::clone(&self.generator), Arc::clone(&self.structure_scorer))
                .with_retry_policy(self.config.retry_policy());
        self.drive(evaluator, items).await
    }

    pub async fn run_layer_2(
        &self,
        layer_1: &LayerReport<StructureRecord>,
    ) -> Result<LayerReport<ExecutionRecord>, EvalError> {
        let workflows: Vec<StructureRecord> = layer_1
            .test_results()
            .iter()
            .filter(|r| r.is_executable())
            .cloned()
            .collect();

        if workflows.is_empty() {
            warn!("No successful workflows from layer 1 to execute");
            return Ok(LayerReport::empty(2, NO_WORKFLOWS_MESSAGE));
        }

        info!(workflows = workflows.len(), "Running layer 2: execution evaluation");
        let evaluator = ExecutionEvaluator::new(
            Arc::clone(&self.executor),
            self.config.workflow_execution_timeout,
        )
        .with_retry_policy(
            RetryPolicy::new(EXECUTION_MAX_RETRIES, EXECUTION_RETRY_DELAY)
                .with_backoff_factor(self.config.retry_backoff_factor),
        )
        .with_concurrency(self.config.max_threads_per_process);
        self.drive(evaluator, workflows).await
    }

    pub async fn run_layer_3(
        &self,
        layer_2: &LayerReport<ExecutionRecord>,
    ) -> Result<LayerReport<OutputRecord>, EvalError> {
        let executions: Vec<ExecutionRecord> = layer_2
            .test_results()
            .iter()
            .filter(|r| r.overall_success)
            .cloned()
            .collect();

        if executions.is_empty() {
            warn!("No successful workflow executions from layer 2 to evaluate");
            return Ok(LayerReport::empty(3, NO_EXECUTIONS_MESSAGE));
        }

        info!(executions = executions.len(), "Running layer 3: output quality evaluation");
        let evaluator = OutputQualityEvaluator::new(Arc::clone(&self.output_scorer))
            .with_retry_policy(self.config.retry_policy());
        self.drive(evaluator, executions).await
    }

    /// Runs every configured layer and writes the comprehensive report.
    ///
    /// Test data is loaded from `eval_data_dir` when none is given and layer 1
    /// is scheduled.
    pub async fn run_full_evaluation(
        &self,
        test_data: Option<Vec<TestItem>>,
    ) -> Result<FinalReport, EvalError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, layers = ?self.config.layers_to_run, "Starting evaluation pipeline");

        let outcome = self.run_layers(test_data, run_id, start).await;
        if let Err(e) = &outcome {
            error!(%run_id, error = %e, "Evaluation pipeline failed");
        }

        let elapsed = start.elapsed().as_secs_f64();
        info!(%run_id, elapsed_secs = format!("{:.2}", elapsed), "Pipeline finished");
        println!("Pipeline completed in {:.2} seconds", elapsed);
        outcome
    }

    async fn run_layers(
        &self,
        test_data: Option<Vec<TestItem>>,
        run_id: Uuid,
        start: Instant,
    ) -> Result<FinalReport, EvalError> {
        let layers = &self.config.layers_to_run;
        let mut results = LayerResults::default();

        if layers.contains(&1) {
            let items = match test_data {
                Some(items) => items,
                None => load_test_data(&self.config.eval_data_dir)?,
            };
            if items.is_empty() {
                return Err(EvalError::Pipeline("No test data found or provided".to_string()));
            }

            let report = self.run_layer_1(items).await?;
            print_layer_summary(1, report.summary(), None);
            results.layer_1 = Some(report);
        }

        if layers.contains(&2) {
            let loaded;
            let layer_1 = match &results.layer_1 {
                Some(report) => report,
                None => {
                    loaded = self.load_layer::<StructureRecord>(1).await?;
                    &loaded
                }
            };

            let report = self.run_layer_2(layer_1).await?;
            let extra = average_workflow_success_rate(&report)
                .map(|rate| format!("Average workflow success rate: {:.1}%", rate * 100.0));
            print_layer_summary(2, report.summary(), extra);
            results.layer_2 = Some(report);
        }

        if layers.contains(&3) {
            let loaded;
            let layer_2 = match &results.layer_2 {
                Some(report) => report,
                None => {
                    loaded = self.load_layer::<ExecutionRecord>(2).await?;
                    &loaded
                }
            };

            let report = self.run_layer_3(layer_2).await?;
            let extra = average_quality_score(&report)
                .map(|avg| format!("Average quality score: {:.2}/10", avg));
            print_layer_summary(3, report.summary(), extra);
            results.layer_3 = Some(report);
        }

        let report = FinalReport {
            evaluation_metadata: EvaluationMetadata {
                run_id,
                timestamp: chrono::Local::now().to_rfc3339(),
                total_execution_time: start.elapsed().as_secs_f64(),
                config: self.config.to_snapshot(),
                layers_executed: results.executed_layers(),
            },
            overall_summary: OverallSummary::from_results(&results),
            recommendations: generate_recommendations(&results),
            layer_results: results,
        };

        let path = self.report_path();
        write_json_atomic(&path, &report).await?;
        info!(path = %path.display(), "Comprehensive report saved");
        print_overall_summary(&report.overall_summary, &path);

        Ok(report)
    }

    fn report_path(&self) -> PathBuf {
        let stamp = file_stamp(chrono::Utc::now());
        self.config
            .results_dir
            .join(format!("comprehensive_evaluation_report_{}.json", stamp))
    }
}
