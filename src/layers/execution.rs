//! Layer 2: execute generated workflows against synthesized inputs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::data::ParameterSpec;
use crate::error::{ErrorDetails, EvalError};
use crate::pipeline::{LayerEvaluator, LayerRecord, RetryPolicy};
use crate::workflow::WorkflowExecutor;

use super::structure::StructureRecord;

/// Completed batches between layer 2 checkpoints.
pub const EXECUTION_CHECKPOINT_INTERVAL: usize = 3;

/// Input sets generated for workflows without a fixed scenario set.
const GENERATED_INPUT_SETS: usize = 3;

/// Error messages kept per error type.
const MAX_ERROR_EXAMPLES: usize = 3;

/// One run of a workflow against one input set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// 1-based index of the input set.
    pub input_set: usize,
    pub success: bool,
    pub input: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    #[serde(default)]
    pub execution_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub success_rate: f64,
    /// Mean over successful executions only.
    pub average_execution_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorTypeStats {
    pub count: usize,
    pub expected_count: usize,
    pub unexpected_count: usize,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub total_errors: usize,
    pub expected_errors: usize,
    pub unexpected_errors: usize,
    pub error_types: BTreeMap<String, ErrorTypeStats>,
}

/// Layer 2 result for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub test_id: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_requirement: String,
    /// True when at least one input set executed successfully.
    pub overall_success: bool,
    #[serde(default)]
    pub execution_results: Vec<ExecutionAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<ExecutionStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_analysis: Option<ErrorAnalysis>,
    /// Set when the workflow could not be run at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    #[serde(default)]
    pub total_execution_time: f64,
    #[serde(default)]
    pub timestamp: String,
}

impl LayerRecord for ExecutionRecord {
    fn test_id(&self) -> &str {
        &self.test_id
    }

    fn is_success(&self) -> bool {
        self.overall_success
    }
}

impl ExecutionRecord {
    pub fn successful_attempts(&self) -> impl Iterator<Item = &ExecutionAttempt> {
        self.execution_results.iter().filter(|a| a.success)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn content_analysis_scenarios() -> Vec<Map<String, Value>> {
    vec![
        object(json!({
            "article_content": "This is a sample news article about technology trends and artificial intelligence developments in 2024.",
            "article_title": "AI Technology Trends in 2024",
            "source_category": "technology"
        })),
        object(json!({
            "article_content": "Breaking news: Stock market shows significant volatility amid economic uncertainty and inflation concerns.",
            "article_title": "Market Volatility Continues",
            "source_category": "finance"
        })),
        object(json!({
            "article_content": "Local sports team wins championship after an exciting final match that went into overtime.",
            "article_title": "Championship Victory in Overtime",
            "source_category": "sports"
        })),
    ]
}

/// Placeholder value for a declared input parameter.
pub fn sample_value(spec: &ParameterSpec) -> Value {
    let name = &spec.name;
    match spec.param_type.as_str() {
        "string" => Value::String(format!("sample_{}_value", name)),
        "number" => json!(42),
        "boolean" => Value::Bool(true),
        "array" => json!([format!("item1_{}", name), format!("item2_{}", name)]),
        _ => Value::String(format!("sample_{}", name)),
    }
}

/// Input sets to execute a workflow with.
///
/// `content_analysis` gets three fixed article scenarios; anything else gets
/// three sets with one placeholder value per declared input.
pub fn generate_test_inputs(
    workflow_name: &str,
    inputs: &[ParameterSpec],
) -> Vec<Map<String, Value>> {
    if workflow_name == "content_analysis" {
        return content_analysis_scenarios();
    }

    (0..GENERATED_INPUT_SETS)
        .map(|_| {
            inputs
                .iter()
                .map(|spec| (spec.name.clone(), sample_value(spec)))
                .collect()
        })
        .collect()
}

/// Groups failed attempts by error type.
pub fn analyze_errors(attempts: &[ExecutionAttempt]) -> ErrorAnalysis {
    let mut analysis = ErrorAnalysis::default();

    for attempt in attempts.iter().filter(|a| !a.success) {
        analysis.total_errors += 1;

        let (error_type, is_expected, message) = match &attempt.error {
            Some(error) => (error.error_type.clone(), error.is_expected, error.message.clone()),
            None => ("Unknown".to_string(), false, String::new()),
        };

        let stats = analysis.error_types.entry(error_type).or_default();
        stats.count += 1;
        if is_expected {
            stats.expected_count += 1;
            analysis.expected_errors += 1;
        } else {
            stats.unexpected_count += 1;
            analysis.unexpected_errors += 1;
        }
        if stats.examples.len() < MAX_ERROR_EXAMPLES {
            stats.examples.push(message);
        }
    }

    analysis
}

pub fn compute_statistics(attempts: &[ExecutionAttempt]) -> ExecutionStatistics {
    let total = attempts.len();
    let successful: Vec<&ExecutionAttempt> = attempts.iter().filter(|a| a.success).collect();

    ExecutionStatistics {
        total_executions: total,
        successful_executions: successful.len(),
        failed_executions: total - successful.len(),
        success_rate: if total > 0 {
            successful.len() as f64 / total as f64
        } else {
            0.0
        },
        average_execution_time: if successful.is_empty() {
            0.0
        } else {
            successful.iter().map(|a| a.execution_time).sum::<f64>() / successful.len() as f64
        },
    }
}

/// Runs each executable layer 1 workflow against a set of test inputs.
pub struct ExecutionEvaluator {
    executor: Arc<dyn WorkflowExecutor>,
    retry: RetryPolicy,
    execution_timeout: Duration,
    concurrency: usize,
}

impl ExecutionEvaluator {
    pub fn new(executor: Arc<dyn WorkflowExecutor>, execution_timeout: Duration) -> Self {
        Self {
            executor,
            retry: RetryPolicy::new(2, Duration::from_secs(1)),
            execution_timeout,
            concurrency: 1,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Input sets of one workflow executed at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn execute_once(
        &self,
        workflow: &Value,
        input: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EvalError> {
        tokio::time::timeout(self.execution_timeout, self.executor.execute(workflow, input))
            .await
            .map_err(|_| EvalError::Timeout(self.execution_timeout))?
    }

    async fn run_input_set(
        &self,
        test_id: &str,
        workflow: &Value,
        index: usize,
        input: Map<String, Value>,
    ) -> ExecutionAttempt {
        let start = Instant::now();
        let outcome = self
            .retry
            .run("execute_workflow", || self.execute_once(workflow, &input))
            .await;
        let execution_time = start.elapsed().as_secs_f64();

        match outcome {
            Ok(output) => ExecutionAttempt {
                input_set: index + 1,
                success: true,
                input,
                output: Some(output),
                error: None,
                execution_time,
            },
            Err(err) => {
                warn!(test_id, input_set = index + 1, error = %err, "Workflow execution failed");
                ExecutionAttempt {
                    input_set: index + 1,
                    success: false,
                    input,
                    output: None,
                    error: Some(ErrorDetails::capture(&err, module_path!())),
                    execution_time,
                }
            }
        }
    }
}

#[async_trait]
impl LayerEvaluator for ExecutionEvaluator {
    type Input = StructureRecord;
    type Record = ExecutionRecord;

    fn layer(&self) -> u8 {
        2
    }

    fn checkpoint_interval(&self) -> usize {
        EXECUTION_CHECKPOINT_INTERVAL
    }

    fn input_id<'a>(&self, input: &'a StructureRecord) -> &'a str {
        &input.test_id
    }

    async fn evaluate(&self, item: &StructureRecord) -> Result<ExecutionRecord, EvalError> {
        let start = Instant::now();
        let mut record = ExecutionRecord {
            test_id: item.test_id.clone(),
            workflow_name: item.workflow_name.clone(),
            workflow_requirement: item.workflow_requirement.clone(),
            overall_success: false,
            execution_results: Vec::new(),
            statistics: None,
            error_analysis: None,
            error: None,
            total_execution_time: 0.0,
            timestamp: String::new(),
        };

        match item.workflow_json.as_ref().filter(|w| !w.is_null()) {
            None => {
                let err = EvalError::InvalidValue("No workflow JSON found in test data".into());
                record.error = Some(ErrorDetails::capture(&err, module_path!()));
            }
            Some(workflow) => {
                let inputs = generate_test_inputs(&item.workflow_name, &item.workflow_inputs);
                debug!(test_id = %item.test_id, input_sets = inputs.len(), "Executing workflow");

                let attempts: Vec<ExecutionAttempt> = stream::iter(inputs.into_iter().enumerate())
                    .map(|(index, input)| self.run_input_set(&item.test_id, workflow, index, input))
                    .buffered(self.concurrency)
                    .collect()
                    .await;

                record.overall_success = attempts.iter().any(|a| a.success);
                record.statistics = Some(compute_statistics(&attempts));
                record.error_analysis = Some(analyze_errors(&attempts));
                record.execution_results = attempts;
            }
        }

        record.total_execution_time = start.elapsed().as_secs_f64();
        record.timestamp = chrono::Local::now().to_rfc3339();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::SimulatedExecutor;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn structure_record(name: &str, workflow: Option<Value>) -> StructureRecord {
        StructureRecord {
            test_id: "wf-1".into(),
            workflow_name: name.into(),
            workflow_requirement: "do things".into(),
            workflow_inputs: vec![
                ParameterSpec::new("topic", "string"),
                ParameterSpec::new("count", "number"),
            ],
            workflow_outputs: Vec::new(),
            success: workflow.is_some(),
            workflow_json: workflow,
            structure_evaluation: None,
            error: None,
            execution_time: 0.0,
            timestamp: String::new(),
        }
    }

    fn graph() -> Value {
        json!({"goal": "g", "nodes": [{"name": "a"}], "edges": []})
    }

    fn evaluator(executor: Arc<dyn WorkflowExecutor>) -> ExecutionEvaluator {
        ExecutionEvaluator::new(executor, Duration::from_secs(5))
            .with_retry_policy(RetryPolicy::new(2, Duration::ZERO))
    }

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl WorkflowExecutor for Flaky {
        async fn execute(
            &self,
            _workflow: &Value,
            inputs: &Map<String, Value>,
        ) -> Result<Map<String, Value>, EvalError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(EvalError::ExecutionFailed("engine unavailable".into()));
            }
            Ok(inputs.clone())
        }
    }

    struct Hangs;

    #[async_trait]
    impl WorkflowExecutor for Hangs {
        async fn execute(
            &self,
            _workflow: &Value,
            _inputs: &Map<String, Value>,
        ) -> Result<Map<String, Value>, EvalError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Map::new())
        }
    }

    #[test]
    fn test_sample_values_by_type() {
        assert_eq!(
            sample_value(&ParameterSpec::new("q", "string")),
            json!("sample_q_value")
        );
        assert_eq!(sample_value(&ParameterSpec::new("n", "number")), json!(42));
        assert_eq!(sample_value(&ParameterSpec::new("b", "boolean")), json!(true));
        assert_eq!(
            sample_value(&ParameterSpec::new("xs", "array")),
            json!(["item1_xs", "item2_xs"])
        );
        assert_eq!(sample_value(&ParameterSpec::new("o", "object")), json!("sample_o"));
    }

    #[test]
    fn test_generate_inputs() {
        let scenarios = generate_test_inputs("content_analysis", &[]);
        assert_eq!(scenarios.len(), 3);
        assert_eq!(scenarios[0]["article_title"], "AI Technology Trends in 2024");
        assert_eq!(scenarios[1]["source_category"], "finance");
        assert_eq!(scenarios[2]["source_category"], "sports");

        let specs = vec![ParameterSpec::new("topic", "string")];
        let generated = generate_test_inputs("other", &specs);
        assert_eq!(generated.len(), 3);
        assert!(generated.iter().all(|set| set["topic"] == "sample_topic_value"));
    }

    #[test]
    fn test_analyze_errors_caps_examples() {
        let failure = |msg: &str, err: EvalError| ExecutionAttempt {
            input_set: 1,
            success: false,
            input: Map::new(),
            output: None,
            error: Some(ErrorDetails::capture(&err, "t")).map(|mut e| {
                e.message = msg.to_string();
                e
            }),
            execution_time: 0.0,
        };
        let attempts: Vec<ExecutionAttempt> = (0..4)
            .map(|i| failure(&format!("m{}", i), EvalError::ExecutionFailed("x".into())))
            .chain(std::iter::once(failure("k", EvalError::MissingKey("k".into()))))
            .collect();

        let analysis = analyze_errors(&attempts);
        assert_eq!(analysis.total_errors, 5);
        assert_eq!(analysis.expected_errors, 1);
        assert_eq!(analysis.unexpected_errors, 4);
        let exec = &analysis.error_types["WorkflowExecutionFailed"];
        assert_eq!(exec.count, 4);
        assert_eq!(exec.examples, vec!["m0", "m1", "m2"]);
        assert_eq!(analysis.error_types["KeyError"].expected_count, 1);
    }

    #[tokio::test]
    async fn test_missing_workflow_json() {
        let evaluator = evaluator(Arc::new(SimulatedExecutor::new()));
        let record = evaluator
            .evaluate(&structure_record("x", None))
            .await
            .unwrap();

        assert!(!record.overall_success);
        let error = record.error.unwrap();
        assert_eq!(error.error_type, "ValueError");
        assert_eq!(error.message, "No workflow JSON found in test data");
        assert!(record.execution_results.is_empty());
    }

    #[tokio::test]
    async fn test_simulated_execution_succeeds() {
        let executor = SimulatedExecutor::new().with_latency(Duration::ZERO);
        let evaluator = evaluator(Arc::new(executor)).with_concurrency(2);
        let record = evaluator
            .evaluate(&structure_record("content_analysis", Some(graph())))
            .await
            .unwrap();

        assert!(record.overall_success);
        assert_eq!(record.execution_results.len(), 3);
        let indices: Vec<usize> = record.execution_results.iter().map(|a| a.input_set).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        let stats = record.statistics.unwrap();
        assert_eq!(stats.successful_executions, 3);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(record.error_analysis.unwrap().total_errors, 0);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let executor = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let record = evaluator(executor.clone())
            .evaluate(&structure_record("other", Some(graph())))
            .await
            .unwrap();

        assert!(record.overall_success);
        assert!(record.execution_results.iter().all(|a| a.success));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_execution_timeout_is_enforced() {
        let evaluator = ExecutionEvaluator::new(Arc::new(Hangs), Duration::from_millis(10))
            .with_retry_policy(RetryPolicy::new(0, Duration::ZERO))
            .with_concurrency(3);
        let record = evaluator
            .evaluate(&structure_record("other", Some(graph())))
            .await
            .unwrap();

        assert!(!record.overall_success);
        let analysis = record.error_analysis.unwrap();
        assert_eq!(analysis.total_errors, 3);
        assert_eq!(analysis.error_types["TimeoutError"].count, 3);
    }
}
