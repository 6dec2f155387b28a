//! Layer 1: workflow generation and structure scoring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::data::{ParameterSpec, TestItem};
use crate::error::{ErrorDetails, EvalError};
use crate::pipeline::{LayerEvaluator, LayerRecord, RetryPolicy};
use crate::scoring::{StructureEvaluation, StructureScorer};
use crate::workflow::WorkflowGenerator;

/// Completed batches between layer 1 checkpoints.
pub const STRUCTURE_CHECKPOINT_INTERVAL: usize = 5;

/// Layer 1 result for one test item.
///
/// Carries the requirement and declared parameters forward so layer 2 can
/// synthesize inputs without going back to the raw test data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRecord {
    pub test_id: String,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_requirement: String,
    #[serde(default)]
    pub workflow_inputs: Vec<ParameterSpec>,
    #[serde(default)]
    pub workflow_outputs: Vec<ParameterSpec>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure_evaluation: Option<StructureEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    /// Seconds spent on this item.
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub timestamp: String,
}

impl LayerRecord for StructureRecord {
    fn test_id(&self) -> &str {
        &self.test_id
    }

    fn is_success(&self) -> bool {
        self.success
    }
}

impl StructureRecord {
    /// Whether layer 2 can execute this record's workflow.
    pub fn is_executable(&self) -> bool {
        self.success && self.workflow_json.is_some()
    }
}

/// Generates a workflow for each test item and scores its structure.
pub struct StructureEvaluator {
    generator: Arc<dyn WorkflowGenerator>,
    scorer: Arc<dyn StructureScorer>,
    retry: RetryPolicy,
}

impl StructureEvaluator {
    pub fn new(generator: Arc<dyn WorkflowGenerator>, scorer: Arc<dyn StructureScorer>) -> Self {
        Self {
            generator,
            scorer,
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
        }
    }

    /// Override the retry policy around the generator call.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn generate_and_score(
        &self,
        item: &TestItem,
    ) -> Result<(Value, StructureEvaluation), ErrorDetails> {
        let capture = |err: EvalError| ErrorDetails::capture(&err, module_path!());

        let generator = &self.generator;
        let goal = item.workflow_requirement.as_str();
        let inputs = item.workflow_inputs.as_slice();
        let outputs = item.workflow_outputs.as_slice();

        let graph = self
            .retry
            .run("generate_workflow", move || {
                generator.generate_workflow(goal, inputs, outputs)
            })
            .await
            .map_err(|err| {
                warn!(test_id = %item.test_id, error = %err, "Workflow generation failed");
                capture(err).with_context(format!("Failed to generate workflow for {}", item.test_id))
            })?;

        debug!(
            test_id = %item.test_id,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Generated workflow"
        );

        let workflow_json = graph.to_json().map_err(capture)?;
        let evaluation = self.scorer.score(&workflow_json, item).map_err(capture)?;
        Ok((workflow_json, evaluation))
    }
}

#[async_trait]
impl LayerEvaluator for StructureEvaluator {
    type Input = TestItem;
    type Record = StructureRecord;

    fn layer(&self) -> u8 {
        1
    }

    fn checkpoint_interval(&self) -> usize {
        STRUCTURE_CHECKPOINT_INTERVAL
    }

    fn input_id<'a>(&self, input: &'a TestItem) -> &'a str {
        &input.test_id
    }

    async fn evaluate(&self, item: &TestItem) -> Result<StructureRecord, EvalError> {
        let start = Instant::now();
        let outcome = self.generate_and_score(item).await;

        let mut record = StructureRecord {
            test_id: item.test_id.clone(),
            workflow_name: item.workflow_name.clone(),
            workflow_requirement: item.workflow_requirement.clone(),
            workflow_inputs: item.workflow_inputs.clone(),
            workflow_outputs: item.workflow_outputs.clone(),
            success: false,
            workflow_json: None,
            structure_evaluation: None,
            error: None,
            execution_time: 0.0,
            timestamp: String::new(),
        };

        match outcome {
            Ok((workflow_json, evaluation)) => {
                record.success = true;
                record.workflow_json = Some(workflow_json);
                record.structure_evaluation = Some(evaluation);
            }
            Err(details) => record.error = Some(details),
        }

        record.execution_time = start.elapsed().as_secs_f64();
        record.timestamp = chrono::Local::now().to_rfc3339();
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::PlaceholderStructureScorer;
    use crate::workflow::{SkeletonWorkflowGenerator, WorkflowGraph};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysInvalid {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl WorkflowGenerator for AlwaysInvalid {
        async fn generate_workflow(
            &self,
            _goal: &str,
            _inputs: &[ParameterSpec],
            _outputs: &[ParameterSpec],
        ) -> Result<WorkflowGraph, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EvalError::InvalidValue("requirement is ambiguous".into()))
        }
    }

    fn item() -> TestItem {
        TestItem::new("wf-1", "content_analysis", "Analyze news articles")
            .with_inputs(vec![ParameterSpec::new("article_content", "string")])
            .with_outputs(vec![ParameterSpec::new("summary", "string")])
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let evaluator = StructureEvaluator::new(
            Arc::new(SkeletonWorkflowGenerator),
            Arc::new(PlaceholderStructureScorer),
        );
        let record = evaluator.evaluate(&item()).await.unwrap();

        assert!(record.success);
        assert!(record.is_executable());
        assert_eq!(record.test_id, "wf-1");
        assert_eq!(record.workflow_inputs.len(), 1);
        let eval = record.structure_evaluation.unwrap();
        assert_eq!(eval.overall_score, 8.3);
        assert_eq!(record.workflow_json.unwrap()["nodes"][0]["name"], "execute_task");
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_generator_failure_is_captured_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let evaluator = StructureEvaluator::new(
            Arc::new(AlwaysInvalid {
                calls: calls.clone(),
            }),
            Arc::new(PlaceholderStructureScorer),
        )
        .with_retry_policy(RetryPolicy::new(2, Duration::ZERO));

        let record = evaluator.evaluate(&item()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!record.success);
        assert!(!record.is_executable());
        let error = record.error.unwrap();
        assert_eq!(error.error_type, "ValueError");
        assert!(error.is_expected);
        assert_eq!(
            error.message,
            "Failed to generate workflow for wf-1: requirement is ambiguous"
        );
    }

    #[test]
    fn test_record_omits_absent_fields() {
        let record = StructureRecord {
            test_id: "t".into(),
            workflow_name: "n".into(),
            workflow_requirement: String::new(),
            workflow_inputs: Vec::new(),
            workflow_outputs: Vec::new(),
            success: false,
            workflow_json: None,
            structure_evaluation: None,
            error: None,
            execution_time: 0.5,
            timestamp: "now".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("workflow_json").is_none());
        assert!(json.get("error").is_none());
        assert_eq!(json["success"], false);
    }
}
