//! Layer 3: score the outputs of successful executions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ErrorDetails, EvalError};
use crate::pipeline::{LayerEvaluator, LayerRecord, RetryPolicy};
use crate::scoring::{quality_assessment, OutputScorer, QualityScores, QUALITY_CRITERIA};

use super::execution::ExecutionRecord;

/// Completed batches between layer 3 checkpoints.
pub const OUTPUT_CHECKPOINT_INTERVAL: usize = 3;

const SAMPLE_EXPLANATIONS: usize = 2;

/// Scores for one successful execution, or the error that prevented them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvaluation {
    /// 1-based index among the successful executions.
    pub execution_index: usize,
    pub evaluation_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_scores: Option<QualityScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_requirement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedScore {
    pub average_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Spread between max and min; 0 for a single score.
    pub score_variance: f64,
    pub sample_explanations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallEvaluation {
    pub aggregation_success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub total_evaluations: usize,
    #[serde(default)]
    pub successful_evaluations: usize,
    #[serde(default)]
    pub aggregated_scores: BTreeMap<String, AggregatedScore>,
    #[serde(default)]
    pub overall_average_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_assessment: Option<String>,
}

/// Layer 3 result for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub test_id: String,
    #[serde(default)]
    pub workflow_name: String,
    pub evaluation_success: bool,
    /// Why the item was not evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub individual_evaluations: Vec<OutputEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_evaluation: Option<OverallEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    #[serde(default)]
    pub total_evaluation_time: f64,
    #[serde(default)]
    pub timestamp: String,
}

impl LayerRecord for OutputRecord {
    fn test_id(&self) -> &str {
        &self.test_id
    }

    fn is_success(&self) -> bool {
        self.evaluation_success
    }
}

impl OutputRecord {
    /// Overall average score, if the item was evaluated and scored above zero.
    pub fn quality_score(&self) -> Option<f64> {
        if !self.evaluation_success {
            return None;
        }
        self.overall_evaluation
            .as_ref()
            .map(|o| o.overall_average_score)
            .filter(|score| *score > 0.0)
    }
}

/// Per-criterion statistics over the successful evaluations.
pub fn aggregate_evaluations(evaluations: &[OutputEvaluation]) -> OverallEvaluation {
    let scored: Vec<&QualityScores> = evaluations
        .iter()
        .filter(|e| e.evaluation_success)
        .filter_map(|e| e.quality_scores.as_ref())
        .collect();

    if scored.is_empty() {
        return OverallEvaluation {
            aggregation_success: false,
            reason: Some("No successful individual evaluations to aggregate".to_string()),
            ..Default::default()
        };
    }

    let mut aggregated = BTreeMap::new();
    for criterion in QUALITY_CRITERIA {
        let entries: Vec<(f64, &str)> = scored
            .iter()
            .filter_map(|s| s.criterion(criterion))
            .map(|c| (c.score, c.explanation.as_str()))
            .collect();
        if entries.is_empty() {
            continue;
        }

        let scores: Vec<f64> = entries.iter().map(|(s, _)| *s).collect();
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        aggregated.insert(
            criterion.to_string(),
            AggregatedScore {
                average_score: scores.iter().sum::<f64>() / scores.len() as f64,
                min_score: min,
                max_score: max,
                score_variance: if scores.len() > 1 { max - min } else { 0.0 },
                sample_explanations: entries
                    .iter()
                    .take(SAMPLE_EXPLANATIONS)
                    .map(|(_, e)| e.to_string())
                    .collect(),
            },
        );
    }

    let overall = if aggregated.is_empty() {
        0.0
    } else {
        aggregated.values().map(|a| a.average_score).sum::<f64>() / aggregated.len() as f64
    };

    OverallEvaluation {
        aggregation_success: true,
        reason: None,
        total_evaluations: evaluations.len(),
        successful_evaluations: scored.len(),
        aggregated_scores: aggregated,
        overall_average_score: overall,
        quality_assessment: Some(quality_assessment(overall).to_string()),
    }
}

/// Scores every successful execution output of a layer 2 record.
pub struct OutputQualityEvaluator {
    scorer: Arc<dyn OutputScorer>,
    retry: RetryPolicy,
}

impl OutputQualityEvaluator {
    pub fn new(scorer: Arc<dyn OutputScorer>) -> Self {
        Self {
            scorer,
            retry: RetryPolicy::new(3, Duration::from_secs(2)),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Scores one output on a blocking thread, retrying synchronously there.
    async fn score_output(
        &self,
        output: Map<String, Value>,
        input: Map<String, Value>,
        requirement: String,
    ) -> Result<QualityScores, EvalError> {
        let scorer = Arc::clone(&self.scorer);
        let retry = self.retry.clone();
        tokio::task::spawn_blocking(move || {
            retry.run_blocking("score_output", || scorer.score(&output, &input, &requirement))
        })
        .await
        .map_err(|e| EvalError::WorkerPanic(format!("output scoring task failed: {}", e)))?
    }

    fn skipped(item: &ExecutionRecord, reason: &str) -> OutputRecord {
        OutputRecord {
            test_id: item.test_id.clone(),
            workflow_name: item.workflow_name.clone(),
            evaluation_success: false,
            reason: Some(reason.to_string()),
            individual_evaluations: Vec::new(),
            overall_evaluation: None,
            error: None,
            total_evaluation_time: 0.0,
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }
}

#[async_trait]
impl LayerEvaluator for OutputQualityEvaluator {
    type Input = ExecutionRecord;
    type Record = OutputRecord;

    fn layer(&self) -> u8 {
        3
    }

    fn checkpoint_interval(&self) -> usize {
        OUTPUT_CHECKPOINT_INTERVAL
    }

    fn input_id<'a>(&self, input: &'a ExecutionRecord) -> &'a str {
        &input.test_id
    }

    async fn evaluate(&self, item: &ExecutionRecord) -> Result<OutputRecord, EvalError> {
        if !item.overall_success {
            return Ok(Self::skipped(
                item,
                "Workflow execution failed, no outputs to evaluate",
            ));
        }

        let successful: Vec<_> = item.successful_attempts().collect();
        if successful.is_empty() {
            return Ok(Self::skipped(item, "No successful executions found"));
        }

        let start = Instant::now();
        let mut evaluations = Vec::with_capacity(successful.len());

        for (index, attempt) in successful.into_iter().enumerate() {
            let output = attempt.output.clone().unwrap_or_default();
            let input = attempt.input.clone();

            let evaluation = match self
                .score_output(output.clone(), input.clone(), item.workflow_requirement.clone())
                .await
            {
                Ok(scores) => OutputEvaluation {
                    execution_index: index + 1,
                    evaluation_success: true,
                    input_data: Some(input),
                    output_data: Some(output),
                    quality_scores: Some(scores),
                    workflow_requirement: Some(item.workflow_requirement.clone()),
                    error: None,
                },
                Err(err) => {
                    warn!(test_id = %item.test_id, execution = index + 1, error = %err, "Output scoring failed");
                    OutputEvaluation {
                        execution_index: index + 1,
                        evaluation_success: false,
                        input_data: None,
                        output_data: None,
                        quality_scores: None,
                        workflow_requirement: None,
                        error: Some(ErrorDetails::capture(&err, module_path!())),
                    }
                }
            };
            evaluations.push(evaluation);
        }

        let overall = aggregate_evaluations(&evaluations);
        Ok(OutputRecord {
            test_id: item.test_id.clone(),
            workflow_name: item.workflow_name.clone(),
            evaluation_success: true,
            reason: None,
            individual_evaluations: evaluations,
            overall_evaluation: Some(overall),
            error: None,
            total_evaluation_time: start.elapsed().as_secs_f64(),
            timestamp: chrono::Local::now().to_rfc3339(),
        })
    }
}
