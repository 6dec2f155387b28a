//! Workflow execution engine collaborators.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::EvalError;

use super::graph::WorkflowGraph;

/// Runs a serialized workflow against one input map.
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    async fn execute(
        &self,
        workflow: &Value,
        inputs: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EvalError>;
}

/// Stand-in engine with a fixed latency and canned outputs.
///
/// Inputs carrying `article_content` get a content-analysis shaped result;
/// anything else gets a generic completion record.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    latency: Duration,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
        }
    }
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn simulate(inputs: &Map<String, Value>) -> Map<String, Value> {
        let output = if inputs.contains_key("article_content") {
            json!({
                "categories": [{"name": "technology", "confidence": 0.85}],
                "key_topics": ["AI", "trends", "2024"],
                "sentiment_score": 0.3,
                "summary": "Article discusses technology trends and AI developments."
            })
        } else {
            json!({
                "result": "processed_data",
                "status": "completed"
            })
        };

        match output {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[async_trait]
impl WorkflowExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        workflow: &Value,
        inputs: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EvalError> {
        WorkflowGraph::from_json(workflow)
            .map_err(|e| EvalError::ExecutionFailed(e.to_string()))?;

        tokio::time::sleep(self.latency).await;
        Ok(Self::simulate(inputs))
    }
}
