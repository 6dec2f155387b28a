//! Workflow generator collaborators.
//!
//! Layer 1 only depends on the [`WorkflowGenerator`] trait. The LLM-backed
//! generator asks a chat model for a graph as JSON; the skeleton generator is
//! deterministic and offline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::data::ParameterSpec;
use crate::error::EvalError;
use crate::llm::{extract_json_object, GenerationRequest, LlmProvider, Message};

use super::graph::{WorkflowEdge, WorkflowGraph, WorkflowNode};

/// Produces a workflow graph from a goal and declared parameters.
#[async_trait]
pub trait WorkflowGenerator: Send + Sync {
    async fn generate_workflow(
        &self,
        goal: &str,
        inputs: &[ParameterSpec],
        outputs: &[ParameterSpec],
    ) -> Result<WorkflowGraph, EvalError>;
}

const GENERATION_SYSTEM_PROMPT: &str = r#"You are a workflow planner. Decompose the user's goal into a directed graph of sub-tasks.

Respond with a single JSON object of the form:
{
  "goal": "<the goal>",
  "nodes": [
    {"name": "<snake_case>", "description": "<what it does>",
     "inputs": [{"name": "...", "type": "string|number|boolean|array", "description": "...", "required": true}],
     "outputs": [{"name": "...", "type": "...", "description": "...", "required": true}],
     "agents": ["<agent name>"]}
  ],
  "edges": [{"source": "<node name>", "target": "<node name>"}]
}

The first node must consume the declared workflow inputs and the last node must produce the declared workflow outputs."#;

/// Generator backed by an [`LlmProvider`].
pub struct LlmWorkflowGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
}

impl LlmWorkflowGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }

    fn user_prompt(goal: &str, inputs: &[ParameterSpec], outputs: &[ParameterSpec]) -> Result<String, EvalError> {
        Ok(format!(
            "Goal: {}\n\nWorkflow inputs:\n```json\n{}\n```\n\nWorkflow outputs:\n```json\n{}\n```",
            goal,
            serde_json::to_string_pretty(inputs)?,
            serde_json::to_string_pretty(outputs)?,
        ))
    }
}

#[async_trait]
impl WorkflowGenerator for LlmWorkflowGenerator {
    async fn generate_workflow(
        &self,
        goal: &str,
        inputs: &[ParameterSpec],
        outputs: &[ParameterSpec],
    ) -> Result<WorkflowGraph, EvalError> {
        if goal.trim().is_empty() {
            return Err(EvalError::InvalidValue("workflow goal cannot be empty".to_string()));
        }

        let request = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(GENERATION_SYSTEM_PROMPT),
                Message::user(Self::user_prompt(goal, inputs, outputs)?),
            ],
        )
        .with_temperature(self.temperature)
        .with_json_mode();

        let response = self.provider.generate(request).await?;
        let content = response.first_content().ok_or_else(|| {
            EvalError::GenerationFailed("LLM returned no choices".to_string())
        })?;

        let json = extract_json_object(content).ok_or_else(|| {
            EvalError::GenerationFailed("LLM response did not contain a workflow graph".to_string())
        })?;
        debug!(bytes = json.len(), "Extracted workflow graph JSON");

        let mut graph: WorkflowGraph = serde_json::from_str(&json)?;
        if graph.goal.is_empty() {
            graph.goal = goal.to_string();
        }
        graph.validate()?;
        Ok(graph)
    }
}

/// Deterministic generator that maps declared inputs to outputs in one node.
#[derive(Debug, Default, Clone)]
pub struct SkeletonWorkflowGenerator;

#[async_trait]
impl WorkflowGenerator for SkeletonWorkflowGenerator {
    async fn generate_workflow(
        &self,
        goal: &str,
        inputs: &[ParameterSpec],
        outputs: &[ParameterSpec],
    ) -> Result<WorkflowGraph, EvalError> {
        if goal.trim().is_empty() {
            return Err(EvalError::InvalidValue("workflow goal cannot be empty".to_string()));
        }

        let mut nodes = vec![WorkflowNode {
            name: "execute_task".to_string(),
            description: goal.to_string(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            agents: vec!["task_agent".to_string()],
        }];
        let mut edges = Vec::new();

        if !outputs.is_empty() {
            nodes.push(WorkflowNode {
                name: "review_output".to_string(),
                description: "Check the produced outputs against the goal".to_string(),
                inputs: outputs.to_vec(),
                outputs: outputs.to_vec(),
                agents: vec!["review_agent".to_string()],
            });
            edges.push(WorkflowEdge {
                source: "execute_task".to_string(),
                target: "review_output".to_string(),
            });
        }

        Ok(WorkflowGraph {
            goal: goal.to_string(),
            nodes,
            edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationResponse, Usage};

    struct CannedProvider {
        content: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            assert!(request.json_mode);
            let content = self
                .content
                .clone()
                .ok_or_else(|| LlmError::RequestFailed("connection refused".into()))?;
            Ok(GenerationResponse {
                id: "r".into(),
                model: request.model,
                choices: vec![Choice {
                    index: 0,
                    message: Message {
                        role: "assistant".into(),
                        content,
                    },
                    finish_reason: Some("stop".into()),
                }],
                usage: Usage::default(),
            })
        }
    }

    fn generator(content: Option<&str>) -> LlmWorkflowGenerator {
        LlmWorkflowGenerator::new(
            Arc::new(CannedProvider {
                content: content.map(str::to_string),
            }),
            "gpt-4o",
            0.7,
        )
    }

    #[tokio::test]
    async fn test_llm_generator_parses_fenced_graph() {
        let content = "Plan:\n```json\n{\"nodes\": [{\"name\": \"a\"}, {\"name\": \"b\"}], \"edges\": [{\"source\": \"a\", \"target\": \"b\"}]}\n```";
        let graph = generator(Some(content))
            .generate_workflow("Do it", &[], &[])
            .await
            .unwrap();
        assert_eq!(graph.goal, "Do it");
        assert_eq!(graph.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_llm_generator_errors() {
        let err = generator(Some("I cannot help"))
            .generate_workflow("Do it", &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WorkflowGenerationFailed");

        let err = generator(None)
            .generate_workflow("Do it", &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "LlmError");

        let err = generator(Some("{}"))
            .generate_workflow("  ", &[], &[])
            .await
            .unwrap_err();
        assert!(err.is_expected());
    }

    #[tokio::test]
    async fn test_skeleton_generator() {
        let inputs = vec![ParameterSpec::new("topic", "string")];
        let outputs = vec![ParameterSpec::new("report", "string")];
        let graph = SkeletonWorkflowGenerator
            .generate_workflow("Write a report", &inputs, &outputs)
            .await
            .unwrap();

        assert!(graph.validate().is_ok());
        assert_eq!(graph.nodes[0].inputs, inputs);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);

        let single = SkeletonWorkflowGenerator
            .generate_workflow("Just run", &inputs, &[])
            .await
            .unwrap();
        assert_eq!(single.nodes.len(), 1);
    }
}
