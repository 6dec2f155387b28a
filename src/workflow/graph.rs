//! Serializable workflow graph exchanged between the generator, layer 1 and
//! the execution engine.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::ParameterSpec;
use crate::error::EvalError;

/// A sub-task in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<ParameterSpec>,
    #[serde(default)]
    pub outputs: Vec<ParameterSpec>,
    /// Agents assigned to this sub-task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
}

/// A dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
}

/// A graph of interdependent sub-tasks generated from a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowGraph {
    /// Parses and validates a serialized graph.
    pub fn from_json(value: &Value) -> Result<Self, EvalError> {
        let graph: WorkflowGraph = serde_json::from_value(value.clone())?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<Value, EvalError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Checks that the graph has nodes with unique names and that every edge
    /// connects known nodes.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.nodes.is_empty() {
            return Err(EvalError::InvalidValue(
                "workflow graph has no nodes".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(EvalError::InvalidValue(format!(
                    "duplicate workflow node '{}'",
                    node.name
                )));
            }
        }

        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !names.contains(end.as_str()) {
                    return Err(EvalError::MissingKey(format!(
                        "edge references unknown node '{}'",
                        end
                    )));
                }
            }
        }

        Ok(())
    }
}
