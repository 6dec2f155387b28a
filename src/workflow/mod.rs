//! Workflow graph model and the generator/executor collaborators.

mod executor;
mod generator;
mod graph;

pub use executor::{SimulatedExecutor, WorkflowExecutor};
pub use generator::{LlmWorkflowGenerator, SkeletonWorkflowGenerator, WorkflowGenerator};
pub use graph::{WorkflowEdge, WorkflowGraph, WorkflowNode};
