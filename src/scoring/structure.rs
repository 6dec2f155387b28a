//! Layer 1 structure scoring.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::TestItem;
use crate::error::EvalError;

use super::CriterionScore;

/// Score breakdown for a generated workflow's structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureEvaluation {
    pub structural_integrity: CriterionScore,
    pub input_output_matching: CriterionScore,
    pub task_decomposition_logic: CriterionScore,
    pub overall_score: f64,
    pub evaluation_prompt: String,
}

/// Scores a serialized workflow against the item it was generated from.
pub trait StructureScorer: Send + Sync {
    fn score(&self, workflow: &Value, item: &TestItem) -> Result<StructureEvaluation, EvalError>;
}

/// Renders the judging prompt for a workflow.
pub fn structure_evaluation_prompt(workflow: &Value, item: &TestItem) -> Result<String, EvalError> {
    Ok(format!(
        r#"Please evaluate the following generated workflow structure based on these criteria:

1. Structural Integrity (0-10): Are all required components present?
2. Input/Output Matching (0-10): Do inputs and outputs align properly?
3. Task Decomposition Logic (0-10): Is the task breakdown logical and coherent?

Original Requirements: {}
Required workflow inputs:
```json
{}
```

Required workflow outputs:
```json
{}
```

Generated Workflow:
```json
{}
```

Provide scores and brief explanations for each criterion."#,
        item.workflow_requirement,
        serde_json::to_string_pretty(&item.workflow_inputs)?,
        serde_json::to_string_pretty(&item.workflow_outputs)?,
        serde_json::to_string_pretty(workflow)?,
    ))
}

/// Fixed-response scorer standing in for an LLM judgment.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderStructureScorer;

impl StructureScorer for PlaceholderStructureScorer {
    fn score(&self, workflow: &Value, item: &TestItem) -> Result<StructureEvaluation, EvalError> {
        Ok(StructureEvaluation {
            structural_integrity: CriterionScore::new(
                8.5,
                "Workflow has all required components with proper node structure",
            ),
            input_output_matching: CriterionScore::new(
                9.0,
                "Input and output parameters are well-matched across workflow nodes",
            ),
            task_decomposition_logic: CriterionScore::new(
                7.5,
                "Task breakdown is logical but could be more granular",
            ),
            overall_score: 8.3,
            evaluation_prompt: structure_evaluation_prompt(workflow, item)?,
        })
    }
}
