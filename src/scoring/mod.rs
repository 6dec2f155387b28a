//! Pluggable scoring strategies for layers 1 and 3.

mod output;
mod structure;

use serde::{Deserialize, Serialize};

pub use output::{
    consistency_score, diversity_score, quality_assessment, task_completion_score,
    usefulness_score, HeuristicOutputScorer, OutputScorer, QualityScores, QUALITY_CRITERIA,
};
pub use structure::{
    structure_evaluation_prompt, PlaceholderStructureScorer, StructureEvaluation, StructureScorer,
};

/// A 0-10 score with a short justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub score: f64,
    pub explanation: String,
}

impl CriterionScore {
    pub fn new(score: f64, explanation: impl Into<String>) -> Self {
        Self {
            score,
            explanation: explanation.into(),
        }
    }
}
