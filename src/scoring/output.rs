//! Layer 3 output quality scoring.
//!
//! The heuristic scorer grades a single execution output on four 0-10
//! criteria from its shape and content. A real judge only has to honor the
//! same contract: given input, output and requirement, return four scores
//! with short justifications.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EvalError;

use super::CriterionScore;

/// Criterion names in report order.
pub const QUALITY_CRITERIA: [&str; 4] = [
    "task_completion",
    "content_consistency",
    "diversity",
    "usefulness",
];

/// Markers of boilerplate content.
const GENERIC_MARKERS: [&str; 3] = ["sample", "default", "generic"];

/// Keys that indicate an analysis-style answer to an article input.
const ANALYSIS_KEYS: [&str; 4] = ["categories", "topics", "sentiment", "summary"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub task_completion: CriterionScore,
    pub content_consistency: CriterionScore,
    pub diversity: CriterionScore,
    pub usefulness: CriterionScore,
    pub overall_score: f64,
    pub evaluation_prompt: String,
}

impl QualityScores {
    /// Looks up a criterion by its report name.
    pub fn criterion(&self, name: &str) -> Option<&CriterionScore> {
        match name {
            "task_completion" => Some(&self.task_completion),
            "content_consistency" => Some(&self.content_consistency),
            "diversity" => Some(&self.diversity),
            "usefulness" => Some(&self.usefulness),
            _ => None,
        }
    }
}

/// Grades one execution output.
pub trait OutputScorer: Send + Sync {
    fn score(
        &self,
        output: &Map<String, Value>,
        input: &Map<String, Value>,
        requirement: &str,
    ) -> Result<QualityScores, EvalError>;
}

/// Deterministic heuristics over output shape and content.
#[derive(Debug, Default, Clone)]
pub struct HeuristicOutputScorer;

impl OutputScorer for HeuristicOutputScorer {
    fn score(
        &self,
        output: &Map<String, Value>,
        input: &Map<String, Value>,
        requirement: &str,
    ) -> Result<QualityScores, EvalError> {
        let task = task_completion_score(output);
        let consistency = consistency_score(output);
        let diversity = diversity_score(output);
        let usefulness = usefulness_score(output, input);

        Ok(QualityScores {
            task_completion: CriterionScore::new(
                task,
                format!(
                    "Output addresses {:.1}% of the original requirements",
                    task * 10.0
                ),
            ),
            content_consistency: CriterionScore::new(
                consistency,
                format!("Output shows {} internal consistency", level(consistency)),
            ),
            diversity: CriterionScore::new(
                diversity,
                format!("Output shows {} diversity and specificity", level(diversity)),
            ),
            usefulness: CriterionScore::new(
                usefulness,
                format!(
                    "Output is {} useful for the given input",
                    usefulness_level(usefulness)
                ),
            ),
            overall_score: (task + consistency + diversity + usefulness) / 4.0,
            evaluation_prompt: output_evaluation_prompt(output, input, requirement)?,
        })
    }
}

fn level(score: f64) -> &'static str {
    if score > 7.0 {
        "high"
    } else if score > 5.0 {
        "moderate"
    } else {
        "low"
    }
}

fn usefulness_level(score: f64) -> &'static str {
    if score > 7.0 {
        "highly"
    } else if score > 5.0 {
        "moderately"
    } else {
        "minimally"
    }
}

/// Plain-text form of a value: strings unquoted, everything else as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn task_completion_score(output: &Map<String, Value>) -> f64 {
    if output.is_empty() {
        3.0
    } else if output.contains_key("categories") && output.contains_key("sentiment_score") {
        8.5
    } else if output.len() >= 2 {
        7.0
    } else {
        5.5
    }
}

pub fn consistency_score(output: &Map<String, Value>) -> f64 {
    if output.is_empty() {
        return 6.0;
    }
    let valid = output
        .values()
        .filter(|v| !v.is_null() && !value_text(v).trim().is_empty())
        .count();
    6.0 + (valid as f64 / output.len() as f64) * 4.0
}

pub fn diversity_score(output: &Map<String, Value>) -> f64 {
    if output.is_empty() {
        return 5.0;
    }
    let specific = output
        .values()
        .filter(|v| {
            let text = value_text(v).to_lowercase();
            text.chars().count() > 10 && !GENERIC_MARKERS.iter().any(|m| text.contains(m))
        })
        .count();
    5.0 + (specific as f64 / output.len() as f64) * 5.0
}

pub fn usefulness_score(output: &Map<String, Value>, input: &Map<String, Value>) -> f64 {
    if input.contains_key("article_content") && ANALYSIS_KEYS.iter().any(|k| output.contains_key(*k))
    {
        8.0
    } else if !output.is_empty() {
        6.5
    } else {
        4.0
    }
}

fn output_evaluation_prompt(
    output: &Map<String, Value>,
    input: &Map<String, Value>,
    requirement: &str,
) -> Result<String, EvalError> {
    Ok(format!(
        r#"Please evaluate the following workflow output based on these criteria:

1. Task Completion (0-10): How well does the output fulfill the original requirements?
2. Content Consistency (0-10): How logically coherent and internally consistent is the output?
3. Diversity (0-10): How diverse and non-generic is the output?
4. Usefulness (0-10): How useful and effective is the output for the specific query?

Original Requirements: {}
Input Data: {}
Generated Output: {}

Provide scores (0-10) and brief explanations for each criterion."#,
        requirement,
        serde_json::to_string_pretty(input)?,
        serde_json::to_string_pretty(output)?,
    ))
}

/// Qualitative label for an overall 0-10 score.
pub fn quality_assessment(overall_score: f64) -> &'static str {
    if overall_score >= 8.0 {
        "Excellent"
    } else if overall_score >= 7.0 {
        "Good"
    } else if overall_score >= 6.0 {
        "Satisfactory"
    } else if overall_score >= 5.0 {
        "Below Average"
    } else {
        "Poor"
    }
}
