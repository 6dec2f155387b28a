//! Test item model and loading from a directory of JSON files.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::EvalError;

/// A declared workflow input or output parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_param_type() -> String {
    "string".to_string()
}

fn default_required() -> bool {
    true
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: String::new(),
            required: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One unit of work for layer 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestItem {
    #[serde(default)]
    pub test_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub workflow_name: String,
    #[serde(default)]
    pub workflow_requirement: String,
    #[serde(default)]
    pub workflow_inputs: Vec<ParameterSpec>,
    #[serde(default)]
    pub workflow_outputs: Vec<ParameterSpec>,
    #[serde(default)]
    pub source_file: String,
}

impl TestItem {
    /// Builds an item with `test_id` and `workflow_id` both set to `id`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, requirement: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            test_id: id.clone(),
            workflow_id: Some(id),
            workflow_name: name.into(),
            workflow_requirement: requirement.into(),
            workflow_inputs: Vec::new(),
            workflow_outputs: Vec::new(),
            source_file: String::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<ParameterSpec>) -> Self {
        self.workflow_inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<ParameterSpec>) -> Self {
        self.workflow_outputs = outputs;
        self
    }
}

/// Derives a test id: `workflow_id` when present, else a SHA-256 of the content.
///
/// The content hash is taken over a compact rendering with object keys sorted.
pub fn derive_test_id(raw: &Value) -> String {
    match raw.get("workflow_id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Null) | None => {
            // serde_json's map is ordered by key, so the compact form is canonical
            hex::encode(Sha256::digest(raw.to_string().as_bytes()))
        }
        Some(other) => other.to_string(),
    }
}

fn parse_item(mut raw: Value, source_file: &str) -> Result<TestItem, EvalError> {
    let object = raw
        .as_object_mut()
        .ok_or_else(|| EvalError::TypeMismatch("test data must be a JSON object".to_string()))?;
    object.insert("source_file".to_string(), Value::String(source_file.to_string()));

    let test_id = derive_test_id(&raw);
    if let Some(Value::Number(n)) = raw.get("workflow_id") {
        // keep numeric ids usable as strings
        let n = n.to_string();
        if let Some(object) = raw.as_object_mut() {
            object.insert("workflow_id".to_string(), Value::String(n));
        }
    }

    let mut item: TestItem = serde_json::from_value(raw)?;
    item.test_id = test_id;
    Ok(item)
}

/// Loads every `*.json` file directly inside `dir`, in file-name order.
///
/// Files that fail to parse are logged and skipped. Items with a duplicate
/// `test_id` are skipped so the id stays a unique join key.
pub fn load_test_data(dir: &Path) -> Result<Vec<TestItem>, EvalError> {
    if !dir.is_dir() {
        return Err(EvalError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Test data directory not found: {}", dir.display()),
        )));
    }

    let mut items = Vec::new();
    let mut seen = HashSet::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();

        let parsed = std::fs::read_to_string(path)
            .map_err(EvalError::from)
            .and_then(|content| Ok(serde_json::from_str::<Value>(&content)?))
            .and_then(|raw| parse_item(raw, &file_name));

        match parsed {
            Ok(item) => {
                if !seen.insert(item.test_id.clone()) {
                    warn!(file = %file_name, test_id = %item.test_id, "Skipping duplicate test id");
                    continue;
                }
                items.push(item);
            }
            Err(e) => warn!(file = %file_name, error = %e, "Failed to load test data file"),
        }
    }

    info!(count = items.len(), dir = %dir.display(), "Loaded test data");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_derive_test_id_prefers_workflow_id() {
        assert_eq!(derive_test_id(&json!({"workflow_id": "wf-7"})), "wf-7");
        assert_eq!(derive_test_id(&json!({"workflow_id": 12})), "12");
    }

    #[test]
    fn test_derive_test_id_hash_is_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": "x"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": "x", "b": 1}"#).unwrap();
        let id = derive_test_id(&a);
        assert_eq!(id, derive_test_id(&b));
        assert_eq!(id.len(), 64);
        assert_ne!(id, derive_test_id(&json!({"a": "y", "b": 1})));
        assert_eq!(id, hex::encode(Sha256::digest(br#"{"a":"x","b":1}"#)));
    }

    #[test]
    fn test_parameter_spec_defaults() {
        let spec: ParameterSpec = serde_json::from_str(r#"{"name": "topic"}"#).unwrap();
        assert_eq!(spec.param_type, "string");
        assert!(spec.required);
        assert!(spec.description.is_empty());
    }

    #[test]
    fn test_load_missing_dir_errors() {
        let dir = TempDir::new().unwrap();
        assert!(load_test_data(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            json!({
                "workflow_id": "wf-b",
                "workflow_name": "content_analysis",
                "workflow_requirement": "Analyze articles",
                "workflow_inputs": [{"name": "article_content", "type": "string", "description": "text", "required": true}],
                "workflow_outputs": [{"name": "summary", "type": "string"}]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            json!({"workflow_name": "no_id", "workflow_requirement": "Do things"}).to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{oops").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("list.json"), "[1, 2]").unwrap();

        let items = load_test_data(dir.path()).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].source_file, "a.json");
        assert_eq!(items[0].test_id.len(), 64);
        assert!(items[0].workflow_id.is_none());

        assert_eq!(items[1].source_file, "b.json");
        assert_eq!(items[1].test_id, "wf-b");
        assert_eq!(items[1].workflow_inputs[0].name, "article_content");
        assert_eq!(items[1].workflow_outputs[0].param_type, "string");
    }

    #[test]
    fn test_load_skips_duplicate_ids() {
        let dir = TempDir::new().unwrap();
        for name in ["one.json", "two.json"] {
            std::fs::write(dir.path().join(name), json!({"workflow_id": "same"}).to_string()).unwrap();
        }
        let items = load_test_data(dir.path()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_file, "one.json");
    }
}
