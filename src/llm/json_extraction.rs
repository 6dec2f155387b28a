//! JSON extraction from free-form LLM responses.
//!
//! Responses may wrap the payload in markdown code fences or surround it with
//! prose. Extraction tries, in order: the whole trimmed content, a fenced code
//! block, then the first balanced `{...}` object.

use std::sync::OnceLock;

use regex::Regex;

fn code_block_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").ok())
        .as_ref()
}

/// Returns the first JSON object found in `content`, if any.
pub fn extract_json_object(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    if let Some(re) = code_block_regex() {
        for caps in re.captures_iter(content) {
            if let Some(block) = caps.get(1) {
                let block = block.as_str().trim();
                if block.starts_with('{') {
                    return Some(block.to_string());
                }
            }
        }
    }

    find_balanced_object(content)
}

/// Bracket matching that skips braces inside string literals.
fn find_balanced_object(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }

    None
}
