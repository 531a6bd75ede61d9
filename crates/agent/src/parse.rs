//! Parsing of model replies.
//!
//! Every parser here is total: malformed replies degrade to an empty list,
//! `None`, or "no" rather than an error. Callers log the degradation.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parse a bracketed list such as `['a', 'b', "c"]` into its items.
/// Returns an empty list when no list can be found.
pub fn parse_subgoal_list(text: &str) -> Vec<String> {
    let Some(body) = Regex::new(r"(?s)\[(.*)\]")
        .ok()
        .and_then(|re| re.captures(text).and_then(|c| c.get(1)))
        .map(|m| m.as_str())
    else {
        return Vec::new();
    };

    if let Ok(items) = serde_json::from_str::<Vec<String>>(&format!("[{body}]")) {
        return clean(items);
    }

    let quoted = Regex::new(r#"'([^']*)'|"([^"]*)""#)
        .map(|re| {
            re.captures_iter(body)
                .filter_map(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if !quoted.is_empty() {
        return clean(quoted);
    }

    // Bare comma-separated items
    clean(body.split(',').map(str::to_string).collect())
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read a one-subgoal reply: the first non-empty line, unquoted and
/// lowercased, with any `Subgoal:` style prefix dropped.
pub fn parse_single_subgoal(text: &str) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
    let line = match line.split_once(':') {
        Some((prefix, rest)) if prefix.to_lowercase().contains("subgoal") => rest,
        _ => line,
    };
    line.trim()
        .trim_matches(|c: char| matches!(c, '\'' | '"' | '.' | '`'))
        .trim()
        .to_lowercase()
}

/// Read a yes/no verdict from the first `yes` or `no` word in the reply.
pub fn parse_yes_no(text: &str) -> Option<bool> {
    let re = Regex::new(r"(?i)\b(yes|no)\b").ok()?;
    let word = re.captures(text)?.get(1)?.as_str().to_ascii_lowercase();
    Some(word == "yes")
}

/// Read a list of yes/no verdicts. Items that are neither count as no.
pub fn parse_yes_no_list(text: &str) -> Vec<bool> {
    parse_subgoal_list(text)
        .iter()
        .map(|item| parse_yes_no(item).unwrap_or(false))
        .collect()
}

/// Pull a JSON object out of a reply: the whole text if it parses,
/// otherwise the outermost `{...}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }
    let re = Regex::new(r"(?s)\{.*\}").ok()?;
    let span = re.find(text)?;
    serde_json::from_str(span.as_str()).ok()
}

/// Communicative intent of a structured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Propose,
    Inform,
    Request,
    Agree,
    Reject,
}

/// A conversation turn in the structured protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredMessage {
    pub intent: Intent,
    #[serde(default)]
    pub target_object: Option<String>,
    #[serde(default)]
    pub target_coordinate: Option<Vec<i64>>,
    #[serde(default)]
    pub action_plan: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Parse a structured conversation reply. `None` when the reply holds no
/// JSON object or the object does not fit the schema.
pub fn parse_structured_message(text: &str) -> Option<StructuredMessage> {
    let value = extract_json(text)?;
    serde_json::from_value(value).ok()
}
