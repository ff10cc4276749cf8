//! Lightweight argument extraction from query text.
//!
//! The planner and the data-source agents both need a cheap way to lift
//! likely argument values out of a natural-language request when the model
//! does not bind them itself: uppercase identifier tokens, ISO dates, and
//! common status words. This is deliberately shallow — anything smarter is
//! the model's job.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// Identifier-looking tokens: all-caps alphanumerics of length >= 6,
    /// e.g. `INC0012345`, `ORDER_778`.
    static ref ID_TOKEN: Regex = Regex::new(r"\b[A-Z][A-Z0-9_]{5,}\b").expect("id regex");
    /// ISO-style dates: `2024-06-01`.
    static ref ISO_DATE: Regex = Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("date regex");
}

/// Status vocabulary a user is likely to filter by.
const STATUS_WORDS: &[&str] = &[
    "open", "closed", "active", "inactive", "pending", "resolved", "failed", "new",
];

/// Severity vocabulary, kept separate from status so both can bind.
const SEVERITY_WORDS: &[&str] = &["critical", "high", "medium", "low"];

/// Extract likely argument bindings from free text.
///
/// Recognized bindings:
/// - `id`: the first identifier-looking token (`[A-Z][A-Z0-9_]{5,}`);
///   additional ones land in `ids`.
/// - `date`: the first ISO date; a second one becomes `end_date`.
/// - `status`: the first status word present.
/// - `severity`: the first severity word present.
pub fn extract_parameter_hints(text: &str) -> Map<String, Value> {
    let mut hints = Map::new();

    let ids: Vec<&str> = ID_TOKEN.find_iter(text).map(|m| m.as_str()).collect();
    if let Some(first) = ids.first() {
        hints.insert("id".to_string(), Value::String((*first).to_string()));
    }
    if ids.len() > 1 {
        hints.insert(
            "ids".to_string(),
            Value::Array(ids.iter().map(|s| Value::String((*s).to_string())).collect()),
        );
    }

    let dates: Vec<&str> = ISO_DATE.find_iter(text).map(|m| m.as_str()).collect();
    if let Some(first) = dates.first() {
        hints.insert("date".to_string(), Value::String((*first).to_string()));
    }
    if let Some(second) = dates.get(1) {
        hints.insert("end_date".to_string(), Value::String((*second).to_string()));
    }

    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if let Some(status) = STATUS_WORDS.iter().find(|s| words.contains(*s)) {
        hints.insert("status".to_string(), Value::String((*status).to_string()));
    }
    if let Some(severity) = SEVERITY_WORDS.iter().find(|s| words.contains(*s)) {
        hints.insert(
            "severity".to_string(),
            Value::String((*severity).to_string()),
        );
    }

    hints
}

/// Whether the text contains an identifier-looking token. The planner uses
/// this to decide when steps over multiple sources should be chained.
pub fn contains_identifier(text: &str) -> bool {
    ID_TOKEN.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_status_and_severity() {
        let hints = extract_parameter_hints("show high severity open alerts");
        assert_eq!(hints["status"], json!("open"));
        assert_eq!(hints["severity"], json!("high"));
    }

    #[test]
    fn extracts_identifier_tokens() {
        let hints = extract_parameter_hints("what happened to INC0012345 and ORDER_778A?");
        assert_eq!(hints["id"], json!("INC0012345"));
        assert_eq!(
            hints["ids"],
            json!(["INC0012345", "ORDER_778A"])
        );
        assert!(contains_identifier("ticket INC0012345"));
    }

    #[test]
    fn short_uppercase_tokens_are_not_identifiers() {
        let hints = extract_parameter_hints("the API for HTTP calls");
        assert!(hints.get("id").is_none());
        assert!(!contains_identifier("plain words only"));
    }

    #[test]
    fn extracts_date_range() {
        let hints = extract_parameter_hints("between 2024-06-01 and 2024-06-30");
        assert_eq!(hints["date"], json!("2024-06-01"));
        assert_eq!(hints["end_date"], json!("2024-06-30"));
    }

    #[test]
    fn empty_text_yields_no_hints() {
        assert!(extract_parameter_hints("").is_empty());
    }
}
