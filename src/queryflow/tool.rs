//! The tool boundary: the one capability the engine consumes from backends.
//!
//! The engine never speaks SQL, HTTP, or SOAP itself. Every backend
//! capability is handed to the registry as a [`Tool`] — an opaque object
//! with a single `invoke` operation — plus a typed descriptor
//! ([`ToolDescriptor`](crate::queryflow::registry::ToolDescriptor)) that
//! tells the planner and agents what the tool can do. Agents never
//! introspect concrete tool types.
//!
//! # Implementing a tool
//!
//! ```rust
//! use async_trait::async_trait;
//! use queryflow::queryflow::cancel::CancelToken;
//! use queryflow::queryflow::error::ToolError;
//! use queryflow::{Tool, ToolResult};
//! use serde_json::{json, Value};
//!
//! struct OpenAlerts;
//!
//! #[async_trait]
//! impl Tool for OpenAlerts {
//!     async fn invoke(
//!         &self,
//!         _arguments: Value,
//!         _cancel: &CancelToken,
//!     ) -> Result<ToolResult, ToolError> {
//!         Ok(ToolResult::from_raw(
//!             "list_alerts",
//!             json!([{ "alert_id": "A1", "status": "open" }]),
//!         ))
//!     }
//! }
//! ```

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::ToolError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A single record returned by a tool: string keys to JSON values.
pub type Row = Map<String, Value>;

/// The normalized result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Structured records, possibly empty. Row order follows whatever the
    /// backend returned; key order within a row carries no meaning.
    pub rows: Vec<Row>,
    /// The backend's raw payload, retained for the consolidator when the
    /// structure is unknown.
    pub raw: Value,
    /// Which tool produced this result. Set to the tool's registry name by
    /// the invoking agent.
    pub source_tag: String,
}

impl ToolResult {
    /// Build a result directly from rows.
    pub fn from_rows(source_tag: impl Into<String>, rows: Vec<Row>) -> Self {
        let raw = Value::Array(rows.iter().cloned().map(Value::Object).collect());
        Self {
            rows,
            raw,
            source_tag: source_tag.into(),
        }
    }

    /// Build a result from a raw payload, deriving `rows` where the shape
    /// allows it: an array of objects becomes one row per element, a single
    /// object becomes a single row, anything else leaves `rows` empty.
    pub fn from_raw(source_tag: impl Into<String>, raw: Value) -> Self {
        let rows = rows_from_value(&raw);
        Self {
            rows,
            raw,
            source_tag: source_tag.into(),
        }
    }
}

/// Derive structured rows from an arbitrary JSON payload.
pub(crate) fn rows_from_value(value: &Value) -> Vec<Row> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        Value::Object(map) => vec![map.clone()],
        _ => Vec::new(),
    }
}

/// An invokable backend capability.
///
/// Implementations own their wire protocol, connection pooling, and
/// retries; the engine only promises to pass a bound argument map and a
/// live cancellation token. On cancel, implementations should return
/// promptly — the engine treats a cancelled invocation as failed.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Execute the tool with the given bound arguments.
    async fn invoke(&self, arguments: Value, cancel: &CancelToken)
        -> Result<ToolResult, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_array_of_objects_becomes_rows() {
        let result = ToolResult::from_raw(
            "list_alerts",
            json!([{ "alert_id": "A1" }, { "alert_id": "A2" }]),
        );
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0]["alert_id"], json!("A1"));
        assert_eq!(result.source_tag, "list_alerts");
    }

    #[test]
    fn raw_object_becomes_single_row() {
        let result = ToolResult::from_raw("get_user", json!({ "user_id": "U7" }));
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn scalar_raw_leaves_rows_empty_but_is_retained() {
        let result = ToolResult::from_raw("count", json!(42));
        assert!(result.rows.is_empty());
        assert_eq!(result.raw, json!(42));
    }

    #[test]
    fn mixed_array_keeps_only_records() {
        let result = ToolResult::from_raw("mixed", json!([{ "a": 1 }, "text", 3]));
        assert_eq!(result.rows.len(), 1);
    }
}
