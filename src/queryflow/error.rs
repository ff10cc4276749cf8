//! Error taxonomy shared across the workflow engine.
//!
//! Node-level failures never abort a run: agents convert them into failed
//! [`AgentResult`](crate::queryflow::state::AgentResult)s carrying an
//! [`ErrorKind`], the router advances, and the consolidator folds a
//! partial-failure note into the final answer. The concrete error enums in
//! this module ([`RegistryError`], [`PlannerError`], [`GatewayError`],
//! [`ToolError`]) are returned by the components that can fail, and each
//! maps onto a kind via its `kind()` accessor so raw backend messages never
//! reach the user verbatim.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Coarse classification of anything that can go wrong during a run.
///
/// This is the only error vocabulary that crosses the workflow boundary:
/// it is recorded in run state, attached to failed agent results, and used
/// by the consolidator when redacting failures for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed inputs (bad arguments, unparseable parameters).
    ValidationError,
    /// The planner produced an empty or structurally invalid plan.
    PlanError,
    /// A step's dependency is absent or failed.
    DependencyUnmet,
    /// No candidate tools exist for the required data-source class.
    ToolNotFound,
    /// A tool reported a recoverable upstream failure.
    UpstreamError,
    /// A single node exceeded its timeout.
    Timeout,
    /// The whole run exceeded its deadline.
    DeadlineExceeded,
    /// The caller cancelled the run.
    Cancelled,
    /// A bug or panic inside a node.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::PlanError => "PLAN_ERROR",
            ErrorKind::DependencyUnmet => "DEPENDENCY_UNMET",
            ErrorKind::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorKind::UpstreamError => "UPSTREAM_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        };
        write!(f, "{}", name)
    }
}

/// Errors raised by the tool registry.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// A descriptor with this name is already registered.
    DuplicateName(String),
    /// No descriptor with this name exists.
    UnknownName(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateName(name) => write!(f, "Duplicate tool name: {}", name),
            RegistryError::UnknownName(name) => write!(f, "Unknown tool name: {}", name),
        }
    }
}

impl Error for RegistryError {}

/// Errors raised by the execution planner.
///
/// `LlmUnavailable` and `ParseFailed` are recovered internally through the
/// heuristic analysis path; only `EmptyCatalogue` surfaces to the caller.
#[derive(Debug, Clone)]
pub enum PlannerError {
    /// The completion gateway could not be reached.
    LlmUnavailable(String),
    /// The analysis response could not be parsed as the expected JSON.
    ParseFailed(String),
    /// The registry holds no tools, so no plan can be produced.
    EmptyCatalogue,
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::LlmUnavailable(msg) => write!(f, "LLM unavailable: {}", msg),
            PlannerError::ParseFailed(msg) => write!(f, "Analysis parse failed: {}", msg),
            PlannerError::EmptyCatalogue => write!(f, "Tool catalogue is empty"),
        }
    }
}

impl Error for PlannerError {}

/// Errors raised by the LLM gateway.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// The provider (or every provider in the failover list) was
    /// unreachable or returned a transport-level failure.
    Unavailable(String),
    /// The caller's cancellation token fired mid-call.
    Cancelled,
    /// The provider answered with a payload that is not JSON at all.
    InvalidResponse(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Unavailable(msg) => write!(f, "Completion provider unavailable: {}", msg),
            GatewayError::Cancelled => write!(f, "Completion call cancelled"),
            GatewayError::InvalidResponse(msg) => write!(f, "Invalid provider response: {}", msg),
        }
    }
}

impl Error for GatewayError {}

/// Failure modes a tool implementation may report from `invoke`.
///
/// This is the entire error contract between the engine and backend
/// drivers; anything richer must be folded into the message strings.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Credentials were missing or rejected by the backend.
    Unauthorized(String),
    /// The addressed entity does not exist.
    NotFound(String),
    /// The backend rejected the bound arguments.
    BadRequest(String),
    /// The backend failed in a way that may succeed on retry.
    UpstreamError(String),
    /// The backend did not answer in time.
    Timeout,
    /// The arguments did not match the tool's result or parameter schema.
    SchemaMismatch(String),
}

impl ToolError {
    /// Fold this tool-boundary error into the workflow's kind taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::Unauthorized(_) => ErrorKind::UpstreamError,
            ToolError::NotFound(_) => ErrorKind::UpstreamError,
            ToolError::BadRequest(_) => ErrorKind::ValidationError,
            ToolError::UpstreamError(_) => ErrorKind::UpstreamError,
            ToolError::Timeout => ErrorKind::Timeout,
            ToolError::SchemaMismatch(_) => ErrorKind::ValidationError,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ToolError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ToolError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ToolError::UpstreamError(msg) => write!(f, "Upstream error: {}", msg),
            ToolError::Timeout => write!(f, "Tool timed out"),
            ToolError::SchemaMismatch(msg) => write!(f, "Schema mismatch: {}", msg),
        }
    }
}

impl Error for ToolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_matches_wire_names() {
        assert_eq!(ErrorKind::DependencyUnmet.to_string(), "DEPENDENCY_UNMET");
        assert_eq!(ErrorKind::UpstreamError.to_string(), "UPSTREAM_ERROR");
        assert_eq!(ErrorKind::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn tool_errors_fold_into_kinds() {
        assert_eq!(
            ToolError::Unauthorized("key".into()).kind(),
            ErrorKind::UpstreamError
        );
        assert_eq!(
            ToolError::BadRequest("arg".into()).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(ToolError::Timeout.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn kind_serde_round_trip() {
        let json = serde_json::to_string(&ErrorKind::ToolNotFound).unwrap();
        assert_eq!(json, "\"TOOL_NOT_FOUND\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorKind::ToolNotFound);
    }
}
