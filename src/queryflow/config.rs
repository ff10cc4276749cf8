//! Configuration for QueryFlow.
//!
//! Provides the [`QueryFlowConfig`] struct holding every tunable the engine
//! recognizes. Users construct it manually — no file parsing dependencies
//! are required; an application bootstrapper that reads TOML/YAML can map
//! its values onto this struct.
//!
//! # Example
//!
//! ```rust
//! use queryflow::QueryFlowConfig;
//! use std::time::Duration;
//!
//! // Defaults suit most deployments.
//! let config = QueryFlowConfig::default();
//! assert_eq!(config.node_timeout, Duration::from_secs(60));
//!
//! // Or tighten a single knob.
//! let config = QueryFlowConfig {
//!     node_timeout: Duration::from_secs(10),
//!     ..QueryFlowConfig::default()
//! };
//! ```

use std::time::Duration;

/// What the workflow driver does when routing produces a node it has no
/// implementation for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownNodePolicy {
    /// Log a warning and terminate the run cleanly (default).
    End,
    /// Record an internal error on the run before terminating.
    Error,
}

/// Global configuration for a QueryFlow deployment.
///
/// One instance is shared by the workflow driver, the consolidator, and the
/// session transport. All fields are plain values so the struct is cheap to
/// clone per run.
#[derive(Debug, Clone)]
pub struct QueryFlowConfig {
    /// Maximum wall-clock time a single node execution may take before it is
    /// converted into a failed result.
    pub node_timeout: Duration,

    /// Maximum wall-clock time for a whole workflow run. When it fires the
    /// run is routed to the consolidator with whatever results exist.
    pub overall_deadline: Duration,

    /// Maximum number of supervisor visits in a single run. Exceeding it
    /// routes to the consolidator with an incomplete-run error instead of
    /// looping forever.
    pub max_iterations: usize,

    /// Above this many merged rows the consolidator skips the LLM and uses
    /// its deterministic formatter.
    pub llm_row_cap: usize,

    /// Behavior when routing yields a node the driver cannot dispatch.
    pub unknown_node_policy: UnknownNodePolicy,

    /// Outbound keepalive: a ping frame is emitted after this much idle time
    /// on a connection.
    pub idle_ping_interval: Duration,

    /// Inbound frames larger than this many bytes are rejected with an
    /// error frame.
    pub max_frame_bytes: usize,
}

impl Default for QueryFlowConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(60),
            overall_deadline: Duration::from_secs(300),
            max_iterations: 10,
            llm_row_cap: 500,
            unknown_node_policy: UnknownNodePolicy::End,
            idle_ping_interval: Duration::from_secs(30),
            max_frame_bytes: 1024 * 1024,
        }
    }
}
