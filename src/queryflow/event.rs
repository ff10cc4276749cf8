//! Workflow observability events.
//!
//! The driver narrates each run as a sequence of [`WorkflowEvent`]s. Two
//! consumers exist: an optional [`EventHandler`] registered on the driver
//! (logging, metrics), and the session layer, which receives the same
//! events over a bounded channel and turns them into progress frames for
//! the client. Because the channel is bounded, a slow client applies
//! backpressure all the way into node execution — the driver will not start
//! the next node until the previous node's events have been accepted.
//!
//! # Event flow for a two-step run
//!
//! ```text
//! RunStarted
//!   └─ NodeStarted { SUPERVISOR }
//!   └─ PlanCreated { 2 steps }
//!   └─ NodeCompleted { SUPERVISOR }
//!   └─ NodeStarted { REST_AGENT }
//!   └─ StepCompleted { step 1, ok: true }
//!   └─ NodeCompleted { REST_AGENT }
//!   └─ ... supervisor / second agent ...
//!   └─ NodeStarted { CONSOLIDATOR }
//!   └─ NodeCompleted { CONSOLIDATOR }
//! RunCompleted { ok: true }
//! ```

use crate::queryflow::error::ErrorKind;
use crate::queryflow::plan::AgentType;
use crate::queryflow::router::NodeName;
use async_trait::async_trait;

/// Summary of how one node execution changed the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDelta {
    /// Results appended during the node.
    pub results_appended: usize,
    /// The step cursor after the node.
    pub step_index: usize,
    /// Errors recorded during the node.
    pub errors_recorded: usize,
    /// Whether the final response was produced by this node.
    pub final_set: bool,
}

/// Events emitted by the workflow driver over the lifetime of one run.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// The run has started; emitted before the first node.
    RunStarted {
        run_id: String,
        /// First characters of the query, for logging.
        query_preview: String,
    },

    /// The planner produced a plan (first supervisor visit only).
    PlanCreated {
        run_id: String,
        plan_id: String,
        steps: usize,
        requires_consolidation: bool,
    },

    /// A node is about to execute.
    NodeStarted { run_id: String, node: NodeName },

    /// A node finished executing (successfully or not).
    NodeCompleted {
        run_id: String,
        node: NodeName,
        state_update: StateDelta,
    },

    /// A step produced a result.
    StepCompleted {
        run_id: String,
        step_number: usize,
        agent_type: AgentType,
        tool_name: String,
        ok: bool,
        latency_ms: u64,
    },

    /// A step failed with the given kind.
    StepFailed {
        run_id: String,
        step_number: usize,
        kind: ErrorKind,
        message: String,
    },

    /// The run is over. `ok` means a final response exists.
    RunCompleted { run_id: String, ok: bool },
}

impl WorkflowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::PlanCreated { run_id, .. }
            | WorkflowEvent::NodeStarted { run_id, .. }
            | WorkflowEvent::NodeCompleted { run_id, .. }
            | WorkflowEvent::StepCompleted { run_id, .. }
            | WorkflowEvent::StepFailed { run_id, .. }
            | WorkflowEvent::RunCompleted { run_id, .. } => run_id,
        }
    }
}

/// Callback-based observer for workflow events.
///
/// The default implementation is a no-op, so handlers only override what
/// they care about. Handlers are shared across concurrent runs via
/// `Arc<dyn EventHandler>` and must synchronize their own state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called for every event the driver emits.
    async fn on_workflow_event(&self, _event: &WorkflowEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_accessor_covers_all_variants() {
        let events = vec![
            WorkflowEvent::RunStarted {
                run_id: "r1".into(),
                query_preview: "q".into(),
            },
            WorkflowEvent::RunCompleted {
                run_id: "r1".into(),
                ok: true,
            },
        ];
        for event in &events {
            assert_eq!(event.run_id(), "r1");
        }
    }
}
