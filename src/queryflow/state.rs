//! Per-run workflow state and its typed mutation helpers.
//!
//! One [`AgentState`] exists per run (one user message). Nodes never poke
//! at fields directly — every mutation goes through a helper that preserves
//! the run invariants:
//!
//! - result sequences grow only by append,
//! - the step cursor is monotone non-decreasing,
//! - a completed step appears exactly once in the result sequence of its
//!   agent family,
//! - the final response is set exactly once, by the consolidator.
//!
//! All mutation happens on the single task driving the run; workers receive
//! immutable snapshots, which is what makes the helpers safe without locks.

use crate::queryflow::error::ErrorKind;
use crate::queryflow::plan::{AgentType, Plan, Step, StepStatus};
use crate::queryflow::tool::Row;
use serde_json::Value;
use std::collections::HashMap;

/// Where the router sends control after the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHop {
    /// Dispatch to the named agent family.
    Agent(AgentType),
    /// All steps are done; consolidate.
    Consolidate,
    /// Terminate without consolidation.
    End,
}

/// Outcome of one step execution by one agent.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Which step produced this result.
    pub step_number: usize,
    /// The agent family that executed it.
    pub agent_type: AgentType,
    /// The tool that was invoked (empty when no tool was selected).
    pub tool_name: String,
    /// Whether the invocation succeeded.
    pub ok: bool,
    /// Normalized result rows; empty on failure.
    pub rows: Vec<Row>,
    /// Failure classification when `ok` is false.
    pub error: Option<ErrorKind>,
    /// Wall-clock duration of the tool invocation.
    pub latency_ms: u64,
}

impl AgentResult {
    /// A successful result carrying rows.
    pub fn success(
        step_number: usize,
        agent_type: AgentType,
        tool_name: impl Into<String>,
        rows: Vec<Row>,
        latency_ms: u64,
    ) -> Self {
        Self {
            step_number,
            agent_type,
            tool_name: tool_name.into(),
            ok: true,
            rows,
            error: None,
            latency_ms,
        }
    }

    /// A failed result carrying a kind instead of rows.
    pub fn failure(
        step_number: usize,
        agent_type: AgentType,
        tool_name: impl Into<String>,
        error: ErrorKind,
        latency_ms: u64,
    ) -> Self {
        Self {
            step_number,
            agent_type,
            tool_name: tool_name.into(),
            ok: false,
            rows: Vec::new(),
            error: Some(error),
            latency_ms,
        }
    }
}

/// One recorded run error: which step, what kind, and a short description.
#[derive(Debug, Clone)]
pub struct StepError {
    pub step_number: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// The accumulating state of one workflow run.
#[derive(Debug)]
pub struct AgentState {
    /// The user's query, verbatim.
    pub query: String,
    /// Opaque caller-supplied context (session context plus any per-message
    /// overrides).
    pub context: HashMap<String, Value>,
    /// The plan, once the supervisor has asked the planner for it.
    pub plan: Option<Plan>,
    /// Index into `plan.steps` of the next step to consider.
    pub current_step_index: usize,
    /// Results from SQL-family agents, append-only.
    pub sql_results: Vec<AgentResult>,
    /// Results from REST-family agents, append-only.
    pub rest_results: Vec<AgentResult>,
    /// Results from SOAP-family agents, append-only.
    pub soap_results: Vec<AgentResult>,
    /// Routing hint set by the supervisor.
    pub next_agent: Option<NextHop>,
    /// Cleared when the run must stop before its plan is exhausted.
    pub should_continue: bool,
    /// The consolidated answer; set exactly once by the consolidator.
    pub final_response: Option<String>,
    /// Errors recorded during the run, in occurrence order.
    pub errors: Vec<StepError>,
}

impl AgentState {
    /// Fresh state for one incoming message.
    pub fn new(query: impl Into<String>, context: HashMap<String, Value>) -> Self {
        Self {
            query: query.into(),
            context,
            plan: None,
            current_step_index: 0,
            sql_results: Vec::new(),
            rest_results: Vec::new(),
            soap_results: Vec::new(),
            next_agent: None,
            should_continue: true,
            final_response: None,
            errors: Vec::new(),
        }
    }

    /// Install the plan. Only meaningful before any step has run.
    pub fn set_plan(&mut self, plan: Plan) {
        log::info!(
            "plan {} installed: {} steps, consolidation={}",
            plan.plan_id,
            plan.steps.len(),
            plan.requires_consolidation
        );
        self.plan = Some(plan);
    }

    /// The step the cursor currently points at, if any.
    pub fn current_step(&self) -> Option<&Step> {
        self.plan
            .as_ref()
            .and_then(|plan| plan.steps.get(self.current_step_index))
    }

    /// Move the cursor forward by one step. Never moves backwards.
    pub fn advance(&mut self) {
        self.current_step_index += 1;
    }

    /// Whether steps remain beyond the cursor.
    pub fn steps_remaining(&self) -> bool {
        match &self.plan {
            Some(plan) => self.current_step_index < plan.steps.len(),
            None => false,
        }
    }

    /// Append a result to the sequence of its agent family and mark the
    /// corresponding step done or failed.
    pub fn append_result(&mut self, result: AgentResult) {
        if let Some(plan) = self.plan.as_mut() {
            if let Some(step) = plan
                .steps
                .iter_mut()
                .find(|s| s.step_number == result.step_number)
            {
                step.status = if result.ok {
                    StepStatus::Done
                } else {
                    StepStatus::Failed
                };
            }
        }
        match result.agent_type {
            AgentType::Sql => self.sql_results.push(result),
            AgentType::Rest => self.rest_results.push(result),
            AgentType::Soap => self.soap_results.push(result),
        }
    }

    /// Record the final answer. Later calls are ignored so the first
    /// consolidation wins.
    pub fn set_final(&mut self, text: impl Into<String>) {
        if self.final_response.is_none() {
            self.final_response = Some(text.into());
        }
    }

    /// Record a run error.
    pub fn record_error(&mut self, step_number: usize, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        log::warn!("step {} error {}: {}", step_number, kind, message);
        self.errors.push(StepError {
            step_number,
            kind,
            message,
        });
    }

    /// Whether the given step has a successful result in any sequence.
    pub fn step_succeeded(&self, step_number: usize) -> bool {
        self.all_results()
            .any(|r| r.step_number == step_number && r.ok)
    }

    /// All results across the three sequences, SQL first, then REST, then
    /// SOAP. Within a sequence, append order is preserved.
    pub fn all_results(&self) -> impl Iterator<Item = &AgentResult> {
        self.sql_results
            .iter()
            .chain(self.rest_results.iter())
            .chain(self.soap_results.iter())
    }

    /// Total number of results recorded so far.
    pub fn result_count(&self) -> usize {
        self.sql_results.len() + self.rest_results.len() + self.soap_results.len()
    }

    /// Mark every step at or beyond the cursor as skipped. Used when the
    /// run is cut short by a deadline or iteration cap.
    pub fn skip_remaining_steps(&mut self) {
        let index = self.current_step_index;
        if let Some(plan) = self.plan.as_mut() {
            for step in plan.steps.iter_mut().skip(index) {
                if step.status == StepStatus::Pending || step.status == StepStatus::InFlight {
                    step.status = StepStatus::Skipped;
                }
            }
        }
    }
}
