//! The relational-database agent.
//!
//! Executes steps against tools of the `RELATIONAL_DB` class. Ad-hoc query
//! tools sometimes reject an argument set the planner guessed at; when a
//! tool reports a schema mismatch this agent retries at most twice with
//! progressively smaller argument sets before giving up. Rows are emitted
//! in the order the tool returns them.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::ErrorKind;
use crate::queryflow::plan::{AgentType, Step};
use crate::queryflow::state::{AgentResult, AgentState};
use async_trait::async_trait;

use super::{AgentCore, DataSourceAgent, StepOutcome};

/// Retry budget for schema-mismatch refinement.
const SCHEMA_RETRIES: usize = 2;

pub struct SqlAgent {
    core: AgentCore,
}

impl SqlAgent {
    pub(crate) fn new(core: AgentCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl DataSourceAgent for SqlAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Sql
    }

    async fn execute(&self, step: &Step, state: &AgentState, cancel: &CancelToken) -> AgentResult {
        let outcome = self
            .core
            .run_step(
                self.agent_type().data_source_class(),
                step,
                state,
                cancel,
                SCHEMA_RETRIES,
            )
            .await;

        match outcome {
            StepOutcome::Success {
                tool_name,
                result,
                latency_ms,
            } => AgentResult::success(
                step.step_number,
                self.agent_type(),
                tool_name,
                result.rows,
                latency_ms,
            ),
            StepOutcome::NoCandidates => AgentResult::failure(
                step.step_number,
                self.agent_type(),
                "",
                ErrorKind::ToolNotFound,
                0,
            ),
            StepOutcome::ToolFailed {
                tool_name,
                error,
                latency_ms,
            } => AgentResult::failure(
                step.step_number,
                self.agent_type(),
                tool_name,
                error.kind(),
                latency_ms,
            ),
            StepOutcome::Cancelled => AgentResult::failure(
                step.step_number,
                self.agent_type(),
                "",
                ErrorKind::Cancelled,
                0,
            ),
        }
    }
}
