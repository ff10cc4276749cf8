//! The REST agent.
//!
//! Executes steps against tools of the `REST_API` class. Retries are the
//! tool's concern — REST drivers already carry their own retry and backoff
//! policies — so this agent invokes exactly once and surfaces every
//! HTTP-class failure (auth, missing entity, bad request, upstream fault)
//! uniformly as an upstream error.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::{ErrorKind, ToolError};
use crate::queryflow::plan::{AgentType, Step};
use crate::queryflow::state::{AgentResult, AgentState};
use async_trait::async_trait;

use super::{AgentCore, DataSourceAgent, StepOutcome};

pub struct RestAgent {
    core: AgentCore,
}

impl RestAgent {
    pub(crate) fn new(core: AgentCore) -> Self {
        Self { core }
    }

    /// HTTP-class failures collapse to `UPSTREAM_ERROR`; only timeouts keep
    /// their own kind.
    fn classify(error: &ToolError) -> ErrorKind {
        match error {
            ToolError::Timeout => ErrorKind::Timeout,
            ToolError::Unauthorized(_)
            | ToolError::NotFound(_)
            | ToolError::BadRequest(_)
            | ToolError::UpstreamError(_)
            | ToolError::SchemaMismatch(_) => ErrorKind::UpstreamError,
        }
    }
}

#[async_trait]
impl DataSourceAgent for RestAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Rest
    }

    async fn execute(&self, step: &Step, state: &AgentState, cancel: &CancelToken) -> AgentResult {
        let outcome = self
            .core
            .run_step(
                self.agent_type().data_source_class(),
                step,
                state,
                cancel,
                0,
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
                Self::classify(&error),
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
