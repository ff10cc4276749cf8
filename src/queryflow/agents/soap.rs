//! The SOAP agent.
//!
//! Executes steps against tools of the `SOAP_API` class. A SOAP tool's
//! registry name already encodes the operation it performs, so this agent
//! never rewrites or synthesizes operation names — the shared pipeline only
//! ever invokes a tool that exists in the candidate set, and anything the
//! model invents is discarded there.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::ErrorKind;
use crate::queryflow::plan::{AgentType, Step};
use crate::queryflow::state::{AgentResult, AgentState};
use async_trait::async_trait;

use super::{AgentCore, DataSourceAgent, StepOutcome};

pub struct SoapAgent {
    core: AgentCore,
}

impl SoapAgent {
    pub(crate) fn new(core: AgentCore) -> Self {
        Self { core }
    }
}

#[async_trait]
impl DataSourceAgent for SoapAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Soap
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
