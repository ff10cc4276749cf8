//! The supervisor node: plan lazily, verify dependencies, set the route.
//!
//! The supervisor runs between every agent execution. On its first visit it
//! asks the planner for a plan; on every visit it walks the step cursor
//! forward past steps whose dependencies cannot be met, then points the
//! router at the agent for the first dispatchable step. When the cursor
//! runs off the end of the plan it hands control to the consolidator.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::{ErrorKind, PlannerError};
use crate::queryflow::plan::{Plan, StepStatus};
use crate::queryflow::planner::ExecutionPlanner;
use crate::queryflow::registry::ToolRegistry;
use crate::queryflow::state::{AgentState, NextHop};
use std::sync::Arc;

pub struct Supervisor {
    planner: ExecutionPlanner,
    registry: Arc<ToolRegistry>,
}

impl Supervisor {
    pub fn new(planner: ExecutionPlanner, registry: Arc<ToolRegistry>) -> Self {
        Self { planner, registry }
    }

    /// One supervisor visit: ensure a plan exists, then choose the next hop.
    pub async fn run(&self, state: &mut AgentState, cancel: &CancelToken) {
        if state.plan.is_none() {
            match self
                .planner
                .plan(&state.query, &state.context, &self.registry, cancel)
                .await
            {
                Ok(plan) => state.set_plan(plan),
                Err(PlannerError::EmptyCatalogue) => {
                    state.record_error(
                        0,
                        ErrorKind::PlanError,
                        "empty plan: the tool catalogue has no entries",
                    );
                    state.set_plan(Plan::new(state.query.clone(), Vec::new()));
                    state.next_agent = Some(NextHop::End);
                    state.should_continue = false;
                    return;
                }
                Err(err) => {
                    // The planner recovers everything else internally; if
                    // something still escapes, end the run rather than loop.
                    state.record_error(0, ErrorKind::PlanError, err.to_string());
                    state.next_agent = Some(NextHop::End);
                    state.should_continue = false;
                    return;
                }
            }
        }

        // An installed-but-empty plan means there is nothing to execute.
        if state.plan.as_ref().map(Plan::is_empty).unwrap_or(true) {
            state.next_agent = Some(NextHop::End);
            state.should_continue = false;
            return;
        }

        // Walk past steps whose dependencies are unmet.
        loop {
            let step = match state.current_step() {
                Some(step) => step.clone(),
                None => {
                    state.next_agent = Some(NextHop::Consolidate);
                    return;
                }
            };

            let unmet: Vec<usize> = step
                .depends_on
                .iter()
                .copied()
                .filter(|dep| !state.step_succeeded(*dep))
                .collect();

            if unmet.is_empty() {
                if let Some(plan) = state.plan.as_mut() {
                    if let Some(current) = plan
                        .steps
                        .iter_mut()
                        .find(|s| s.step_number == step.step_number)
                    {
                        current.status = StepStatus::InFlight;
                    }
                }
                state.next_agent = Some(NextHop::Agent(step.agent_type));
                state.should_continue = true;
                return;
            }

            state.record_error(
                step.step_number,
                ErrorKind::DependencyUnmet,
                format!(
                    "step {} requires successful step(s) {:?}",
                    step.step_number, unmet
                ),
            );
            if let Some(plan) = state.plan.as_mut() {
                if let Some(current) = plan
                    .steps
                    .iter_mut()
                    .find(|s| s.step_number == step.step_number)
                {
                    current.status = StepStatus::Failed;
                }
            }
            state.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queryflow::gateway::LlmGateway;
    use crate::queryflow::plan::{AgentType, DataSourceClass, Step};
    use crate::queryflow::providers::ScriptedProvider;
    use crate::queryflow::state::AgentResult;
    use std::collections::HashMap;

    fn supervisor_with(registry: ToolRegistry) -> Supervisor {
        let gateway = Arc::new(LlmGateway::new(Arc::new(ScriptedProvider::new())));
        Supervisor::new(ExecutionPlanner::new(gateway), Arc::new(registry))
    }

    fn state_with_plan(steps: Vec<Step>) -> AgentState {
        let mut state = AgentState::new("q", HashMap::new());
        state.set_plan(Plan::new("q", steps));
        state
    }

    #[tokio::test]
    async fn empty_catalogue_ends_the_run() {
        let supervisor = supervisor_with(ToolRegistry::new());
        let mut state = AgentState::new("anything", HashMap::new());
        supervisor.run(&mut state, &CancelToken::never()).await;

        assert_eq!(state.next_agent, Some(NextHop::End));
        assert!(!state.should_continue);
        assert!(state.plan.as_ref().unwrap().is_empty());
        assert!(state
            .errors
            .iter()
            .any(|e| e.kind == ErrorKind::PlanError));
    }

    #[tokio::test]
    async fn dispatches_the_current_step() {
        let supervisor = supervisor_with(ToolRegistry::new());
        let mut state = state_with_plan(vec![Step::new(1, "a", DataSourceClass::RestApi)]);
        supervisor.run(&mut state, &CancelToken::never()).await;

        assert_eq!(state.next_agent, Some(NextHop::Agent(AgentType::Rest)));
        assert!(state.should_continue);
        assert_eq!(
            state.plan.as_ref().unwrap().steps[0].status,
            StepStatus::InFlight
        );
    }

    #[tokio::test]
    async fn exhausted_plan_routes_to_consolidation() {
        let supervisor = supervisor_with(ToolRegistry::new());
        let mut state = state_with_plan(vec![Step::new(1, "a", DataSourceClass::RestApi)]);
        state.advance();
        supervisor.run(&mut state, &CancelToken::never()).await;
        assert_eq!(state.next_agent, Some(NextHop::Consolidate));
    }

    #[tokio::test]
    async fn unmet_dependency_fails_the_step_and_moves_on() {
        let supervisor = supervisor_with(ToolRegistry::new());
        let mut state = state_with_plan(vec![
            Step::new(1, "a", DataSourceClass::RestApi),
            Step::new(2, "b", DataSourceClass::RelationalDb).with_dependency(1),
        ]);
        // Step 1 failed, so step 2's dependency can never be satisfied.
        state.append_result(AgentResult::failure(
            1,
            AgentType::Rest,
            "list_users",
            ErrorKind::UpstreamError,
            1,
        ));
        state.advance();

        supervisor.run(&mut state, &CancelToken::never()).await;

        assert!(state
            .errors
            .iter()
            .any(|e| e.kind == ErrorKind::DependencyUnmet && e.step_number == 2));
        assert_eq!(
            state.plan.as_ref().unwrap().steps[1].status,
            StepStatus::Failed
        );
        // Nothing left to run.
        assert_eq!(state.next_agent, Some(NextHop::Consolidate));
    }

    #[tokio::test]
    async fn satisfied_dependency_dispatches_normally() {
        let supervisor = supervisor_with(ToolRegistry::new());
        let mut state = state_with_plan(vec![
            Step::new(1, "a", DataSourceClass::RestApi),
            Step::new(2, "b", DataSourceClass::RelationalDb).with_dependency(1),
        ]);
        state.append_result(AgentResult::success(
            1,
            AgentType::Rest,
            "list_users",
            Vec::new(),
            1,
        ));
        state.advance();

        supervisor.run(&mut state, &CancelToken::never()).await;
        assert_eq!(state.next_agent, Some(NextHop::Agent(AgentType::Sql)));
    }
}
