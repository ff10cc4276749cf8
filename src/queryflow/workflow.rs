//! The workflow driver: a compiled node graph run to completion.
//!
//! The graph is fixed: entry at the supervisor, conditional edges through
//! [`route`], agent nodes returning to the supervisor until the plan is
//! exhausted, then the consolidator, then end.
//!
//! ```text
//!             ┌──────────────┐
//!      ┌─────▶│  SUPERVISOR  │─────────────┐
//!      │      └──────┬───────┘             │ (plan exhausted / empty)
//!      │             │ next_agent          ▼
//!      │   ┌─────────┼─────────┐    ┌──────────────┐
//!      │   ▼         ▼         ▼    │ CONSOLIDATOR │──▶ END
//!      │ ┌─────┐ ┌──────┐ ┌──────┐  └──────────────┘
//!      └─│ SQL │ │ REST │ │ SOAP │─────────▲
//!        └─────┘ └──────┘ └──────┘ (last step done)
//! ```
//!
//! Guarantees enforced here rather than in the nodes:
//!
//! - every node execution is bounded by the configured node timeout, and a
//!   panic inside a node becomes a failed result instead of tearing down
//!   the run;
//! - a run-wide deadline routes to the consolidator with whatever results
//!   exist;
//! - an iteration cap on supervisor visits prevents routing loops;
//! - events are delivered in production order, and a bounded event channel
//!   applies subscriber backpressure to node execution.

use crate::queryflow::agents::{AgentCore, DataSourceAgent, RestAgent, SoapAgent, SqlAgent};
use crate::queryflow::cancel::CancelToken;
use crate::queryflow::config::{QueryFlowConfig, UnknownNodePolicy};
use crate::queryflow::consolidator::{concat_rows, deterministic_format, Consolidator};
use crate::queryflow::error::ErrorKind;
use crate::queryflow::event::{EventHandler, StateDelta, WorkflowEvent};
use crate::queryflow::gateway::LlmGateway;
use crate::queryflow::planner::ExecutionPlanner;
use crate::queryflow::registry::ToolRegistry;
use crate::queryflow::router::{route, NodeName};
use crate::queryflow::state::{AgentResult, AgentState};
use crate::queryflow::supervisor::Supervisor;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct WorkflowDriver {
    config: QueryFlowConfig,
    supervisor: Supervisor,
    agents: HashMap<NodeName, Arc<dyn DataSourceAgent>>,
    consolidator: Consolidator,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl WorkflowDriver {
    /// Wire the full node set against a shared registry and gateway.
    pub fn new(
        registry: Arc<ToolRegistry>,
        gateway: Arc<LlmGateway>,
        config: QueryFlowConfig,
    ) -> Self {
        let supervisor = Supervisor::new(
            ExecutionPlanner::new(gateway.clone()),
            registry.clone(),
        );

        let mut agents: HashMap<NodeName, Arc<dyn DataSourceAgent>> = HashMap::new();
        agents.insert(
            NodeName::SqlAgent,
            Arc::new(SqlAgent::new(AgentCore::new(registry.clone(), gateway.clone()))),
        );
        agents.insert(
            NodeName::RestAgent,
            Arc::new(RestAgent::new(AgentCore::new(registry.clone(), gateway.clone()))),
        );
        agents.insert(
            NodeName::SoapAgent,
            Arc::new(SoapAgent::new(AgentCore::new(registry, gateway.clone()))),
        );

        let consolidator = Consolidator::new(gateway, config.llm_row_cap);

        Self {
            config,
            supervisor,
            agents,
            consolidator,
            event_handler: None,
        }
    }

    /// Register an observability handler (builder pattern).
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Drive one run to completion and return the final state.
    ///
    /// When `events` is provided, every [`WorkflowEvent`] is also pushed
    /// into the channel *before* the next node starts; a full channel
    /// therefore pauses the run (bounded by the node timeout at the
    /// transport layer). A closed channel is treated like a disconnect.
    pub async fn run(
        &self,
        mut state: AgentState,
        events: Option<mpsc::Sender<WorkflowEvent>>,
        cancel: &CancelToken,
    ) -> AgentState {
        let run_id = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + self.config.overall_deadline;
        let mut node = NodeName::Supervisor;
        let mut supervisor_visits = 0usize;
        let mut deadline_fired = false;

        let preview: String = state.query.chars().take(120).collect();
        if !self
            .emit(
                &events,
                WorkflowEvent::RunStarted {
                    run_id: run_id.clone(),
                    query_preview: preview,
                },
            )
            .await
        {
            state.should_continue = false;
            return state;
        }

        while node != NodeName::End {
            if cancel.is_cancelled() {
                let step = self.current_step_number(&state);
                state.record_error(step, ErrorKind::Cancelled, "run cancelled by the client");
                state.should_continue = false;
                break;
            }

            if !deadline_fired
                && node != NodeName::Consolidator
                && tokio::time::Instant::now() >= deadline
            {
                deadline_fired = true;
                let step = self.current_step_number(&state);
                state.record_error(
                    step,
                    ErrorKind::DeadlineExceeded,
                    format!(
                        "run exceeded its {}s deadline",
                        self.config.overall_deadline.as_secs()
                    ),
                );
                state.skip_remaining_steps();
                node = NodeName::Consolidator;
            }

            if node == NodeName::Supervisor {
                supervisor_visits += 1;
                if supervisor_visits > self.config.max_iterations {
                    let step = self.current_step_number(&state);
                    state.record_error(
                        step,
                        ErrorKind::Internal,
                        format!(
                            "workflow incomplete: supervisor iteration cap ({}) reached",
                            self.config.max_iterations
                        ),
                    );
                    state.skip_remaining_steps();
                    node = NodeName::Consolidator;
                }
            }

            if !self
                .emit(
                    &events,
                    WorkflowEvent::NodeStarted {
                        run_id: run_id.clone(),
                        node,
                    },
                )
                .await
            {
                state.should_continue = false;
                break;
            }

            let results_before = state.result_count();
            let errors_before = state.errors.len();
            let final_before = state.final_response.is_some();

            match node {
                NodeName::Supervisor => {
                    let had_plan = state.plan.is_some();
                    let visit = self.supervisor.run(&mut state, cancel);
                    if tokio::time::timeout(self.config.node_timeout, visit)
                        .await
                        .is_err()
                    {
                        let step = self.current_step_number(&state);
                        state.record_error(
                            step,
                            ErrorKind::Timeout,
                            "supervisor timed out while planning",
                        );
                        state.next_agent =
                            Some(crate::queryflow::state::NextHop::Consolidate);
                    }
                    if !had_plan {
                        if let Some(plan) = &state.plan {
                            let event = WorkflowEvent::PlanCreated {
                                run_id: run_id.clone(),
                                plan_id: plan.plan_id.clone(),
                                steps: plan.steps.len(),
                                requires_consolidation: plan.requires_consolidation,
                            };
                            if !self.emit(&events, event).await {
                                state.should_continue = false;
                                break;
                            }
                        }
                    }
                }

                NodeName::SqlAgent | NodeName::RestAgent | NodeName::SoapAgent => {
                    match self.agents.get(&node) {
                        Some(agent) => {
                            if let Some(step) = state.current_step().cloned() {
                                let execution = AssertUnwindSafe(
                                    agent.execute(&step, &state, cancel),
                                )
                                .catch_unwind();
                                let result = match tokio::time::timeout(
                                    self.config.node_timeout,
                                    execution,
                                )
                                .await
                                {
                                    Ok(Ok(result)) => result,
                                    Ok(Err(_panic)) => {
                                        log::error!(
                                            "agent {} panicked on step {}",
                                            node,
                                            step.step_number
                                        );
                                        AgentResult::failure(
                                            step.step_number,
                                            step.agent_type,
                                            "",
                                            ErrorKind::Internal,
                                            0,
                                        )
                                    }
                                    Err(_elapsed) => AgentResult::failure(
                                        step.step_number,
                                        step.agent_type,
                                        "",
                                        ErrorKind::Timeout,
                                        self.config.node_timeout.as_millis() as u64,
                                    ),
                                };

                                let event = if result.ok {
                                    WorkflowEvent::StepCompleted {
                                        run_id: run_id.clone(),
                                        step_number: result.step_number,
                                        agent_type: result.agent_type,
                                        tool_name: result.tool_name.clone(),
                                        ok: true,
                                        latency_ms: result.latency_ms,
                                    }
                                } else {
                                    let kind = result.error.unwrap_or(ErrorKind::Internal);
                                    state.record_error(
                                        result.step_number,
                                        kind,
                                        format!("step failed in {}", node),
                                    );
                                    WorkflowEvent::StepFailed {
                                        run_id: run_id.clone(),
                                        step_number: result.step_number,
                                        kind,
                                        message: format!("step failed in {}", node),
                                    }
                                };
                                state.append_result(result);
                                state.advance();
                                if !self.emit(&events, event).await {
                                    state.should_continue = false;
                                    break;
                                }
                            }
                        }
                        None => match self.config.unknown_node_policy {
                            UnknownNodePolicy::End => {
                                log::warn!("no node registered for {}, ending run", node);
                                state.should_continue = false;
                            }
                            UnknownNodePolicy::Error => {
                                let step = self.current_step_number(&state);
                                state.record_error(
                                    step,
                                    ErrorKind::Internal,
                                    format!("no node registered for {}", node),
                                );
                                state.should_continue = false;
                            }
                        },
                    }
                }

                NodeName::Consolidator => {
                    let consolidation = self.consolidator.run(&mut state, cancel);
                    if tokio::time::timeout(self.config.node_timeout, consolidation)
                        .await
                        .is_err()
                    {
                        state.record_error(
                            0,
                            ErrorKind::Timeout,
                            "consolidator timed out, using deterministic formatting",
                        );
                        let contributions: Vec<&AgentResult> = state
                            .all_results()
                            .filter(|r| r.ok && !r.rows.is_empty())
                            .collect();
                        let rows = concat_rows(&contributions);
                        let text = deterministic_format(&state.query, &rows, None);
                        state.set_final(text);
                    }
                }

                NodeName::End => {}
            }

            let delta = StateDelta {
                results_appended: state.result_count() - results_before,
                step_index: state.current_step_index,
                errors_recorded: state.errors.len() - errors_before,
                final_set: !final_before && state.final_response.is_some(),
            };
            if !self
                .emit(
                    &events,
                    WorkflowEvent::NodeCompleted {
                        run_id: run_id.clone(),
                        node,
                        state_update: delta,
                    },
                )
                .await
            {
                state.should_continue = false;
                break;
            }

            node = route(node, &state);
        }

        let ok = state.final_response.is_some();
        self.emit(
            &events,
            WorkflowEvent::RunCompleted {
                run_id: run_id.clone(),
                ok,
            },
        )
        .await;
        log::info!(
            "run {} finished: ok={}, {} result(s), {} error(s)",
            run_id,
            ok,
            state.result_count(),
            state.errors.len()
        );
        state
    }

    /// The step number the cursor points at, or 0 when there is none.
    fn current_step_number(&self, state: &AgentState) -> usize {
        state.current_step().map(|s| s.step_number).unwrap_or(0)
    }

    /// Deliver an event to the handler and the subscriber channel. Returns
    /// false when the subscriber is gone and the run should stop.
    async fn emit(
        &self,
        events: &Option<mpsc::Sender<WorkflowEvent>>,
        event: WorkflowEvent,
    ) -> bool {
        if let Some(handler) = &self.event_handler {
            handler.on_workflow_event(&event).await;
        }
        if let Some(sender) = events {
            if sender.send(event).await.is_err() {
                log::info!("event subscriber went away, stopping run");
                return false;
            }
        }
        true
    }
}
