//! Routing: which node runs next.
//!
//! [`route`] is a pure, total function of the source node and the run
//! state. It performs no I/O and records nothing — the driver calls it
//! between node executions and dispatches accordingly. Totality and
//! determinism are load-bearing: the same `(from, state)` pair always
//! yields the same node, which is what makes run traces replayable.

use crate::queryflow::plan::AgentType;
use crate::queryflow::state::{AgentState, NextHop};
use std::fmt;

/// The nodes of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeName {
    Supervisor,
    SqlAgent,
    RestAgent,
    SoapAgent,
    Consolidator,
    End,
}

impl NodeName {
    /// The node an agent family maps onto.
    pub fn for_agent(agent_type: AgentType) -> NodeName {
        match agent_type {
            AgentType::Sql => NodeName::SqlAgent,
            AgentType::Rest => NodeName::RestAgent,
            AgentType::Soap => NodeName::SoapAgent,
        }
    }

    /// Whether this node is one of the data-source agents.
    pub fn is_agent(self) -> bool {
        matches!(
            self,
            NodeName::SqlAgent | NodeName::RestAgent | NodeName::SoapAgent
        )
    }

    /// Wire name used in progress frames and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeName::Supervisor => "supervisor",
            NodeName::SqlAgent => "sql_agent",
            NodeName::RestAgent => "rest_agent",
            NodeName::SoapAgent => "soap_agent",
            NodeName::Consolidator => "consolidator",
            NodeName::End => "end",
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decide the next node given where control is coming from and the current
/// state.
///
/// - From the supervisor: follow its routing hint (`next_agent`).
/// - From an agent: back to the supervisor while steps remain and the run
///   should continue; to the consolidator once steps are exhausted (it
///   handles both merged and single-result formatting); straight to end
///   when the run was told to stop.
/// - From the consolidator (or end): always end.
pub fn route(from: NodeName, state: &AgentState) -> NodeName {
    match from {
        NodeName::Supervisor => match state.next_agent {
            Some(NextHop::Agent(agent_type)) => NodeName::for_agent(agent_type),
            Some(NextHop::Consolidate) => NodeName::Consolidator,
            Some(NextHop::End) | None => NodeName::End,
        },
        NodeName::SqlAgent | NodeName::RestAgent | NodeName::SoapAgent => {
            if !state.should_continue {
                NodeName::End
            } else if state.steps_remaining() {
                NodeName::Supervisor
            } else {
                NodeName::Consolidator
            }
        }
        NodeName::Consolidator | NodeName::End => NodeName::End,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queryflow::plan::{DataSourceClass, Plan, Step};
    use std::collections::HashMap;

    fn state() -> AgentState {
        AgentState::new("q", HashMap::new())
    }

    #[test]
    fn supervisor_hint_maps_to_agent_nodes() {
        let mut s = state();
        s.next_agent = Some(NextHop::Agent(AgentType::Sql));
        assert_eq!(route(NodeName::Supervisor, &s), NodeName::SqlAgent);
        s.next_agent = Some(NextHop::Agent(AgentType::Rest));
        assert_eq!(route(NodeName::Supervisor, &s), NodeName::RestAgent);
        s.next_agent = Some(NextHop::Agent(AgentType::Soap));
        assert_eq!(route(NodeName::Supervisor, &s), NodeName::SoapAgent);
        s.next_agent = Some(NextHop::Consolidate);
        assert_eq!(route(NodeName::Supervisor, &s), NodeName::Consolidator);
        s.next_agent = Some(NextHop::End);
        assert_eq!(route(NodeName::Supervisor, &s), NodeName::End);
    }

    #[test]
    fn missing_hint_routes_to_end() {
        let s = state();
        assert_eq!(route(NodeName::Supervisor, &s), NodeName::End);
    }

    #[test]
    fn agent_returns_to_supervisor_while_steps_remain() {
        let mut s = state();
        s.set_plan(Plan::new(
            "q",
            vec![
                Step::new(1, "a", DataSourceClass::RestApi),
                Step::new(2, "b", DataSourceClass::RelationalDb),
            ],
        ));
        s.current_step_index = 1;
        assert_eq!(route(NodeName::RestAgent, &s), NodeName::Supervisor);
    }

    #[test]
    fn agent_goes_to_consolidator_when_exhausted() {
        let mut s = state();
        s.set_plan(Plan::new(
            "q",
            vec![Step::new(1, "a", DataSourceClass::RestApi)],
        ));
        s.current_step_index = 1;
        assert_eq!(route(NodeName::RestAgent, &s), NodeName::Consolidator);
    }

    #[test]
    fn stopped_run_ends_from_any_agent() {
        let mut s = state();
        s.should_continue = false;
        assert_eq!(route(NodeName::SqlAgent, &s), NodeName::End);
        assert_eq!(route(NodeName::SoapAgent, &s), NodeName::End);
    }

    #[test]
    fn consolidator_always_ends() {
        let s = state();
        assert_eq!(route(NodeName::Consolidator, &s), NodeName::End);
        assert_eq!(route(NodeName::End, &s), NodeName::End);
    }

    #[test]
    fn route_is_deterministic() {
        let mut s = state();
        s.next_agent = Some(NextHop::Agent(AgentType::Rest));
        let first = route(NodeName::Supervisor, &s);
        for _ in 0..10 {
            assert_eq!(route(NodeName::Supervisor, &s), first);
        }
    }
}
