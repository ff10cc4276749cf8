//! Plans, steps, and the agent/data-source vocabulary.
//!
//! A [`Plan`] is the planner's output: an ordered, dependency-constrained
//! sequence of [`Step`]s, each naming the agent that will execute it. Plans
//! are immutable once created except for per-step status transitions, and
//! they serialize losslessly so they can be logged, replayed, or inspected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// The specialized agent families the workflow can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentType {
    #[serde(rename = "SQL_AGENT")]
    Sql,
    #[serde(rename = "REST_AGENT")]
    Rest,
    #[serde(rename = "SOAP_AGENT")]
    Soap,
}

impl AgentType {
    /// The backend family this agent speaks to.
    pub fn data_source_class(self) -> DataSourceClass {
        match self {
            AgentType::Sql => DataSourceClass::RelationalDb,
            AgentType::Rest => DataSourceClass::RestApi,
            AgentType::Soap => DataSourceClass::SoapApi,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentType::Sql => "SQL_AGENT",
            AgentType::Rest => "REST_AGENT",
            AgentType::Soap => "SOAP_AGENT",
        };
        write!(f, "{}", name)
    }
}

/// The backend families a tool can belong to. One-to-one with [`AgentType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSourceClass {
    #[serde(rename = "RELATIONAL_DB")]
    RelationalDb,
    #[serde(rename = "REST_API")]
    RestApi,
    #[serde(rename = "SOAP_API")]
    SoapApi,
}

impl DataSourceClass {
    /// The agent family responsible for this backend class.
    pub fn agent_type(self) -> AgentType {
        match self {
            DataSourceClass::RelationalDb => AgentType::Sql,
            DataSourceClass::RestApi => AgentType::Rest,
            DataSourceClass::SoapApi => AgentType::Soap,
        }
    }
}

impl fmt::Display for DataSourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataSourceClass::RelationalDb => "RELATIONAL_DB",
            DataSourceClass::RestApi => "REST_API",
            DataSourceClass::SoapApi => "SOAP_API",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle of a single planned step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    InFlight,
    Done,
    Failed,
    Skipped,
}

/// Planner's estimate of how much work a query will take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "med")]
    Medium,
    #[serde(rename = "high")]
    High,
}

/// One planned action: a single agent invoking a single tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based ordinal within the plan.
    pub step_number: usize,
    /// What this step is meant to retrieve, in plain language. Used to rank
    /// candidate tools.
    pub description: String,
    /// The agent family that executes this step.
    pub agent_type: AgentType,
    /// The backend class candidate tools are filtered to.
    pub data_source_class: DataSourceClass,
    /// Step numbers whose successful results must be present before this
    /// step may run. Always references earlier steps.
    #[serde(default)]
    pub depends_on: BTreeSet<usize>,
    /// Arguments lifted from the query text at planning time. Agents use
    /// these when the model declines to bind arguments itself.
    #[serde(default)]
    pub parameter_hints: Map<String, Value>,
    /// Current lifecycle state.
    pub status: StepStatus,
}

impl Step {
    /// Create a pending step for the given backend class.
    pub fn new(
        step_number: usize,
        description: impl Into<String>,
        class: DataSourceClass,
    ) -> Self {
        Self {
            step_number,
            description: description.into(),
            agent_type: class.agent_type(),
            data_source_class: class,
            depends_on: BTreeSet::new(),
            parameter_hints: Map::new(),
            status: StepStatus::Pending,
        }
    }

    /// Declare a dependency on an earlier step (builder pattern).
    pub fn with_dependency(mut self, step_number: usize) -> Self {
        self.depends_on.insert(step_number);
        self
    }

    /// Attach a pre-bound argument (builder pattern).
    pub fn with_hint(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameter_hints.insert(name.into(), value);
        self
    }
}

/// Structural problems that make a plan unexecutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDefect {
    /// Two steps carry the same ordinal.
    DuplicateStepNumber(usize),
    /// A step lists itself as a dependency.
    SelfDependency(usize),
    /// A step depends on a step that does not precede it.
    ForwardReference { step: usize, depends_on: usize },
}

impl fmt::Display for PlanDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanDefect::DuplicateStepNumber(n) => write!(f, "duplicate step number {}", n),
            PlanDefect::SelfDependency(n) => write!(f, "step {} depends on itself", n),
            PlanDefect::ForwardReference { step, depends_on } => {
                write!(f, "step {} depends on later step {}", step, depends_on)
            }
        }
    }
}

impl std::error::Error for PlanDefect {}

/// A dependency-ordered sequence of steps answering one query.
///
/// Immutable once created except for `steps[i].status`; everything else is
/// fixed at planning time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique id for logging and event correlation.
    pub plan_id: String,
    /// The query this plan answers.
    pub query: String,
    /// Ordered steps. Step `n` always appears at index `n - 1`.
    pub steps: Vec<Step>,
    /// Whether the consolidator must merge results across steps.
    pub requires_consolidation: bool,
    /// Planner's effort estimate.
    pub estimated_complexity: Complexity,
    /// Free-form planning annotations. The key `"format"` is recognized by
    /// the consolidator as an output-format override.
    #[serde(default)]
    pub notes: std::collections::HashMap<String, String>,
}

impl Plan {
    /// Create a plan over the given steps with a fresh id.
    pub fn new(query: impl Into<String>, steps: Vec<Step>) -> Self {
        let requires_consolidation = steps.len() > 1;
        let estimated_complexity = match steps.len() {
            0 | 1 => Complexity::Low,
            2 => Complexity::Medium,
            _ => Complexity::High,
        };
        Self {
            plan_id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            steps,
            requires_consolidation,
            estimated_complexity,
            notes: std::collections::HashMap::new(),
        }
    }

    /// Whether the plan contains no steps at all.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check that the dependency graph is well formed: step numbers are
    /// unique and contiguous from 1, and every dependency points at a
    /// strictly earlier step. Because dependencies may only point backwards,
    /// a valid plan is automatically acyclic.
    pub fn validate(&self) -> Result<(), PlanDefect> {
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_number) {
                return Err(PlanDefect::DuplicateStepNumber(step.step_number));
            }
            for &dep in &step.depends_on {
                if dep == step.step_number {
                    return Err(PlanDefect::SelfDependency(step.step_number));
                }
                if dep >= step.step_number {
                    return Err(PlanDefect::ForwardReference {
                        step: step.step_number,
                        depends_on: dep,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_step_plan() -> Plan {
        let steps = vec![
            Step::new(1, "list users in engineering", DataSourceClass::RestApi)
                .with_hint("department", json!("engineering")),
            Step::new(2, "alerts for those users", DataSourceClass::RelationalDb)
                .with_dependency(1),
        ];
        Plan::new("High severity alerts for engineering users", steps)
    }

    #[test]
    fn plan_serde_round_trip_is_lossless() {
        let plan = two_step_plan();
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();

        assert_eq!(back.plan_id, plan.plan_id);
        assert_eq!(back.query, plan.query);
        assert_eq!(back.requires_consolidation, plan.requires_consolidation);
        assert_eq!(back.estimated_complexity, plan.estimated_complexity);
        assert_eq!(back.steps.len(), plan.steps.len());
        for (a, b) in back.steps.iter().zip(plan.steps.iter()) {
            assert_eq!(a.step_number, b.step_number);
            assert_eq!(a.description, b.description);
            assert_eq!(a.agent_type, b.agent_type);
            assert_eq!(a.data_source_class, b.data_source_class);
            assert_eq!(a.depends_on, b.depends_on);
            assert_eq!(a.parameter_hints, b.parameter_hints);
            assert_eq!(a.status, b.status);
        }
    }

    #[test]
    fn validate_accepts_backward_dependencies() {
        assert!(two_step_plan().validate().is_ok());
    }

    #[test]
    fn validate_rejects_self_dependency() {
        let mut plan = two_step_plan();
        plan.steps[0].depends_on.insert(1);
        assert_eq!(plan.validate(), Err(PlanDefect::SelfDependency(1)));
    }

    #[test]
    fn validate_rejects_forward_reference() {
        let mut plan = two_step_plan();
        plan.steps[0].depends_on.insert(2);
        assert_eq!(
            plan.validate(),
            Err(PlanDefect::ForwardReference {
                step: 1,
                depends_on: 2
            })
        );
    }

    #[test]
    fn validate_rejects_duplicate_numbers() {
        let mut plan = two_step_plan();
        plan.steps[1].step_number = 1;
        plan.steps[1].depends_on.clear();
        assert_eq!(plan.validate(), Err(PlanDefect::DuplicateStepNumber(1)));
    }

    #[test]
    fn agent_and_class_are_one_to_one() {
        for class in [
            DataSourceClass::RelationalDb,
            DataSourceClass::RestApi,
            DataSourceClass::SoapApi,
        ]
        .iter()
        {
            assert_eq!(class.agent_type().data_source_class(), *class);
        }
    }

    #[test]
    fn wire_names_are_stable() {
        assert_eq!(
            serde_json::to_string(&AgentType::Sql).unwrap(),
            "\"SQL_AGENT\""
        );
        assert_eq!(
            serde_json::to_string(&DataSourceClass::SoapApi).unwrap(),
            "\"SOAP_API\""
        );
        assert_eq!(serde_json::to_string(&Complexity::Medium).unwrap(), "\"med\"");
    }
}
