//! Data-source agents: one per backend family.
//!
//! All three agents share the same execution pipeline, implemented once in
//! [`AgentCore`]:
//!
//! 1. Ask the registry for the top candidates of the agent's class, ranked
//!    by the step description and the original query.
//! 2. Offer the candidates to the model as native tools and let it pick one
//!    and bind arguments. When the model declines (or the gateway is down),
//!    take the top-ranked candidate and bind arguments from the step's
//!    parameter hints plus shallow extraction from the query.
//! 3. Invoke the chosen tool.
//! 4. Normalize the result rows and tag them with the tool name.
//!
//! Agents never panic the workflow: every failure path produces an
//! [`AgentResult`] with `ok: false` and a classified error kind. Retries
//! beyond what each agent documents are the tool's concern, not the
//! agent's.

pub mod rest;
pub mod soap;
pub mod sql;

pub use rest::RestAgent;
pub use soap::SoapAgent;
pub use sql::SqlAgent;

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::{GatewayError, ToolError};
use crate::queryflow::gateway::{ChatMessage, LlmGateway, ToolSpec};
use crate::queryflow::hints::extract_parameter_hints;
use crate::queryflow::plan::{DataSourceClass, Step};
use crate::queryflow::registry::{ToolDescriptor, ToolRegistry};
use crate::queryflow::state::{AgentResult, AgentState};
use crate::queryflow::tool::{rows_from_value, ToolResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// How many ranked candidates are offered to the model.
const CANDIDATE_LIMIT: usize = 5;

/// Common contract implemented by every data-source agent.
#[async_trait]
pub trait DataSourceAgent: Send + Sync {
    /// The agent family this node implements.
    fn agent_type(&self) -> crate::queryflow::plan::AgentType;

    /// Execute one step against an immutable state snapshot.
    async fn execute(&self, step: &Step, state: &AgentState, cancel: &CancelToken) -> AgentResult;
}

/// What happened when the shared pipeline ran one step.
pub(crate) enum StepOutcome {
    /// The tool ran and returned a (possibly empty) result.
    Success {
        tool_name: String,
        result: ToolResult,
        latency_ms: u64,
    },
    /// No registered tool of the class scored above the cutoff.
    NoCandidates,
    /// The chosen tool failed.
    ToolFailed {
        tool_name: String,
        error: ToolError,
        latency_ms: u64,
    },
    /// The run was cancelled mid-step.
    Cancelled,
}

/// The shared selection/binding/invocation pipeline.
pub(crate) struct AgentCore {
    registry: Arc<ToolRegistry>,
    gateway: Arc<LlmGateway>,
}

impl AgentCore {
    pub(crate) fn new(registry: Arc<ToolRegistry>, gateway: Arc<LlmGateway>) -> Self {
        Self { registry, gateway }
    }

    /// Run one step. `schema_retries` bounds how many times the invocation
    /// is retried with progressively smaller argument sets when the tool
    /// reports a schema mismatch (only the SQL agent asks for any).
    pub(crate) async fn run_step(
        &self,
        class: DataSourceClass,
        step: &Step,
        state: &AgentState,
        cancel: &CancelToken,
        schema_retries: usize,
    ) -> StepOutcome {
        let ranking_text = format!("{} {}", step.description, state.query);
        let mut candidates = self.registry.rank(&ranking_text, Some(class)).await;
        candidates.truncate(CANDIDATE_LIMIT);
        if candidates.is_empty() {
            log::warn!(
                "no {} candidates for step {} ({})",
                class,
                step.step_number,
                step.description
            );
            return StepOutcome::NoCandidates;
        }

        let (descriptor, mut arguments) =
            match self.select_tool(&candidates, step, state, cancel).await {
                Ok(selection) => selection,
                Err(GatewayError::Cancelled) => return StepOutcome::Cancelled,
                Err(err) => {
                    // Selection is best-effort; a down gateway just means we
                    // bind arguments ourselves against the top candidate.
                    log::info!(
                        "tool selection degraded to top-ranked candidate: {}",
                        err
                    );
                    let descriptor = candidates[0].0.clone();
                    let arguments = bind_fallback_arguments(&descriptor, step, state);
                    (descriptor, arguments)
                }
            };

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return StepOutcome::Cancelled;
            }
            let started = tokio::time::Instant::now();
            let invocation = self
                .registry
                .invoke(&descriptor.name, Value::Object(arguments.clone()), cancel)
                .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match invocation {
                Ok(result) => {
                    return StepOutcome::Success {
                        tool_name: descriptor.name.clone(),
                        result: normalize_result(&descriptor.name, result),
                        latency_ms,
                    };
                }
                Err(ToolError::SchemaMismatch(msg)) if attempt < schema_retries => {
                    attempt += 1;
                    log::info!(
                        "tool '{}' reported schema mismatch ({}), retry {} with refined arguments",
                        descriptor.name,
                        msg,
                        attempt
                    );
                    arguments = refine_arguments(&descriptor, &arguments, attempt);
                }
                Err(error) => {
                    return StepOutcome::ToolFailed {
                        tool_name: descriptor.name.clone(),
                        error,
                        latency_ms,
                    };
                }
            }
        }
    }

    /// Offer the candidates to the model and take its choice when it makes
    /// a valid one; otherwise fall back to the top-ranked candidate with
    /// locally bound arguments.
    async fn select_tool(
        &self,
        candidates: &[(ToolDescriptor, f32)],
        step: &Step,
        state: &AgentState,
        cancel: &CancelToken,
    ) -> Result<(ToolDescriptor, Map<String, Value>), GatewayError> {
        let tools: Vec<ToolSpec> = candidates
            .iter()
            .map(|(descriptor, _)| ToolSpec {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameters_schema: descriptor.parameters_schema(),
            })
            .collect();

        let prompt = format!(
            "Task: {}\nOriginal request: {}\n\nChoose exactly one of the available tools and \
             call it with arguments bound to its parameter schema. Do not answer in prose.",
            step.description, state.query
        );
        let messages = [
            ChatMessage::system(
                "You select the single best data-retrieval tool for a task and bind its \
                 arguments. Always respond with a tool call.",
            ),
            ChatMessage::user(&prompt),
        ];

        let completion = self
            .gateway
            .complete(&messages, Some(tools.as_slice()), cancel)
            .await?;

        for call in completion.tool_calls {
            if let Some((descriptor, _)) = candidates
                .iter()
                .find(|(descriptor, _)| descriptor.name == call.tool_name)
            {
                let mut arguments = match call.arguments {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                fill_defaults(descriptor, &mut arguments);
                return Ok((descriptor.clone(), arguments));
            }
            log::warn!(
                "model requested unknown tool '{}', ignoring",
                call.tool_name
            );
        }

        // The model declined to call a tool; bind locally.
        let descriptor = candidates[0].0.clone();
        let arguments = bind_fallback_arguments(&descriptor, step, state);
        Ok((descriptor, arguments))
    }
}

/// Bind arguments for a descriptor from the step's hints, shallow query
/// extraction, and declared defaults — in that precedence order.
pub(crate) fn bind_fallback_arguments(
    descriptor: &ToolDescriptor,
    step: &Step,
    state: &AgentState,
) -> Map<String, Value> {
    let query_hints = extract_parameter_hints(&state.query);
    let mut arguments = Map::new();

    for param in &descriptor.parameters {
        let value = step
            .parameter_hints
            .get(&param.name)
            .or_else(|| query_hints.get(&param.name))
            .cloned()
            .or_else(|| {
                // An id hint satisfies any id-shaped parameter name.
                if param.name == "id" || param.name.ends_with("_id") {
                    step.parameter_hints
                        .get("id")
                        .or_else(|| query_hints.get("id"))
                        .cloned()
                } else {
                    None
                }
            })
            .or_else(|| param.default.clone());
        if let Some(value) = value {
            arguments.insert(param.name.clone(), value);
        }
    }
    arguments
}

/// Apply declared defaults for parameters the model left unbound.
fn fill_defaults(descriptor: &ToolDescriptor, arguments: &mut Map<String, Value>) {
    for param in &descriptor.parameters {
        if !arguments.contains_key(&param.name) {
            if let Some(default) = &param.default {
                arguments.insert(param.name.clone(), default.clone());
            }
        }
    }
}

/// Progressively smaller argument sets for schema-mismatch retries: first
/// only the required parameters, then nothing at all.
fn refine_arguments(
    descriptor: &ToolDescriptor,
    arguments: &Map<String, Value>,
    attempt: usize,
) -> Map<String, Value> {
    match attempt {
        1 => {
            let required: Vec<&str> = descriptor
                .parameters
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name.as_str())
                .collect();
            arguments
                .iter()
                .filter(|(name, _)| required.contains(&name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        }
        _ => Map::new(),
    }
}

/// Ensure the result rows are populated from the raw payload when the tool
/// did not structure them, and stamp the source tag with the tool name.
pub(crate) fn normalize_result(tool_name: &str, mut result: ToolResult) -> ToolResult {
    if result.rows.is_empty() {
        result.rows = rows_from_value(&result.raw);
    }
    result.source_tag = tool_name.to_string();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queryflow::registry::{ParameterSpec, SemanticType};
    use serde_json::json;
    use std::collections::HashMap;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "alerts_by_user",
            "Query alerts by user id and status.",
            DataSourceClass::RelationalDb,
        )
        .with_parameter(ParameterSpec::positional("user_id", SemanticType::String).required())
        .with_parameter(
            ParameterSpec::positional("status", SemanticType::String)
                .with_default(json!("open")),
        )
        .with_parameter(ParameterSpec::positional("limit", SemanticType::Int))
    }

    #[test]
    fn fallback_binding_prefers_step_hints() {
        let mut step = Step::new(1, "alerts", DataSourceClass::RelationalDb);
        step.parameter_hints
            .insert("status".to_string(), json!("closed"));
        let state = AgentState::new("alerts for USER_778899", HashMap::new());

        let bound = bind_fallback_arguments(&descriptor(), &step, &state);
        assert_eq!(bound["status"], json!("closed"));
        // Query-extracted id hint satisfies the *_id parameter.
        assert_eq!(bound["user_id"], json!("USER_778899"));
        assert!(bound.get("limit").is_none());
    }

    #[test]
    fn fallback_binding_uses_defaults_last() {
        let step = Step::new(1, "alerts", DataSourceClass::RelationalDb);
        let state = AgentState::new("anything at all", HashMap::new());
        let bound = bind_fallback_arguments(&descriptor(), &step, &state);
        assert_eq!(bound["status"], json!("open"));
    }

    #[test]
    fn refinement_shrinks_to_required_then_empty() {
        let mut arguments = Map::new();
        arguments.insert("user_id".to_string(), json!("U7"));
        arguments.insert("status".to_string(), json!("open"));
        arguments.insert("limit".to_string(), json!(10));

        let first = refine_arguments(&descriptor(), &arguments, 1);
        assert_eq!(first.len(), 1);
        assert_eq!(first["user_id"], json!("U7"));

        let second = refine_arguments(&descriptor(), &arguments, 2);
        assert!(second.is_empty());
    }

    #[test]
    fn normalize_fills_rows_and_source_tag() {
        let raw = ToolResult {
            rows: Vec::new(),
            raw: json!([{ "a": 1 }]),
            source_tag: String::new(),
        };
        let normalized = normalize_result("my_tool", raw);
        assert_eq!(normalized.rows.len(), 1);
        assert_eq!(normalized.source_tag, "my_tool");
    }
}
