use async_trait::async_trait;
use queryflow::queryflow::cancel::CancelToken;
use queryflow::queryflow::config::QueryFlowConfig;
use queryflow::queryflow::consolidator::deterministic_format;
use queryflow::queryflow::error::{ErrorKind, ToolError};
use queryflow::queryflow::providers::ScriptedProvider;
use queryflow::queryflow::registry::{ParameterSpec, SemanticType};
use queryflow::{
    AgentState, DataSourceClass, LlmGateway, Tool, ToolDescriptor, ToolRegistry, ToolResult,
    WorkflowDriver,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A tool that returns fixed rows and records the arguments it was given.
struct StaticTool {
    rows: Value,
    seen_arguments: Mutex<Vec<Value>>,
}

impl StaticTool {
    fn new(rows: Value) -> Arc<Self> {
        Arc::new(Self {
            rows,
            seen_arguments: Mutex::new(Vec::new()),
        })
    }

    fn last_arguments(&self) -> Option<Value> {
        self.seen_arguments.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Tool for StaticTool {
    async fn invoke(
        &self,
        arguments: Value,
        _cancel: &CancelToken,
    ) -> Result<ToolResult, ToolError> {
        self.seen_arguments.lock().unwrap().push(arguments);
        Ok(ToolResult::from_raw("", self.rows.clone()))
    }
}

/// A tool that always fails with an upstream error.
struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    async fn invoke(
        &self,
        _arguments: Value,
        _cancel: &CancelToken,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::UpstreamError("backend returned 502".to_string()))
    }
}

/// A tool that takes far longer than any node timeout used in these tests.
struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    async fn invoke(
        &self,
        _arguments: Value,
        _cancel: &CancelToken,
    ) -> Result<ToolResult, ToolError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ToolResult::from_raw("", json!([])))
    }
}

fn alerts_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "list_alerts",
        "List alerts filtered by status. Keywords: alerts, open, closed, incidents.",
        DataSourceClass::RestApi,
    )
    .with_parameter(ParameterSpec::query("status", SemanticType::String).required())
}

fn users_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "list_users",
        "List users in a department. Keywords: users, employees, engineering, department.",
        DataSourceClass::RestApi,
    )
    .with_parameter(ParameterSpec::query("department", SemanticType::String))
}

fn alerts_by_user_descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "alerts_by_user",
        "Query the alerts table for one user. Keywords: alerts, severity, user, high.",
        DataSourceClass::RelationalDb,
    )
    .with_parameter(ParameterSpec::positional("user_id", SemanticType::String).required())
}

fn analysis(sources: &[&str], consolidation: bool) -> String {
    serde_json::to_string(&json!({
        "intent": "read",
        "entities": [],
        "required_sources": sources,
        "requires_consolidation": consolidation,
        "estimated_complexity": "low",
        "notes": {}
    }))
    .unwrap()
}

fn driver_with(
    registry: ToolRegistry,
    provider: Arc<ScriptedProvider>,
    config: QueryFlowConfig,
) -> WorkflowDriver {
    let _ = env_logger::builder().is_test(true).try_init();
    let gateway = Arc::new(LlmGateway::new(provider));
    WorkflowDriver::new(Arc::new(registry), gateway, config)
}

#[tokio::test]
async fn single_source_read_formats_the_tool_rows() {
    let tool = StaticTool::new(json!([{ "alert_id": "A1" }, { "alert_id": "A2" }]));
    let mut registry = ToolRegistry::new();
    registry
        .register(alerts_descriptor(), tool.clone())
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text(analysis(&["REST_API"], false));
    provider.push_tool_call("list_alerts", json!({ "status": "open" }));

    let driver = driver_with(registry, provider, QueryFlowConfig::default());
    let state = AgentState::new("Show me all open alerts", HashMap::new());
    let final_state = driver.run(state, None, &CancelToken::never()).await;

    // The model's bound arguments reached the tool.
    assert_eq!(tool.last_arguments().unwrap()["status"], json!("open"));

    assert_eq!(final_state.rest_results.len(), 1);
    let result = &final_state.rest_results[0];
    assert!(result.ok);
    assert_eq!(result.tool_name, "list_alerts");
    assert_eq!(result.rows.len(), 2);

    // Single step, no consolidation: the answer is exactly the
    // deterministic formatting of the tool's rows.
    let expected = deterministic_format("Show me all open alerts", &result.rows, None);
    let final_response = final_state.final_response.as_deref().unwrap();
    assert_eq!(final_response, expected);
    assert!(final_response.contains("A1"));
    assert!(final_response.contains("A2"));
}

#[tokio::test]
async fn cross_source_join_merges_both_steps() {
    let users = StaticTool::new(json!([{ "user_id": "U7", "dept": "Eng" }]));
    let alerts = StaticTool::new(
        json!([{ "alert_id": "A9", "user_id": "U7", "severity": "high" }]),
    );
    let mut registry = ToolRegistry::new();
    registry.register(users_descriptor(), users).await.unwrap();
    registry
        .register(alerts_by_user_descriptor(), alerts)
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text(analysis(&["REST_API", "RELATIONAL_DB"], true));
    provider.push_tool_call("list_users", json!({ "department": "Engineering" }));
    provider.push_tool_call("alerts_by_user", json!({ "user_id": "U7" }));
    provider.push_text(
        "| user_id | alert_id | severity |\n| --- | --- | --- |\n| U7 | A9 | high |",
    );

    let driver = driver_with(registry, provider, QueryFlowConfig::default());
    let state = AgentState::new("High severity alerts for Engineering users", HashMap::new());
    let final_state = driver.run(state, None, &CancelToken::never()).await;

    assert_eq!(final_state.rest_results.len(), 1);
    assert_eq!(final_state.sql_results.len(), 1);
    assert!(final_state.errors.is_empty());

    let plan = final_state.plan.as_ref().unwrap();
    assert_eq!(plan.steps.len(), 2);
    assert!(plan.requires_consolidation);
    plan.validate().unwrap();

    let final_response = final_state.final_response.as_deref().unwrap();
    assert!(final_response.contains("U7"));
    assert!(final_response.contains("A9"));
    assert!(final_response.contains('|'), "expected markdown table");
}

#[tokio::test]
async fn partial_failure_still_completes_with_a_note() {
    let users = StaticTool::new(json!([{ "user_id": "U7", "dept": "Eng" }]));
    let mut registry = ToolRegistry::new();
    registry.register(users_descriptor(), users).await.unwrap();
    registry
        .register(alerts_by_user_descriptor(), Arc::new(BrokenTool))
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text(analysis(&["REST_API", "RELATIONAL_DB"], true));
    provider.push_tool_call("list_users", json!({ "department": "Engineering" }));
    provider.push_tool_call("alerts_by_user", json!({ "user_id": "U7" }));
    // Nothing queued for the consolidator: it falls back deterministically.

    let driver = driver_with(registry, provider, QueryFlowConfig::default());
    let state = AgentState::new("alerts for engineering users", HashMap::new());
    let final_state = driver.run(state, None, &CancelToken::never()).await;

    // Step 2 failed but was recorded, and the run still produced an answer.
    assert_eq!(final_state.errors.len(), 1);
    assert_eq!(final_state.errors[0].step_number, 2);
    assert_eq!(final_state.errors[0].kind, ErrorKind::UpstreamError);

    let final_response = final_state.final_response.as_deref().unwrap();
    assert!(final_response.contains("U7"), "partial data should appear");
    assert!(final_response.contains("partial results"));
    // The raw backend message is never shown to the user.
    assert!(!final_response.contains("502"));
}

#[tokio::test]
async fn node_timeout_converts_to_a_failed_result() {
    let mut registry = ToolRegistry::new();
    registry
        .register(alerts_descriptor(), Arc::new(SlowTool))
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text(analysis(&["REST_API"], false));
    // No selection response queued: the agent binds arguments locally and
    // goes straight to the (slow) tool.

    let config = QueryFlowConfig {
        node_timeout: Duration::from_millis(100),
        ..QueryFlowConfig::default()
    };
    let driver = driver_with(registry, provider, config);

    let started = std::time::Instant::now();
    let state = AgentState::new("show open alerts", HashMap::new());
    let final_state = driver.run(state, None, &CancelToken::never()).await;
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "timeout must not hang the run"
    );

    let result = &final_state.rest_results[0];
    assert!(!result.ok);
    assert_eq!(result.error, Some(ErrorKind::Timeout));
    assert!(final_state
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::Timeout));
    // The run still terminates with an answer (a no-results note).
    assert!(final_state.final_response.is_some());
}

#[tokio::test]
async fn iteration_cap_terminates_with_incomplete() {
    let tool = StaticTool::new(json!([{ "alert_id": "A1" }]));
    let mut registry = ToolRegistry::new();
    registry.register(alerts_descriptor(), tool).await.unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    // Five single-source steps; the cap below only allows three visits.
    provider.push_text(analysis(
        &["REST_API", "REST_API", "REST_API", "REST_API", "REST_API"],
        true,
    ));

    let config = QueryFlowConfig {
        max_iterations: 3,
        ..QueryFlowConfig::default()
    };
    let driver = driver_with(registry, provider, config);
    let state = AgentState::new("open alerts", HashMap::new());
    let final_state = driver.run(state, None, &CancelToken::never()).await;

    assert!(final_state
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::Internal && e.message.contains("incomplete")));
    // The cap fired before the plan could finish, but the run terminated
    // and consolidated what it had.
    assert!(final_state.result_count() < 5);
    assert!(final_state.final_response.is_some());
}

#[tokio::test]
async fn empty_catalogue_produces_no_agent_work() {
    let registry = ToolRegistry::new();
    let provider = Arc::new(ScriptedProvider::new());
    let driver = driver_with(registry, provider, QueryFlowConfig::default());

    let state = AgentState::new("anything at all", HashMap::new());
    let final_state = driver.run(state, None, &CancelToken::never()).await;

    assert_eq!(final_state.result_count(), 0);
    assert!(final_state.plan.as_ref().unwrap().is_empty());
    assert!(final_state
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::PlanError));
    // No consolidation ran, so there is no final response; the session
    // layer turns this into a terminal error frame.
    assert!(final_state.final_response.is_none());
    assert!(!final_state.should_continue);
}

#[tokio::test]
async fn event_handler_observes_the_run_lifecycle() {
    use queryflow::queryflow::event::{EventHandler, WorkflowEvent};

    struct Recorder {
        events: Mutex<Vec<WorkflowEvent>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn on_workflow_event(&self, event: &WorkflowEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    let tool = StaticTool::new(json!([{ "alert_id": "A1" }]));
    let mut registry = ToolRegistry::new();
    registry.register(alerts_descriptor(), tool).await.unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text(analysis(&["REST_API"], false));
    provider.push_tool_call("list_alerts", json!({ "status": "open" }));

    let recorder = Arc::new(Recorder {
        events: Mutex::new(Vec::new()),
    });
    let driver = driver_with(registry, provider, QueryFlowConfig::default())
        .with_event_handler(recorder.clone());

    let state = AgentState::new("Show me all open alerts", HashMap::new());
    driver.run(state, None, &CancelToken::never()).await;

    let events = recorder.events.lock().unwrap();
    assert!(matches!(events.first(), Some(WorkflowEvent::RunStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(WorkflowEvent::RunCompleted { ok: true, .. })
    ));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::PlanCreated { steps: 1, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::StepCompleted { ok: true, .. })));
}

#[tokio::test]
async fn result_sequences_and_cursor_grow_monotonically() {
    let users = StaticTool::new(json!([{ "user_id": "U7" }]));
    let alerts = StaticTool::new(json!([{ "alert_id": "A9", "user_id": "U7" }]));
    let mut registry = ToolRegistry::new();
    registry.register(users_descriptor(), users).await.unwrap();
    registry
        .register(alerts_by_user_descriptor(), alerts)
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text(analysis(&["REST_API", "RELATIONAL_DB"], true));
    provider.push_tool_call("list_users", json!({}));
    provider.push_tool_call("alerts_by_user", json!({ "user_id": "U7" }));

    let driver = driver_with(registry, provider, QueryFlowConfig::default());
    let state = AgentState::new("alerts for engineering users", HashMap::new());
    let final_state = driver.run(state, None, &CancelToken::never()).await;

    // Two steps executed once each, cursor beyond the last step.
    assert_eq!(final_state.rest_results.len(), 1);
    assert_eq!(final_state.sql_results.len(), 1);
    assert_eq!(final_state.current_step_index, 2);
    for step_number in [1usize, 2usize].iter() {
        assert_eq!(
            final_state
                .all_results()
                .filter(|r| r.step_number == *step_number)
                .count(),
            1
        );
    }
}
