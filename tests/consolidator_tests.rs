use queryflow::queryflow::cancel::CancelToken;
use queryflow::queryflow::consolidator::{deterministic_format, Consolidator, OutputFormat};
use queryflow::queryflow::providers::ScriptedProvider;
use queryflow::queryflow::state::AgentResult;
use queryflow::queryflow::tool::Row;
use queryflow::{AgentState, AgentType, DataSourceClass, LlmGateway, Plan, Step};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn row(pairs: &[(&str, Value)]) -> Row {
    let mut row = Row::new();
    for (key, value) in pairs {
        row.insert((*key).to_string(), value.clone());
    }
    row
}

fn many_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| row(&[("item_id", json!(format!("I{}", i))), ("value", json!(i))]))
        .collect()
}

fn consolidator(provider: &Arc<ScriptedProvider>, row_cap: usize) -> Consolidator {
    Consolidator::new(Arc::new(LlmGateway::new(provider.clone())), row_cap)
}

/// State with one plan whose consolidation flag and notes are adjustable.
fn state_with(
    query: &str,
    requires_consolidation: bool,
    notes: &[(&str, &str)],
    results: Vec<AgentResult>,
) -> AgentState {
    let mut state = AgentState::new(query, HashMap::new());
    let mut plan = Plan::new(
        query,
        vec![Step::new(1, query, DataSourceClass::RestApi)],
    );
    plan.requires_consolidation = requires_consolidation;
    for (key, value) in notes {
        plan.notes.insert((*key).to_string(), (*value).to_string());
    }
    state.set_plan(plan);
    for result in results {
        state.append_result(result);
    }
    state
}

#[tokio::test]
async fn llm_formatting_is_used_when_available() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text("Two alerts are currently open: A1 and A2.");

    let results = vec![AgentResult::success(
        1,
        AgentType::Rest,
        "list_alerts",
        vec![row(&[("alert_id", json!("A1"))]), row(&[("alert_id", json!("A2"))])],
        3,
    )];
    let mut state = state_with("open alerts", true, &[], results);

    consolidator(&provider, 500)
        .run(&mut state, &CancelToken::never())
        .await;

    assert_eq!(
        state.final_response.as_deref(),
        Some("Two alerts are currently open: A1 and A2.")
    );
}

#[tokio::test]
async fn row_cap_skips_the_llm() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text("this should never be consumed");

    let results = vec![AgentResult::success(
        1,
        AgentType::Rest,
        "bulk_export",
        many_rows(25),
        3,
    )];
    let mut state = state_with("export everything", true, &[], results);

    consolidator(&provider, 10)
        .run(&mut state, &CancelToken::never())
        .await;

    // The scripted reply was never consumed and the deterministic summary
    // shape was chosen (> 20 rows).
    assert_eq!(provider.remaining(), 1);
    let text = state.final_response.as_deref().unwrap();
    assert!(text.contains("25 rows total."));
    assert!(text.contains("bulk_export"));
}

#[tokio::test]
async fn format_hint_from_plan_notes_overrides() {
    let provider = Arc::new(ScriptedProvider::new());
    let results = vec![AgentResult::success(
        1,
        AgentType::Rest,
        "list_alerts",
        vec![row(&[("alert_id", json!("A1"))]), row(&[("alert_id", json!("A2"))])],
        3,
    )];
    // Unavailable gateway + an explicit json hint.
    let mut state = state_with("open alerts", true, &[("format", "json")], results);

    consolidator(&provider, 500)
        .run(&mut state, &CancelToken::never())
        .await;

    let text = state.final_response.as_deref().unwrap();
    assert!(text.trim_start().starts_with('['), "expected JSON output: {}", text);
    assert!(text.contains("A1"));
}

#[tokio::test]
async fn join_provenance_survives_to_the_final_text() {
    let provider = Arc::new(ScriptedProvider::new());
    let results = vec![
        AgentResult::success(
            1,
            AgentType::Rest,
            "list_users",
            vec![row(&[("user_id", json!("U7")), ("dept", json!("Eng"))])],
            2,
        ),
        AgentResult::success(
            2,
            AgentType::Sql,
            "alerts_by_user",
            vec![row(&[("user_id", json!("U7")), ("alert_id", json!("A9"))])],
            2,
        ),
    ];
    let mut state = state_with("alerts for engineering", true, &[], results);

    consolidator(&provider, 500)
        .run(&mut state, &CancelToken::never())
        .await;

    let text = state.final_response.as_deref().unwrap();
    // One merged row, so the deterministic text shape lists fields,
    // including the contributing sources.
    assert!(text.contains("U7"));
    assert!(text.contains("A9"));
    assert!(text.contains("list_users"));
    assert!(text.contains("alerts_by_user"));
}

#[tokio::test]
async fn deterministic_consolidation_is_repeatable() {
    let build = || {
        vec![
            AgentResult::success(
                1,
                AgentType::Rest,
                "list_users",
                vec![row(&[("user_id", json!("U7")), ("dept", json!("Eng"))])],
                2,
            ),
            AgentResult::success(
                2,
                AgentType::Sql,
                "alerts_by_user",
                vec![row(&[("user_id", json!("U7")), ("severity", json!("high"))])],
                2,
            ),
        ]
    };

    let provider = Arc::new(ScriptedProvider::new());
    let mut first = state_with("alerts", true, &[], build());
    let mut second = state_with("alerts", true, &[], build());

    let node = consolidator(&provider, 500);
    node.run(&mut first, &CancelToken::never()).await;
    node.run(&mut second, &CancelToken::never()).await;

    assert_eq!(first.final_response, second.final_response);
}

#[tokio::test]
async fn empty_results_produce_a_no_results_answer() {
    let provider = Arc::new(ScriptedProvider::new());
    let mut state = state_with("find unicorns", false, &[], Vec::new());

    consolidator(&provider, 500)
        .run(&mut state, &CancelToken::never())
        .await;

    let text = state.final_response.as_deref().unwrap();
    assert!(text.contains("No results"));
}

#[test]
fn summary_hint_matches_the_free_function() {
    let rows = many_rows(3);
    let from_hint = deterministic_format("q", &rows, Some(OutputFormat::Summary));
    assert!(from_hint.contains("3 rows total."));
}
