//! Execution planning: from a query to a dependency-ordered plan.
//!
//! The planner turns `(query, context, tool catalogue)` into a [`Plan`] in
//! four phases:
//!
//! 1. **Analyze** — ask the completion gateway to classify the query
//!    (intent, entities, required sources) as a JSON document.
//! 2. **Fall back** — when the gateway is unavailable or its answer does
//!    not parse, produce the same document from keyword rules.
//! 3. **Generate** — one step per required source; steps over multiple
//!    sources are chained when the request carries a shared identifier.
//! 4. **Validate** — reject malformed dependency graphs, falling back to a
//!    single step against the best-ranked tool.
//!
//! The only unrecoverable failure is an empty catalogue: with no tools at
//! all there is nothing to plan against.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::{GatewayError, PlannerError};
use crate::queryflow::gateway::{ChatMessage, LlmGateway};
use crate::queryflow::hints::{contains_identifier, extract_parameter_hints};
use crate::queryflow::plan::{Complexity, DataSourceClass, Plan, Step};
use crate::queryflow::registry::ToolRegistry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Nouns suggesting the user is talking about a relational store.
const DB_NOUNS: &[&str] = &["database", "table", "tables", "sql", "rows", "records", "query"];

/// Nouns suggesting the user is talking about a REST service.
const REST_NOUNS: &[&str] = &["api", "service", "endpoint", "rest", "http"];

/// Nouns suggesting the user is talking about a SOAP service.
const SOAP_NOUNS: &[&str] = &["soap", "wsdl"];

/// Verbs marking a read-style request.
const READ_VERBS: &[&str] = &["list", "show", "find", "search", "get", "display"];

/// The intermediate analysis document, whether produced by the model or by
/// the keyword rules.
#[derive(Debug, Clone)]
pub(crate) struct QueryAnalysis {
    pub intent: String,
    pub entities: Vec<String>,
    pub required_sources: Vec<DataSourceClass>,
    pub requires_consolidation: bool,
    pub estimated_complexity: Option<Complexity>,
    pub notes: HashMap<String, String>,
}

/// The planner. Stateless apart from its gateway handle, so one instance
/// serves every session.
pub struct ExecutionPlanner {
    gateway: Arc<LlmGateway>,
}

impl ExecutionPlanner {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Produce a plan for the query against the given catalogue.
    pub async fn plan(
        &self,
        query: &str,
        context: &HashMap<String, Value>,
        registry: &ToolRegistry,
        cancel: &CancelToken,
    ) -> Result<Plan, PlannerError> {
        if registry.is_empty() {
            return Err(PlannerError::EmptyCatalogue);
        }

        let analysis = match self.analyze(query, context, registry, cancel).await {
            Ok(analysis) => analysis,
            Err(PlannerError::EmptyCatalogue) => return Err(PlannerError::EmptyCatalogue),
            Err(err) => {
                log::info!("planner analysis fell back to keyword rules: {}", err);
                heuristic_analysis(query)
            }
        };

        let mut sources = analysis.required_sources.clone();
        if sources.is_empty() {
            // Nothing recognizable in the analysis; aim the plan at the
            // class of the best-ranked tool for the whole query.
            sources = vec![self.top_ranked_class(query, registry).await];
        }

        let chain = contains_identifier(query)
            || analysis.entities.iter().any(|e| contains_identifier(e));
        let hints = extract_parameter_hints(query);

        let mut steps = Vec::with_capacity(sources.len());
        for (index, class) in sources.iter().enumerate() {
            let mut step = Step::new(
                index + 1,
                format!("{} from {}", analysis.intent, class),
                *class,
            );
            step.parameter_hints = hints.clone();
            if chain && index > 0 {
                step.depends_on.insert(index);
            }
            steps.push(step);
        }

        let mut plan = Plan::new(query, steps);
        plan.requires_consolidation =
            plan.steps.len() > 1 || analysis.requires_consolidation;
        if let Some(complexity) = analysis.estimated_complexity {
            plan.estimated_complexity = complexity;
        }
        plan.notes = analysis.notes;

        if let Err(defect) = plan.validate() {
            log::warn!("generated plan is malformed ({}), using single-step fallback", defect);
            return Ok(self.single_step_fallback(query, registry).await);
        }

        log::info!(
            "plan {}: {} step(s), sources {:?}, consolidation={}",
            plan.plan_id,
            plan.steps.len(),
            plan.steps
                .iter()
                .map(|s| s.data_source_class)
                .collect::<Vec<_>>(),
            plan.requires_consolidation
        );
        Ok(plan)
    }

    /// Ask the gateway to classify the query; parse its JSON answer.
    async fn analyze(
        &self,
        query: &str,
        context: &HashMap<String, Value>,
        registry: &ToolRegistry,
        cancel: &CancelToken,
    ) -> Result<QueryAnalysis, PlannerError> {
        let catalogue = compact_catalogue(registry);

        let mut prompt = String::new();
        prompt.push_str("Analyze this data request and respond with a single JSON object with ");
        prompt.push_str("fields: intent (string), entities (array of strings), required_sources ");
        prompt.push_str("(array, each one of RELATIONAL_DB | REST_API | SOAP_API), ");
        prompt.push_str("requires_consolidation (boolean), estimated_complexity ");
        prompt.push_str("(low | med | high), notes (object of strings).\n\n");
        prompt.push_str("Request: ");
        prompt.push_str(query);
        prompt.push('\n');
        if !context.is_empty() {
            prompt.push_str("\nContext:\n");
            for (key, value) in context {
                prompt.push_str(&format!("- {}: {}\n", key, value));
            }
        }
        prompt.push_str("\nAvailable tools:\n");
        prompt.push_str(&catalogue);

        let messages = [
            ChatMessage::system(
                "You analyze natural-language data requests and decide which backend \
                 families are needed to answer them. Respond with JSON only.",
            ),
            ChatMessage::user(&prompt),
        ];

        let completion = self
            .gateway
            .complete(&messages, None, cancel)
            .await
            .map_err(|err| match err {
                GatewayError::InvalidResponse(msg) => PlannerError::ParseFailed(msg),
                other => PlannerError::LlmUnavailable(other.to_string()),
            })?;

        parse_analysis(&completion.text)
    }

    /// The backend class of the best-ranked tool for the query.
    async fn top_ranked_class(&self, query: &str, registry: &ToolRegistry) -> DataSourceClass {
        let ranked = registry.rank(query, None).await;
        match ranked.first() {
            Some((descriptor, _)) => descriptor.data_source_class,
            // All candidates scored below the cutoff; fall back to the
            // first registered tool so the run still has somewhere to go.
            None => registry
                .list_all()
                .first()
                .map(|d| d.data_source_class)
                .unwrap_or(DataSourceClass::RestApi),
        }
    }

    /// A one-step plan against the best-ranked tool's class.
    async fn single_step_fallback(&self, query: &str, registry: &ToolRegistry) -> Plan {
        let class = self.top_ranked_class(query, registry).await;
        let mut step = Step::new(1, query, class);
        step.parameter_hints = extract_parameter_hints(query);
        Plan::new(query, vec![step])
    }
}

/// One line per tool: name, class, and the first sentence of the
/// description. Kept compact so large catalogues stay within prompt budget.
fn compact_catalogue(registry: &ToolRegistry) -> String {
    let mut out = String::new();
    for descriptor in registry.list_all() {
        let first_line = descriptor
            .description
            .split(|c| c == '\n' || c == '.')
            .next()
            .unwrap_or("")
            .trim();
        out.push_str(&format!(
            "- {} ({}): {}\n",
            descriptor.name, descriptor.data_source_class, first_line
        ));
    }
    out
}

/// Keyword-rule analysis used when the model cannot help.
pub(crate) fn heuristic_analysis(query: &str) -> QueryAnalysis {
    let lowered = query.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let has_id = contains_identifier(query);
    let intent = if READ_VERBS.iter().any(|v| words.contains(v)) {
        "read".to_string()
    } else if has_id {
        "lookup".to_string()
    } else {
        "read".to_string()
    };

    let mut entities: Vec<String> = Vec::new();
    if has_id {
        for hint in extract_parameter_hints(query).values() {
            if let Value::String(s) = hint {
                entities.push(s.clone());
            }
        }
    }

    let mentions_db = DB_NOUNS.iter().any(|n| words.contains(n));
    let mentions_rest = REST_NOUNS.iter().any(|n| words.contains(n));
    let mentions_soap = SOAP_NOUNS.iter().any(|n| words.contains(n));

    let mut required_sources = Vec::new();
    if mentions_rest {
        required_sources.push(DataSourceClass::RestApi);
    }
    if mentions_db {
        required_sources.push(DataSourceClass::RelationalDb);
    }
    if mentions_soap {
        required_sources.push(DataSourceClass::SoapApi);
    }

    QueryAnalysis {
        intent,
        entities,
        requires_consolidation: required_sources.len() > 1,
        required_sources,
        estimated_complexity: None,
        notes: HashMap::new(),
    }
}

/// Parse the model's analysis text into a [`QueryAnalysis`]. Lenient about
/// surrounding prose: the first `{` to the last `}` is treated as the
/// document.
pub(crate) fn parse_analysis(text: &str) -> Result<QueryAnalysis, PlannerError> {
    let start = text
        .find('{')
        .ok_or_else(|| PlannerError::ParseFailed("no JSON object in analysis".to_string()))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| PlannerError::ParseFailed("unterminated JSON object".to_string()))?;
    if end < start {
        return Err(PlannerError::ParseFailed("malformed JSON bounds".to_string()));
    }

    let value: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| PlannerError::ParseFailed(e.to_string()))?;

    let intent = value
        .get("intent")
        .and_then(Value::as_str)
        .unwrap_or("read")
        .to_string();

    let entities = value
        .get("entities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let required_sources = value
        .get("required_sources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(parse_source_name)
                .collect()
        })
        .unwrap_or_default();

    let requires_consolidation = value
        .get("requires_consolidation")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let estimated_complexity = value
        .get("estimated_complexity")
        .and_then(Value::as_str)
        .and_then(|s| match s.to_lowercase().as_str() {
            "low" => Some(Complexity::Low),
            "med" | "medium" => Some(Complexity::Medium),
            "high" => Some(Complexity::High),
            _ => None,
        });

    let notes = match value.get("notes") {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
        Some(Value::String(s)) => {
            let mut map = HashMap::new();
            map.insert("note".to_string(), s.clone());
            map
        }
        _ => HashMap::new(),
    };

    Ok(QueryAnalysis {
        intent,
        entities,
        required_sources,
        requires_consolidation,
        estimated_complexity,
        notes,
    })
}

/// Map a model-supplied source name onto a backend class. Lenient about
/// casing and synonyms.
fn parse_source_name(name: &str) -> Option<DataSourceClass> {
    let lowered = name.to_lowercase();
    if lowered.contains("sql") || lowered.contains("relational") || lowered.contains("db")
        || lowered.contains("database")
    {
        Some(DataSourceClass::RelationalDb)
    } else if lowered.contains("rest") || lowered.contains("http") {
        Some(DataSourceClass::RestApi)
    } else if lowered.contains("soap") {
        Some(DataSourceClass::SoapApi)
    } else {
        None
    }
}
