//! The consolidator node: merge heterogeneous results, format the answer.
//!
//! Results arrive as per-step row sets from up to three agent families.
//! Consolidation happens in three stages:
//!
//! 1. **Strategy detection** — if every contributing result shares an
//!    ID-like column (`id`, `*_id`, `*_key`, `*_no`, `*_number`, or a name
//!    containing `uuid`/`guid`), rows are joined on that column with
//!    outer-join semantics; otherwise they are concatenated with a
//!    provenance tag per row.
//! 2. **Deduplication** — identical rows collapse, first occurrence wins.
//! 3. **Formatting** — the model is asked for a user-facing answer; when it
//!    is unavailable, when the merged set exceeds the configured row cap,
//!    or when the answer comes back empty, a deterministic formatter picks
//!    among text, JSON, table, markdown, and summary shapes. An explicit
//!    `format` note on the plan overrides the choice.
//!
//! Failed steps never block consolidation; they surface as a short
//! partial-results note with kind-level descriptions only — raw backend
//! errors are never repeated to the user.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::gateway::{ChatMessage, LlmGateway};
use crate::queryflow::state::{AgentResult, AgentState, StepError};
use crate::queryflow::tool::Row;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// How the contributing results were combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Rows were bucketed and merged on this shared ID-like column.
    Join(String),
    /// Rows were concatenated, each tagged with its source.
    Concat,
}

/// The deterministic output shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
    Markdown,
    Summary,
}

impl OutputFormat {
    /// Parse a plan-note hint. Unrecognized hints are ignored.
    pub fn from_hint(hint: &str) -> Option<OutputFormat> {
        match hint.to_lowercase().as_str() {
            "text" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            "table" => Some(OutputFormat::Table),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

pub struct Consolidator {
    gateway: Arc<LlmGateway>,
    llm_row_cap: usize,
}

impl Consolidator {
    pub fn new(gateway: Arc<LlmGateway>, llm_row_cap: usize) -> Self {
        Self {
            gateway,
            llm_row_cap,
        }
    }

    /// Produce the final response for the run and store it on the state.
    pub async fn run(&self, state: &mut AgentState, cancel: &CancelToken) {
        let requires_consolidation = state
            .plan
            .as_ref()
            .map(|p| p.requires_consolidation)
            .unwrap_or(false);
        let format_hint = state
            .plan
            .as_ref()
            .and_then(|p| p.notes.get("format"))
            .and_then(|hint| OutputFormat::from_hint(hint));

        let mut contributions: Vec<&AgentResult> = state
            .all_results()
            .filter(|r| r.ok && !r.rows.is_empty())
            .collect();
        contributions.sort_by_key(|r| r.step_number);

        let note = failure_note(&state.errors);

        // Single-result shortcut: nothing to merge, format deterministically.
        if !requires_consolidation && contributions.len() <= 1 {
            let rows: Vec<Row> = contributions
                .first()
                .map(|r| r.rows.clone())
                .unwrap_or_default();
            let text = deterministic_format(&state.query, &rows, format_hint);
            state.set_final(attach_note(text, &note));
            return;
        }

        let (merged, strategy) = merge_results(&contributions);
        let merged = dedup_rows(merged);

        let text = if merged.len() > self.llm_row_cap {
            log::info!(
                "merged set has {} rows (cap {}), using deterministic formatting",
                merged.len(),
                self.llm_row_cap
            );
            deterministic_format(&state.query, &merged, format_hint)
        } else {
            match self
                .format_with_llm(&state.query, &merged, &strategy, cancel)
                .await
            {
                Some(text) => text,
                None => deterministic_format(&state.query, &merged, format_hint),
            }
        };

        state.set_final(attach_note(text, &note));
    }

    /// Ask the model for a user-facing answer. `None` means the caller
    /// should fall back to deterministic formatting.
    async fn format_with_llm(
        &self,
        query: &str,
        rows: &[Row],
        strategy: &MergeStrategy,
        cancel: &CancelToken,
    ) -> Option<String> {
        let strategy_text = match strategy {
            MergeStrategy::Join(column) => format!("rows joined on '{}'", column),
            MergeStrategy::Concat => "rows concatenated with per-row sources".to_string(),
        };
        let rows_json = serde_json::to_string(
            &Value::Array(rows.iter().cloned().map(Value::Object).collect()),
        )
        .ok()?;

        let prompt = format!(
            "Question: {}\nMerge strategy: {}\nData rows (JSON): {}\n\n\
             Write a concise, user-facing answer to the question based only on the data rows. \
             Prefer a markdown table when several rows are shown.",
            query, strategy_text, rows_json
        );
        let messages = [
            ChatMessage::system(
                "You turn retrieved data rows into a clear answer for a business user. \
                 Never invent values that are not in the rows.",
            ),
            ChatMessage::user(&prompt),
        ];

        match self.gateway.complete(&messages, None, cancel).await {
            Ok(completion) if !completion.text.trim().is_empty() => Some(completion.text),
            Ok(_) => None,
            Err(err) => {
                log::info!("LLM formatting unavailable, falling back: {}", err);
                None
            }
        }
    }
}

/// Whether a column name should be treated as an entity identifier.
pub fn is_id_like(name: &str) -> bool {
    let lowered = name.to_lowercase();
    lowered == "id"
        || lowered.ends_with("_id")
        || lowered.ends_with("_key")
        || lowered.ends_with("_no")
        || lowered.ends_with("_number")
        || lowered.contains("uuid")
        || lowered.contains("guid")
}

/// Find the join column shared by every contribution: the lexicographically
/// first ID-like column present in each result's first row.
pub fn detect_join_column(results: &[&AgentResult]) -> Option<String> {
    if results.len() < 2 {
        return None;
    }
    let mut shared: Option<BTreeSet<String>> = None;
    for result in results {
        let first_row = result.rows.first()?;
        let columns: BTreeSet<String> = first_row.keys().cloned().collect();
        shared = Some(match shared {
            Some(existing) => existing.intersection(&columns).cloned().collect(),
            None => columns,
        });
    }
    // BTreeSet iterates in lexicographic order, so the first match is the
    // tie-break winner.
    shared?.into_iter().find(|name| is_id_like(name))
}

/// Merge the contributions: join when a shared ID-like column exists,
/// concatenate with provenance otherwise.
pub fn merge_results(results: &[&AgentResult]) -> (Vec<Row>, MergeStrategy) {
    match detect_join_column(results) {
        Some(column) => {
            let rows = join_rows(results, &column);
            (rows, MergeStrategy::Join(column))
        }
        None => (concat_rows(results), MergeStrategy::Concat),
    }
}

/// Bucket rows from all sources by the join column and merge each bucket by
/// keyed union. Earlier sources win field conflicts; a later conflicting
/// value is preserved under `<field>__<source_tag>`. Rows appearing in only
/// some sources are retained (outer-join semantics), and every output row
/// carries a `_sources` list of contributing tags.
pub fn join_rows(results: &[&AgentResult], column: &str) -> Vec<Row> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, Row> = HashMap::new();

    for result in results {
        for row in &result.rows {
            let key = match row.get(column) {
                Some(value) => scalar_key(value),
                // No join value: keep the row as its own bucket.
                None => format!("__unkeyed_{}_{}", result.tool_name, order.len()),
            };
            let bucket = buckets.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                Row::new()
            });
            merge_into_bucket(bucket, row, &result.tool_name);
        }
    }

    order
        .into_iter()
        .filter_map(|key| buckets.remove(&key))
        .collect()
}

/// Keyed-union merge of one row into a bucket.
fn merge_into_bucket(bucket: &mut Row, row: &Row, source_tag: &str) {
    for (field, value) in row {
        match bucket.get(field) {
            None => {
                bucket.insert(field.clone(), value.clone());
            }
            Some(existing) if existing.is_null() => {
                bucket.insert(field.clone(), value.clone());
            }
            Some(existing) if existing == value || value.is_null() => {}
            Some(_) => {
                bucket.insert(format!("{}__{}", field, source_tag), value.clone());
            }
        }
    }

    let sources = bucket
        .entry("_sources".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(tags) = sources {
        let tag = Value::String(source_tag.to_string());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
}

/// Disjoint union of all rows, each tagged with its origin.
pub fn concat_rows(results: &[&AgentResult]) -> Vec<Row> {
    let mut rows = Vec::new();
    for result in results {
        for row in &result.rows {
            let mut tagged = row.clone();
            tagged.insert(
                "_source".to_string(),
                Value::String(result.tool_name.clone()),
            );
            rows.push(tagged);
        }
    }
    rows
}

/// Drop exact-duplicate rows, preserving the first occurrence.
pub fn dedup_rows(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        // Map keys iterate sorted, so serialization is canonical.
        let fingerprint = Value::Object(row.clone()).to_string();
        if seen.insert(fingerprint) {
            out.push(row);
        }
    }
    out
}

/// Deterministic formatting: the same rows always produce the same text.
///
/// Shape selection (overridden by `hint`): no rows → a short no-results
/// line; one row → `key: value` lines; up to twenty rows → a markdown
/// table; more → a summary of totals, per-source counts, and field names.
pub fn deterministic_format(query: &str, rows: &[Row], hint: Option<OutputFormat>) -> String {
    let format = hint.unwrap_or(match rows.len() {
        0 | 1 => OutputFormat::Text,
        2..=20 => OutputFormat::Markdown,
        _ => OutputFormat::Summary,
    });

    match format {
        OutputFormat::Text => format_text(query, rows),
        OutputFormat::Json => format_json(rows),
        OutputFormat::Table => format_table(rows),
        OutputFormat::Markdown => format_markdown(rows),
        OutputFormat::Summary => format_summary(rows),
    }
}

fn format_text(query: &str, rows: &[Row]) -> String {
    if rows.is_empty() {
        return format!("No results were found for \"{}\".", query);
    }
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|(key, value)| format!("{}: {}", key, cell(value)))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_json(rows: &[Row]) -> String {
    serde_json::to_string_pretty(&Value::Array(
        rows.iter().cloned().map(Value::Object).collect(),
    ))
    .unwrap_or_else(|_| "[]".to_string())
}

/// Union of column names across rows, sorted for stable output.
fn columns_of(rows: &[Row]) -> Vec<String> {
    let mut columns = BTreeSet::new();
    for row in rows {
        for key in row.keys() {
            columns.insert(key.clone());
        }
    }
    columns.into_iter().collect()
}

fn format_markdown(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No results.".to_string();
    }
    let columns = columns_of(rows);
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", columns.join(" | ")));
    out.push_str(&format!(
        "|{}\n",
        columns.iter().map(|_| " --- |").collect::<String>()
    ));
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| row.get(column).map(cell).unwrap_or_default())
            .collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

fn format_table(rows: &[Row]) -> String {
    if rows.is_empty() {
        return "No results.".to_string();
    }
    let columns = columns_of(rows);
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    let text = row.get(column).map(cell).unwrap_or_default();
                    widths[i] = widths[i].max(text.len());
                    text
                })
                .collect()
        })
        .collect();

    let mut out = String::new();
    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
        .collect();
    out.push_str(&header.join("  "));
    out.push('\n');
    out.push_str(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    out.push('\n');
    for cells in rendered {
        let line: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect();
        out.push_str(&line.join("  "));
        out.push('\n');
    }
    out
}

fn format_summary(rows: &[Row]) -> String {
    let mut per_source: HashMap<String, usize> = HashMap::new();
    for row in rows {
        match (row.get("_sources"), row.get("_source")) {
            (Some(Value::Array(tags)), _) => {
                for tag in tags.iter().filter_map(Value::as_str) {
                    *per_source.entry(tag.to_string()).or_insert(0) += 1;
                }
            }
            (_, Some(Value::String(tag))) => {
                *per_source.entry(tag.clone()).or_insert(0) += 1;
            }
            _ => {}
        }
    }

    let fields: Vec<String> = columns_of(rows)
        .into_iter()
        .filter(|c| !c.starts_with('_'))
        .collect();

    let mut out = format!("{} rows total.", rows.len());
    if !per_source.is_empty() {
        let mut sources: Vec<(String, usize)> = per_source.into_iter().collect();
        sources.sort();
        let listed: Vec<String> = sources
            .iter()
            .map(|(tag, count)| format!("{} ({})", tag, count))
            .collect();
        out.push_str(&format!("\nSources: {}.", listed.join(", ")));
    }
    if !fields.is_empty() {
        out.push_str(&format!("\nFields: {}.", fields.join(", ")));
    }
    out
}

/// Render a JSON value as a table/text cell.
fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical string key for a join value.
fn scalar_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Kind-level description of recorded failures, safe to show a user.
fn failure_note(errors: &[StepError]) -> Option<String> {
    if errors.is_empty() {
        return None;
    }
    let kinds: Vec<String> = errors.iter().map(|e| e.kind.to_string()).collect();
    Some(format!(
        "Note: partial results — {} step(s) did not complete ({}).",
        errors.len(),
        kinds.join(", ")
    ))
}

fn attach_note(text: String, note: &Option<String>) -> String {
    match note {
        Some(note) => format!("{}\n\n{}", text, note),
        None => text,
    }
}
