//! Tool registry: semantically indexed descriptors of backend capabilities.
//!
//! The registry holds every [`ToolDescriptor`] the deployment knows about,
//! paired with the [`Tool`] that executes it. Its main job is answering
//! "which tools could satisfy this text?" — [`ToolRegistry::rank`] scores
//! every descriptor against a free-text query and returns an ordered
//! candidate list, optionally filtered to one backend class.
//!
//! Ranking uses cosine similarity over description embeddings when an
//! [`Embedder`] is configured, and falls back to a deterministic
//! token-overlap score when one is not (or when embedding fails at call
//! time). Ties break by descriptor priority, then name. Scores below 0.10
//! are dropped.
//!
//! Registration happens once at startup, before any workflow runs; read
//! paths take `&self` and have no side effects, so the registry can be
//! shared behind an `Arc` across concurrent sessions.
//!
//! # Example
//!
//! ```rust,no_run
//! use queryflow::queryflow::registry::{ParameterSpec, SemanticType, ToolRegistry};
//! use queryflow::{DataSourceClass, ToolDescriptor};
//! use std::sync::Arc;
//!
//! # async fn example(list_alerts: Arc<dyn queryflow::Tool>) {
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(
//!         ToolDescriptor::new(
//!             "list_alerts",
//!             "List alerts filtered by status. Keywords: alerts, open, closed, incidents.",
//!             DataSourceClass::RestApi,
//!         )
//!         .with_parameter(ParameterSpec::query("status", SemanticType::String)),
//!         list_alerts,
//!     )
//!     .await
//!     .unwrap();
//!
//! let ranked = registry.rank("show me open alerts", None).await;
//! assert_eq!(ranked[0].0.name, "list_alerts");
//! # }
//! ```

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::{RegistryError, ToolError};
use crate::queryflow::plan::DataSourceClass;
use crate::queryflow::tool::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::error::Error;
use std::sync::Arc;

/// Minimum score a candidate must reach to appear in ranking results.
const MIN_SCORE: f32 = 0.10;

/// Where a parameter travels in the backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Path,
    Query,
    Body,
    Header,
    Positional,
}

/// Coarse value type of a parameter, used to build tool-calling schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    String,
    Int,
    Decimal,
    Bool,
    Date,
    Object,
}

impl SemanticType {
    /// JSON Schema `type` string for this semantic type.
    fn schema_type(self) -> &'static str {
        match self {
            SemanticType::String | SemanticType::Date => "string",
            SemanticType::Int => "integer",
            SemanticType::Decimal => "number",
            SemanticType::Bool => "boolean",
            SemanticType::Object => "object",
        }
    }
}

/// One parameter a tool accepts.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub semantic_type: SemanticType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ParameterSpec {
    /// Define a parameter with the given placement and type.
    pub fn new(name: impl Into<String>, kind: ParameterKind, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            kind,
            semantic_type,
            required: false,
            default: None,
            description: None,
        }
    }

    /// Shorthand for a query-string parameter.
    pub fn query(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self::new(name, ParameterKind::Query, semantic_type)
    }

    /// Shorthand for a positional parameter (SQL bind slots, SOAP parts).
    pub fn positional(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self::new(name, ParameterKind::Positional, semantic_type)
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Provide a value used when nothing binds the parameter.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Add a human readable description surfaced in generated schemas.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Coarse verbs describing what a tool can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    Read,
    Write,
    Aggregate,
    LookupById,
    Search,
}

impl Capability {
    /// Infer capabilities from a descriptor's text. Used when the loader
    /// does not declare them explicitly.
    pub fn infer(description: &str) -> BTreeSet<Capability> {
        let text = description.to_lowercase();
        let mut caps = BTreeSet::new();
        if ["list", "show", "get", "fetch", "find", "read", "retrieve"]
            .iter()
            .any(|w| text.contains(w))
        {
            caps.insert(Capability::Read);
        }
        if ["create", "update", "delete", "insert", "write", "set "]
            .iter()
            .any(|w| text.contains(w))
        {
            caps.insert(Capability::Write);
        }
        if ["count", "sum", "average", "aggregate", "total", "group"]
            .iter()
            .any(|w| text.contains(w))
        {
            caps.insert(Capability::Aggregate);
        }
        if text.contains("by id") || text.contains("lookup") {
            caps.insert(Capability::LookupById);
        }
        if text.contains("search") {
            caps.insert(Capability::Search);
        }
        if caps.is_empty() {
            caps.insert(Capability::Read);
        }
        caps
    }
}

/// Immutable metadata describing one backend capability.
///
/// The `description` doubles as the ranking corpus — it should enumerate
/// the words a user might say when they mean this tool. `keywords` extend
/// that corpus without cluttering the prose shown to the model.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Unique identifier across the registry.
    pub name: String,
    /// Free text used for semantic ranking and shown to the model during
    /// tool selection.
    pub description: String,
    /// Extra ranking vocabulary not worth putting in the prose.
    pub keywords: Vec<String>,
    /// Which backend family executes this tool. Fixed at registration.
    pub data_source_class: DataSourceClass,
    /// Ordered parameter schema.
    pub parameters: Vec<ParameterSpec>,
    /// Coarse verbs this tool supports.
    pub capabilities: BTreeSet<Capability>,
    /// Tiebreaker between equally scored candidates; higher wins.
    pub priority: i32,
}

impl ToolDescriptor {
    /// Create a descriptor with capabilities inferred from the description.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        data_source_class: DataSourceClass,
    ) -> Self {
        let description = description.into();
        let capabilities = Capability::infer(&description);
        Self {
            name: name.into(),
            description,
            keywords: Vec::new(),
            data_source_class,
            parameters: Vec::new(),
            capabilities,
            priority: 0,
        }
    }

    /// Append a parameter definition (builder pattern).
    pub fn with_parameter(mut self, param: ParameterSpec) -> Self {
        self.parameters.push(param);
        self
    }

    /// Extend the ranking vocabulary (builder pattern).
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Override the tiebreak priority (builder pattern).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Replace the inferred capabilities (builder pattern).
    pub fn with_capabilities<I>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = Capability>,
    {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    /// The JSON Schema object describing this tool's parameters, in the
    /// shape tool-calling providers expect.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), json!(param.semantic_type.schema_type()));
            if let Some(desc) = &param.description {
                prop.insert("description".into(), json!(desc));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// The text this descriptor is ranked against.
    fn ranking_corpus(&self) -> String {
        let mut corpus = String::new();
        corpus.push_str(&self.description);
        corpus.push(' ');
        corpus.push_str(&self.name);
        for keyword in &self.keywords {
            corpus.push(' ');
            corpus.push_str(keyword);
        }
        corpus
    }
}

/// Text embedding seam used for semantic ranking.
///
/// The registry embeds each descriptor's corpus once at registration and
/// the query text on every `rank` call. Deployments without an embedding
/// service simply omit the embedder and get the token-overlap fallback.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a text into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>>;
}

/// Deterministic feature-hashing embedder.
///
/// Hashes each token into one of a fixed number of buckets and normalizes
/// the resulting histogram. Not a substitute for a learned embedding, but
/// deterministic, dependency-free, and good enough for tests and offline
/// operation.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a; fixed basis keeps the embedding stable across processes.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (hash % self.dimensions as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
    embedding: Option<Vec<f32>>,
}

/// The registry itself. Writes happen at startup; reads are side-effect
/// free and concurrent-safe behind an `Arc`.
pub struct ToolRegistry {
    entries: HashMap<String, RegisteredTool>,
    /// Registration order, kept so identical registrations rank identically.
    order: Vec<String>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl ToolRegistry {
    /// Create a registry using the token-overlap ranking fallback.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            embedder: None,
        }
    }

    /// Create a registry that ranks with the given embedder.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            embedder: Some(embedder),
        }
    }

    /// Register a tool and its descriptor. Embeds the descriptor corpus
    /// eagerly so ranking never mutates the registry.
    pub async fn register(
        &mut self,
        descriptor: ToolDescriptor,
        tool: Arc<dyn Tool>,
    ) -> Result<(), RegistryError> {
        let name = descriptor.name.clone();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&descriptor.ranking_corpus()).await {
                Ok(vector) => Some(vector),
                Err(err) => {
                    log::warn!(
                        "embedding descriptor '{}' failed, tool will rank by token overlap: {}",
                        name,
                        err
                    );
                    None
                }
            },
            None => None,
        };

        log::info!(
            "registered tool '{}' ({}, {} parameters)",
            name,
            descriptor.data_source_class,
            descriptor.parameters.len()
        );
        self.order.push(name.clone());
        self.entries.insert(
            name,
            RegisteredTool {
                descriptor,
                tool,
                embedding,
            },
        );
        Ok(())
    }

    /// Borrow a descriptor by name.
    pub fn get(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| &entry.descriptor)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
    }

    /// Descriptors of one backend class, in registration order.
    pub fn list_by_class(&self, class: DataSourceClass) -> Vec<&ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| &entry.descriptor)
            .filter(|d| d.data_source_class == class)
            .collect()
    }

    /// All descriptors, in registration order.
    pub fn list_all(&self) -> Vec<&ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| &entry.descriptor)
            .collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rank every descriptor (optionally filtered by class) against the
    /// query text. Results are ordered best-first; scores below 0.10 are
    /// dropped; ties break by priority (higher first), then name.
    pub async fn rank(
        &self,
        query_text: &str,
        filter: Option<DataSourceClass>,
    ) -> Vec<(ToolDescriptor, f32)> {
        let query_embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(query_text).await {
                Ok(vector) => Some(vector),
                Err(err) => {
                    log::warn!("query embedding failed, ranking by token overlap: {}", err);
                    None
                }
            },
            None => None,
        };

        let query_tokens = tokenize(query_text);

        let mut scored: Vec<(ToolDescriptor, f32)> = self
            .order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .filter(|entry| {
                filter
                    .map(|class| entry.descriptor.data_source_class == class)
                    .unwrap_or(true)
            })
            .map(|entry| {
                let score = match (&query_embedding, &entry.embedding) {
                    (Some(query), Some(descriptor)) => cosine_similarity(query, descriptor),
                    _ => token_overlap(&query_tokens, &entry.descriptor.ranking_corpus()),
                };
                (entry.descriptor.clone(), score.max(0.0).min(1.0))
            })
            .filter(|(_, score)| *score >= MIN_SCORE)
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        scored
    }

    /// Invoke a registered tool by name.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancelToken,
    ) -> Result<ToolResult, ToolError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        entry.tool.invoke(arguments, cancel).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased alphanumeric tokens of a text.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard overlap between the query tokens and the corpus tokens.
fn token_overlap(query_tokens: &[String], corpus: &str) -> f32 {
    let query: HashSet<&str> = query_tokens.iter().map(|t| t.as_str()).collect();
    let corpus_tokens = tokenize(corpus);
    let corpus: HashSet<&str> = corpus_tokens.iter().map(|t| t.as_str()).collect();
    if query.is_empty() || corpus.is_empty() {
        return 0.0;
    }
    let intersection = query.intersection(&corpus).count();
    let union = query.union(&corpus).count();
    intersection as f32 / union as f32
}

/// Cosine similarity of two vectors; 0.0 when either is degenerate.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
