//! Uniform request/response surface over completion providers.
//!
//! Every part of the engine that needs text generation — the planner, the
//! data-source agents, the consolidator — goes through [`LlmGateway`]. The
//! gateway accepts chat messages (plus optional tool specs for native
//! tool-calling), forwards them to an ordered list of [`LlmProvider`]s with
//! failover, and normalizes the provider's raw JSON into a [`Completion`].
//!
//! Providers disagree about where the answer text lives in their response
//! shape, so normalization is a single ordered extraction ladder
//! ([`extract_text`]) rather than per-provider branches scattered across
//! nodes. New shapes are supported by appending a probe to the list.
//!
//! # Extraction order
//!
//! ```text
//! 1. content[0].text            (content-block providers)
//! 2. choices[0].message.content (chat-completion providers)
//! 3. content                    (bare string field)
//! 4. message.content
//! 5. text
//! 6. the whole response, serialized as JSON
//! ```
//!
//! # Cancellation
//!
//! [`LlmGateway::complete`] honors the caller's [`CancelToken`]: when it
//! fires mid-call the gateway returns [`GatewayError::Cancelled`] promptly,
//! regardless of what the underlying provider does.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::GatewayError;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Conversation roles understood by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        write!(f, "{}", name)
    }
}

/// One chat message. Content is stored as `Arc<str>` so prompts can be
/// cloned cheaply between retries and failover attempts.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Arc<str>,
}

impl ChatMessage {
    pub fn system(content: impl AsRef<str>) -> Self {
        Self {
            role: ChatRole::System,
            content: Arc::from(content.as_ref()),
        }
    }

    pub fn user(content: impl AsRef<str>) -> Self {
        Self {
            role: ChatRole::User,
            content: Arc::from(content.as_ref()),
        }
    }

    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: Arc::from(content.as_ref()),
        }
    }
}

/// A tool schema passed to providers that support native tool-calling.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name as it appears in the provider's `tools` array.
    pub name: String,
    /// Description surfaced to the model to aid selection.
    pub description: String,
    /// JSON Schema object describing accepted parameters.
    pub parameters_schema: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Name of the requested tool.
    pub tool_name: String,
    /// Parsed JSON arguments for the call.
    pub arguments: Value,
}

/// Normalized completion: plain text plus any tool calls the model made.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// A concrete completion backend.
///
/// Implementations translate the uniform request into their wire format and
/// return the provider's response JSON *unmodified* — normalization is the
/// gateway's job, so response-shape knowledge stays in one place.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform one completion call, returning the raw response document.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        cancel: &CancelToken,
    ) -> Result<Value, GatewayError>;

    /// Identifier used in logs (e.g. `"openai-compatible"`).
    fn provider_name(&self) -> &str;
}

/// The gateway: an ordered provider list with failover and normalization.
pub struct LlmGateway {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl LlmGateway {
    /// Build a gateway over a single provider.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            providers: vec![provider],
        }
    }

    /// Build a gateway over an ordered provider list; earlier entries are
    /// preferred, later ones are tried when an earlier one is unavailable.
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    /// Append a fallback provider (builder pattern).
    pub fn with_fallback(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Run one completion across the provider list.
    ///
    /// Unavailability advances to the next provider; cancellation and
    /// malformed responses return immediately. When every provider is
    /// unavailable the last unavailability error is returned.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        cancel: &CancelToken,
    ) -> Result<Completion, GatewayError> {
        if self.providers.is_empty() {
            return Err(GatewayError::Unavailable(
                "no completion providers configured".to_string(),
            ));
        }

        let mut last_unavailable = None;
        for provider in &self.providers {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            let raw = tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                result = provider.complete(messages, tools, cancel) => result,
            };
            match raw {
                Ok(response) => {
                    return Ok(Completion {
                        text: extract_text(&response),
                        tool_calls: extract_tool_calls(&response),
                    });
                }
                Err(GatewayError::Unavailable(msg)) => {
                    log::warn!(
                        "provider '{}' unavailable, trying next: {}",
                        provider.provider_name(),
                        msg
                    );
                    last_unavailable = Some(GatewayError::Unavailable(msg));
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_unavailable
            .unwrap_or_else(|| GatewayError::Unavailable("no provider answered".to_string())))
    }
}

/// One probe in the text-extraction ladder.
type TextProbe = fn(&Value) -> Option<String>;

/// The ordered extraction ladder. Append new provider shapes here; never
/// branch on shapes anywhere else.
const TEXT_PROBES: &[TextProbe] = &[
    // content[0].text — content-block shaped responses.
    |v| {
        v.get("content")?
            .as_array()?
            .first()?
            .get("text")?
            .as_str()
            .map(str::to_string)
    },
    // choices[0].message.content — chat-completion shaped responses.
    |v| {
        v.get("choices")?
            .as_array()?
            .first()?
            .get("message")?
            .get("content")?
            .as_str()
            .map(str::to_string)
    },
    // Bare top-level content string.
    |v| v.get("content")?.as_str().map(str::to_string),
    // message.content.
    |v| {
        v.get("message")?
            .get("content")?
            .as_str()
            .map(str::to_string)
    },
    // Top-level text.
    |v| v.get("text")?.as_str().map(str::to_string),
];

/// Extract the answer text from an arbitrary provider response.
///
/// Tries each probe in order and falls back to serializing the whole
/// response. This is the only place in the engine that knows about provider
/// response shapes.
pub fn extract_text(response: &Value) -> String {
    for probe in TEXT_PROBES {
        if let Some(text) = probe(response) {
            return text;
        }
    }
    response.to_string()
}

/// One probe in the tool-call extraction ladder.
type ToolCallProbe = fn(&Value) -> Option<Vec<ToolCall>>;

const TOOL_CALL_PROBES: &[ToolCallProbe] = &[
    // choices[0].message.tool_calls[].function — arguments arrive as a JSON
    // string that needs a second parse.
    |v| {
        let calls = v
            .get("choices")?
            .as_array()?
            .first()?
            .get("message")?
            .get("tool_calls")?
            .as_array()?;
        let parsed = calls
            .iter()
            .filter_map(|call| {
                let function = call.get("function")?;
                let name = function.get("name")?.as_str()?.to_string();
                let arguments = match function.get("arguments") {
                    Some(Value::String(s)) => {
                        serde_json::from_str(s).unwrap_or(Value::Object(Default::default()))
                    }
                    Some(other) => other.clone(),
                    None => Value::Object(Default::default()),
                };
                Some(ToolCall {
                    tool_name: name,
                    arguments,
                })
            })
            .collect::<Vec<_>>();
        if parsed.is_empty() {
            None
        } else {
            Some(parsed)
        }
    },
    // content[] blocks of type "tool_use" with an inline input object.
    |v| {
        let blocks = v.get("content")?.as_array()?;
        let parsed = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
            .filter_map(|b| {
                Some(ToolCall {
                    tool_name: b.get("name")?.as_str()?.to_string(),
                    arguments: b.get("input").cloned().unwrap_or(Value::Null),
                })
            })
            .collect::<Vec<_>>();
        if parsed.is_empty() {
            None
        } else {
            Some(parsed)
        }
    },
];

/// Extract native tool calls from an arbitrary provider response. Returns
/// an empty list when the model answered with plain text.
pub fn extract_tool_calls(response: &Value) -> Vec<ToolCall> {
    for probe in TOOL_CALL_PROBES {
        if let Some(calls) = probe(response) {
            return calls;
        }
    }
    Vec::new()
}
