//! Completion provider for OpenAI-compatible HTTP endpoints.
//!
//! Posts to `{base_url}/chat/completions` with an
//! `Authorization: Bearer {api_key}` header and returns the response body
//! as raw JSON — the gateway's extraction ladder does the rest. Compatible
//! with any vendor that exposes the chat-completions wire format.
//!
//! All instances share one pooled HTTP client so TLS sessions and DNS
//! lookups stay warm across concurrent sessions.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::GatewayError;
use crate::queryflow::gateway::{ChatMessage, LlmProvider, ToolSpec};
use lazy_static::lazy_static;
use serde_json::{json, Value};
use std::time::Duration;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// A chat-completions provider addressed by base URL, key, and model.
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider for the given endpoint and model.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: get_shared_http_client().clone(),
        }
    }

    /// Serialise messages to the chat-completions wire format.
    fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content.as_ref(),
                })
            })
            .collect()
    }

    /// Serialise tool specs to the provider's `tools` array.
    fn wire_tools(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
        cancel: &CancelToken,
    ) -> Result<Value, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let mut body = json!({
            "model": self.model,
            "messages": Self::wire_messages(messages),
        });
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(Self::wire_tools(tools));
            }
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            sent = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send() => sent.map_err(|e| GatewayError::Unavailable(e.to_string()))?,
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            log::error!("chat completion HTTP {} from {}: {}", status, url, text);
            return Err(GatewayError::Unavailable(format!(
                "HTTP {} from completion endpoint",
                status
            )));
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queryflow::gateway::ChatRole;
    use std::sync::Arc;

    #[test]
    fn wire_messages_carry_roles_and_content() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage {
                role: ChatRole::User,
                content: Arc::from("hello"),
            },
        ];
        let wire = OpenAiCompatProvider::wire_messages(&messages);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["content"], "hello");
    }

    #[test]
    fn wire_tools_use_function_envelope() {
        let tools = vec![ToolSpec {
            name: "list_alerts".into(),
            description: "List alerts".into(),
            parameters_schema: serde_json::json!({ "type": "object" }),
        }];
        let wire = OpenAiCompatProvider::wire_tools(&tools);
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "list_alerts");
    }
}
