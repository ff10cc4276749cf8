//! Scripted in-memory completion provider.
//!
//! Answers each call with the next response from a queue. Used by the test
//! suite and by offline smoke runs; an empty queue reports unavailability,
//! which exercises the heuristic and deterministic fallback paths of the
//! planner and consolidator.

use crate::queryflow::cancel::CancelToken;
use crate::queryflow::error::GatewayError;
use crate::queryflow::gateway::{ChatMessage, LlmProvider, ToolSpec};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A provider that replays a fixed queue of raw responses.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Value>>,
    /// Prompts observed so far, for assertions.
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// An empty script: every call reports unavailability.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a raw response document.
    pub fn push_raw(&self, response: Value) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Queue a plain-text answer in the chat-completion shape.
    pub fn push_text(&self, text: impl AsRef<str>) {
        self.push_raw(json!({
            "choices": [ { "message": { "content": text.as_ref() } } ]
        }));
    }

    /// Queue a native tool-call answer in the chat-completion shape.
    pub fn push_tool_call(&self, tool_name: &str, arguments: Value) {
        let arguments = serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".to_string());
        self.push_raw(json!({
            "choices": [ { "message": {
                "content": null,
                "tool_calls": [ {
                    "id": "call_scripted",
                    "function": { "name": tool_name, "arguments": arguments }
                } ]
            } } ]
        }));
    }

    /// The user-role prompts this provider has seen, in call order.
    pub fn seen_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// How many responses are still queued.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: Option<&[ToolSpec]>,
        cancel: &CancelToken,
    ) -> Result<Value, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        if let Some(last) = messages.last() {
            self.prompts.lock().unwrap().push(last.content.to_string());
        }
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => Err(GatewayError::Unavailable("script exhausted".to_string())),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queryflow::gateway::LlmGateway;
    use std::sync::Arc;

    #[tokio::test]
    async fn replays_in_order_then_reports_unavailable() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("first");
        provider.push_text("second");

        let gateway = LlmGateway::new(provider.clone());
        let cancel = CancelToken::never();
        let a = gateway
            .complete(&[ChatMessage::user("one")], None, &cancel)
            .await
            .unwrap();
        let b = gateway
            .complete(&[ChatMessage::user("two")], None, &cancel)
            .await
            .unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");

        let err = gateway
            .complete(&[ChatMessage::user("three")], None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert_eq!(provider.seen_prompts(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn scripted_tool_call_round_trips_through_the_gateway() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_call("list_alerts", json!({ "status": "open" }));

        let gateway = LlmGateway::new(provider);
        let completion = gateway
            .complete(&[ChatMessage::user("alerts?")], None, &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].tool_name, "list_alerts");
        assert_eq!(completion.tool_calls[0].arguments["status"], json!("open"));
    }
}
