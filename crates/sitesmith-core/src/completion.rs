//! Completion engine abstraction and the bundled HTTP implementation
//!
//! The agent loop is provider-agnostic: it hands a system prompt, the
//! conversation so far and a tool catalog to a `CompletionEngine` and
//! consumes a stream of text deltas and tool-call requests. Exactly one
//! implementation is selected at startup; there is no provider hierarchy.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core_types::{ChatEntry, ToolCall, UsageReport};
use crate::errors::AgentError;

/// Metadata describing one tool to the completion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One step's worth of input for the engine.
#[derive(Debug, Clone, Serialize)]
pub struct StepRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatEntry>,
    pub tools: Vec<ToolSpec>,
}

/// Events the engine yields while a step streams.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    Usage(UsageReport),
}

pub type CompletionStream =
    Pin<Box<dyn Stream<Item = Result<CompletionEvent, AgentError>> + Send>>;

#[async_trait]
pub trait CompletionEngine: Send + Sync {
    async fn stream_step(&self, request: StepRequest) -> Result<CompletionStream, AgentError>;
}

/// HTTP-backed engine speaking a chat-completions style endpoint.
pub struct HttpCompletionEngine {
    pub endpoint_url: String,
    model: Option<String>,
    client: Client,
}

impl HttpCompletionEngine {
    pub fn new(endpoint_url: String, model: Option<String>) -> Self {
        Self {
            endpoint_url,
            model,
            client: Client::new(),
        }
    }
}

#[derive(Serialize)]
struct RequestPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    system: &'a str,
    messages: &'a [ChatEntry],
    tools: &'a [ToolSpec],
}

#[derive(Deserialize)]
struct ResponsePayload {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
    usage: Option<UsageReport>,
}

#[async_trait]
impl CompletionEngine for HttpCompletionEngine {
    async fn stream_step(&self, request: StepRequest) -> Result<CompletionStream, AgentError> {
        let payload = RequestPayload {
            model: self.model.as_deref(),
            system: &request.system_prompt,
            messages: &request.messages,
            tools: &request.tools,
        };

        let request_url = format!("{}/v1/chat/completions", self.endpoint_url);
        log::debug!(
            "HttpCompletionEngine sending {} messages to {}",
            request.messages.len(),
            request_url
        );

        let response = self
            .client
            .post(&request_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            let err_msg = format!("engine request failed with status {}: {}", status, error_text);
            log::error!("{}", err_msg);
            return Err(AgentError::CompletionEngine(err_msg));
        }

        let parsed: ResponsePayload = response.json().await.map_err(|e| {
            let err_msg = format!("failed to parse engine response: {}", e);
            log::error!("{}", err_msg);
            AgentError::CompletionEngine(err_msg)
        })?;

        // The endpoint answers a whole step at once; replay it as the event
        // stream the loop expects.
        let stream = async_stream::stream! {
            if let Some(content) = parsed.content {
                if !content.is_empty() {
                    yield Ok(CompletionEvent::TextDelta(content));
                }
            }
            for call in parsed.tool_calls.unwrap_or_default() {
                yield Ok(CompletionEvent::ToolCall(call));
            }
            if let Some(usage) = parsed.usage {
                yield Ok(CompletionEvent::Usage(usage));
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Role;

    #[test]
    fn step_request_serializes_roles_lowercase() {
        let request = StepRequest {
            system_prompt: "You edit pages".to_string(),
            messages: vec![ChatEntry::user("hello", None)],
            tools: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(request.messages[0].role, Role::User);
    }
}
