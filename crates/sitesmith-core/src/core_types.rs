//! Core type definitions for the session/agent communication protocol
//!
//! This module defines the data structures shared between the version store,
//! the turn ledger and the agent loop. The chat entry shape is kept compatible
//! with OpenAI-style function calling so the same record can be persisted to
//! disk, replayed to the completion engine, and rendered by a UI without
//! translation layers in between.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A page element the user picked in the browser before sending an
/// instruction. Carried on the user entry so the UI can restore the
/// selection after an undo.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Selection {
    pub selector: String,
}

/// One record in a session's conversation logs.
///
/// Two parallel logs exist per session: the UI-facing history (assistant
/// entries without rendered text are filtered out) and the model-facing
/// context (everything, including tool calls and tool results).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
    pub turn: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatEntry {
    pub fn user(content: impl Into<String>, selection: Option<Selection>) -> Self {
        ChatEntry {
            role: Role::User,
            content: content.into(),
            turn: 0,
            version: 0,
            created_at: Utc::now(),
            selection,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatEntry {
            role: Role::Assistant,
            content: content.into(),
            turn: 0,
            version: 0,
            created_at: Utc::now(),
            selection: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut entry = Self::assistant(content);
        if !calls.is_empty() {
            entry.tool_calls = Some(calls);
        }
        entry
    }

    pub fn tool_result(tool_call_id: Option<String>, content: impl Into<String>) -> Self {
        ChatEntry {
            role: Role::Tool,
            content: content.into(),
            turn: 0,
            version: 0,
            created_at: Utc::now(),
            selection: None,
            tool_calls: None,
            tool_call_id,
        }
    }

    /// Whether this entry carries text worth showing in the UI history.
    pub fn has_rendered_text(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// Result of a single tool execution, tagged so callers and the persisted
/// context can distinguish plain text, structured payloads and recovered
/// failures without parsing message bodies.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolOutcome {
    Text { text: String },
    Json { value: Value },
    Error { message: String },
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutcome::Text { text: text.into() }
    }

    pub fn json(value: Value) -> Self {
        ToolOutcome::Json { value }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutcome::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error { .. })
    }

    /// The string form fed back to the completion engine as the tool result.
    pub fn render(&self) -> String {
        match self {
            ToolOutcome::Text { text } => text.clone(),
            ToolOutcome::Json { value } => value.to_string(),
            ToolOutcome::Error { message } => format!("Error: {}", message),
        }
    }
}

/// Token accounting reported by the completion engine at the end of a step.
/// Used for operational logging only; never drives control flow.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct UsageReport {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
