//! Outbound notification capability
//!
//! The core announces state changes through this sink; the real-time push
//! channel (SSE, websocket, whatever the embedding server uses) lives
//! outside the core and just implements `Notifier`. Background tasks report
//! their failures here as well, since there is no caller left to throw to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Started,
    Generating,
    Completed,
    Error,
    Skipped,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatStatusEvent {
    pub session_id: String,
    pub status: ChatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ChatStatusEvent {
    pub fn new(session_id: impl Into<String>, status: ChatStatus) -> Self {
        ChatStatusEvent {
            session_id: session_id.into(),
            status,
            message: None,
            details: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreatedEvent {
    pub source_session_id: String,
    pub new_session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<i32>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn chat_status(&self, event: ChatStatusEvent);
    async fn session_created(&self, event: SessionCreatedEvent);
}

/// Notifier that only logs. Used in tests and headless runs.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn chat_status(&self, event: ChatStatusEvent) {
        log::debug!(
            "chat-status {}: {:?} {}",
            event.session_id,
            event.status,
            event.message.as_deref().unwrap_or("")
        );
    }

    async fn session_created(&self, event: SessionCreatedEvent) {
        log::debug!(
            "session-created {} -> {}",
            event.source_session_id,
            event.new_session_id
        );
    }
}
