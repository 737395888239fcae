//! Finalized conversation turns and the store they are appended to
//!
//! A [`Transcript`] watches the events of one session and, once the stream
//! ends, yields the assistant turn as a [`StoredMessage`]. Durable storage
//! lives behind the [`MessageStore`] trait; [`MemoryStore`] keeps everything
//! in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::converter::{ContentBlock, StreamEvent};
use crate::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One persisted conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<Value>,
    /// Session id reported by the CLI itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            claude_session_id: None,
            total_cost_usd: None,
            created_at: Utc::now(),
        }
    }
}

/// Append-only message storage
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    async fn append(&self, message: StoredMessage) -> Result<()>;

    /// Messages of one session in append order
    async fn list(&self, session_id: &str) -> Result<Vec<StoredMessage>>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: tokio::sync::RwLock<Vec<StoredMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: StoredMessage) -> Result<()> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// Accumulates the assistant turn from a session's events
#[derive(Debug, Default)]
pub struct Transcript {
    content: String,
    tool_calls: Vec<Value>,
    tool_results: Vec<Value>,
    claude_session_id: Option<String>,
    total_cost_usd: Option<f64>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the transcript
    ///
    /// Thinking blocks and deltas are not persisted; the finalized assistant
    /// message carries the same text.
    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::System(system) => {
                if let Some(ref id) = system.session_id {
                    self.claude_session_id = Some(id.clone());
                }
            }
            StreamEvent::Assistant(assistant) => {
                for block in &assistant.content {
                    self.observe_block(block);
                }
            }
            StreamEvent::User(user) => {
                for block in &user.content {
                    if matches!(block, ContentBlock::ToolResult { .. }) {
                        self.observe_block(block);
                    }
                }
            }
            StreamEvent::Result(result) => {
                if !result.session_id.is_empty() {
                    self.claude_session_id = Some(result.session_id.clone());
                }
                self.total_cost_usd = result.total_cost_usd;
            }
            StreamEvent::StreamEvent(_) | StreamEvent::Permission(_) | StreamEvent::Error(_) => {}
        }
    }

    fn observe_block(&mut self, block: &ContentBlock) {
        match block {
            ContentBlock::Text { text } => self.content.push_str(text),
            ContentBlock::ToolUse { .. } => {
                if let Ok(value) = serde_json::to_value(block) {
                    self.tool_calls.push(value);
                }
            }
            ContentBlock::ToolResult { .. } => {
                if let Ok(value) = serde_json::to_value(block) {
                    self.tool_results.push(value);
                }
            }
            ContentBlock::Thinking { .. } => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn claude_session_id(&self) -> Option<&str> {
        self.claude_session_id.as_deref()
    }

    /// The assistant message, or `None` when no text was produced
    pub fn into_message(self, session_id: impl Into<String>) -> Option<StoredMessage> {
        if self.content.is_empty() {
            return None;
        }
        Some(StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role: MessageRole::Assistant,
            content: self.content,
            tool_calls: self.tool_calls,
            tool_results: self.tool_results,
            claude_session_id: self.claude_session_id,
            total_cost_usd: self.total_cost_usd,
            created_at: Utc::now(),
        })
    }
}
