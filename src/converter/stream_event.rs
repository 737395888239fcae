//! Normalized events delivered to stream consumers
//!
//! Everything here is camelCase JSON with a `type` discriminator. The server
//! serializes these into SSE frames and the client deserializes them back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{BridgeError, TokenUsage};

/// One normalized event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    System(SystemEvent),
    Assistant(AssistantEvent),
    User(UserEvent),
    Result(ResultEvent),
    StreamEvent(DeltaEvent),
    Permission(PermissionRequest),
    Error(StreamError),
}

impl StreamEvent {
    /// SSE `event:` name, identical to the JSON `type` tag
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::Result(_) => "result",
            Self::StreamEvent(_) => "streamEvent",
            Self::Permission(_) => "permission",
            Self::Error(_) => "error",
        }
    }

    /// Terminal error event for a failed session
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(StreamError {
            code: code.into(),
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl From<&BridgeError> for StreamEvent {
    fn from(err: &BridgeError) -> Self {
        Self::Error(StreamError::from(err))
    }
}

/// Content block inside assistant and user events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub subtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantEvent {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_result: Option<ToolUseResultMeta>,
}

/// Summary the CLI attaches to tool result messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseResultMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filenames: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    pub subtype: String,
    pub session_id: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_api_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,
    #[serde(
        default,
        rename = "totalCostUSD",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_usage: Option<BTreeMap<String, ModelUsage>>,
}

/// Per-model usage breakdown from the result message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, rename = "costUSD", skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
}

/// Incremental update for a partially generated message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<StreamDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StreamDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
}

/// A tool-permission prompt awaiting an external decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub request_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamError {
    pub code: String,
    pub message: String,
}

impl From<&BridgeError> for StreamError {
    fn from(err: &BridgeError) -> Self {
        Self {
            code: err.error_code().as_str().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_assistant_wire_shape() {
        let event = StreamEvent::Assistant(AssistantEvent {
            content: vec![
                ContentBlock::text("hi"),
                ContentBlock::ToolUse {
                    id: "tu_1".into(),
                    name: "Read".into(),
                    input: json!({"path": "a.rs"}),
                },
                ContentBlock::ToolResult {
                    tool_use_id: "tu_1".into(),
                    content: "ok".into(),
                    is_error: false,
                },
            ],
            session_id: Some("s1".into()),
            uuid: None,
        });

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "assistant",
                "content": [
                    {"type": "text", "text": "hi"},
                    {"type": "toolUse", "id": "tu_1", "name": "Read", "input": {"path": "a.rs"}},
                    {"type": "toolResult", "toolUseId": "tu_1", "content": "ok", "isError": false}
                ],
                "sessionId": "s1"
            })
        );
    }

    #[test]
    fn test_delta_and_permission_wire_shape() {
        let event = StreamEvent::StreamEvent(DeltaEvent {
            event_type: "content_block_delta".into(),
            index: Some(0),
            delta: Some(StreamDelta::InputJsonDelta {
                partial_json: "{\"a\"".into(),
            }),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "streamEvent");
        assert_eq!(value["eventType"], "content_block_delta");
        assert_eq!(value["delta"]["type"], "inputJsonDelta");
        assert_eq!(value["delta"]["partialJson"], "{\"a\"");

        let event = StreamEvent::Permission(PermissionRequest {
            request_id: "r1".into(),
            tool_name: "Bash".into(),
            tool_input: json!({"command": "ls"}),
            description: None,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "permission", "requestId": "r1", "toolName": "Bash", "toolInput": {"command": "ls"}})
        );
    }

    #[test]
    fn test_result_cost_key() {
        let event = StreamEvent::Result(ResultEvent {
            subtype: "success".into(),
            session_id: "s".into(),
            is_error: false,
            duration_ms: Some(12),
            duration_api_ms: None,
            num_turns: Some(1),
            total_cost_usd: Some(0.25),
            usage: None,
            result: Some("done".into()),
            model_usage: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["totalCostUSD"], 0.25);
        assert_eq!(value["durationMs"], 12);
    }

    #[test]
    fn test_error_from_bridge_error() {
        let event = StreamEvent::from(&BridgeError::SilenceTimeout(30));
        assert_eq!(event.event_name(), "error");
        let StreamEvent::Error(err) = event else {
            panic!("expected error event");
        };
        assert_eq!(err.code, "SILENCE_TIMEOUT");
    }

    #[test]
    fn test_event_names_match_type_tag() {
        let events = vec![
            StreamEvent::error("STREAM_ERROR", "x"),
            StreamEvent::StreamEvent(DeltaEvent {
                event_type: "message_stop".into(),
                index: None,
                delta: None,
            }),
            StreamEvent::User(UserEvent {
                content: vec![],
                session_id: None,
                uuid: None,
                tool_use_result: None,
            }),
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_name());
            let back: StreamEvent = serde_json::from_value(value).unwrap();
            assert_eq!(back, event);
        }
    }
}
