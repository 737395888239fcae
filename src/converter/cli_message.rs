//! Raw messages emitted by `claude --output-format stream-json`
//!
//! Field names are snake_case as the CLI writes them. Content blocks are kept
//! as raw JSON here and decoded one at a time by the converter, so a single
//! malformed block never costs the whole message.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// One decoded stdout line
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CliMessage {
    System(CliSystemMessage),
    Assistant(CliChatMessage),
    User(CliChatMessage),
    Result(CliResultMessage),
    StreamEvent(CliStreamEvent),
    Permission(CliPermissionMessage),
}

impl CliMessage {
    /// Parse one framed line
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::Result(_) => "result",
            Self::StreamEvent(_) => "stream_event",
            Self::Permission(_) => "permission",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliSystemMessage {
    #[serde(default = "default_system_subtype")]
    pub subtype: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub claude_code_version: Option<String>,
}

fn default_system_subtype() -> String {
    "init".to_string()
}

/// Assistant and user messages share one envelope
#[derive(Debug, Clone, Deserialize)]
pub struct CliChatMessage {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub parent_tool_use_id: Option<String>,
    pub message: CliMessagePayload,
    #[serde(default)]
    pub tool_use_result: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliMessagePayload {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// A list of blocks, or a bare string for plain user prompts
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub duration_api_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<Value>,
    #[serde(default, rename = "modelUsage")]
    pub model_usage: Option<BTreeMap<String, CliModelUsage>>,
}

/// `modelUsage` entries are camelCase in the CLI output
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliModelUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default, rename = "costUSD")]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub context_window: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliStreamEvent {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub event: CliRawEvent,
}

/// Anthropic streaming event (`message_start`, `content_block_delta`, ...)
#[derive(Debug, Clone, Deserialize)]
pub struct CliRawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub delta: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliPermissionMessage {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_system_init() {
        let msg = CliMessage::parse(
            r#"{"type":"system","subtype":"init","session_id":"abc","model":"sonnet","tools":["Read"],"cwd":"/tmp"}"#,
        )
        .unwrap();
        let CliMessage::System(system) = msg else {
            panic!("expected system");
        };
        assert_eq!(system.session_id.as_deref(), Some("abc"));
        assert_eq!(system.tools.unwrap(), vec!["Read"]);
    }

    #[test]
    fn test_parse_stream_event_tag() {
        let msg = CliMessage::parse(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"He"}}}"#,
        )
        .unwrap();
        assert_eq!(msg.kind(), "stream_event");
    }

    #[test]
    fn test_parse_result_with_model_usage() {
        let msg = CliMessage::parse(
            r#"{"type":"result","subtype":"success","session_id":"s","is_error":false,"total_cost_usd":0.01,
                "modelUsage":{"claude-sonnet":{"inputTokens":3,"outputTokens":4,"costUSD":0.01,"contextWindow":200000}}}"#,
        )
        .unwrap();
        let CliMessage::Result(result) = msg else {
            panic!("expected result");
        };
        let usage = &result.model_usage.unwrap()["claude-sonnet"];
        assert_eq!(usage.cost_usd, Some(0.01));
        assert_eq!(usage.context_window, Some(200_000));
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(CliMessage::parse(r#"{"type":"telemetry","x":1}"#).is_err());
        assert!(CliMessage::parse("not json").is_err());
        assert!(CliMessage::parse(r#"{"no_type":true}"#).is_err());
    }

    #[test]
    fn test_assistant_keeps_raw_blocks() {
        let msg = CliMessage::parse(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"},42]}}"#,
        )
        .unwrap();
        let CliMessage::Assistant(chat) = msg else {
            panic!("expected assistant");
        };
        assert_eq!(chat.message.content.as_array().unwrap().len(), 2);
    }
}
