//! CLI message to StreamEvent conversion

use std::time::Instant;

use serde_json::{Map, Value};

use super::cli_message::{
    CliChatMessage, CliMessage, CliPermissionMessage, CliResultMessage, CliStreamEvent,
    CliSystemMessage,
};
use super::stream_event::{
    AssistantEvent, ContentBlock, DeltaEvent, ModelUsage, PermissionRequest, ResultEvent,
    StreamDelta, StreamEvent, SystemEvent, ToolUseResultMeta, UserEvent,
};
use crate::types::TokenUsage;

/// Converts framed stdout lines into normalized events
///
/// Lines that fail to decode are counted and skipped; they never end the
/// stream.
#[derive(Debug, Default)]
pub struct MessageConverter {
    decoded: u64,
    skipped: u64,
}

impl MessageConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and convert one line
    ///
    /// Returns `None` for undecodable lines and for messages that reduce to
    /// nothing worth emitting.
    pub fn convert_line(&mut self, line: &str) -> Option<StreamEvent> {
        match CliMessage::parse(line) {
            Ok(message) => {
                self.decoded += 1;
                Self::convert(&message)
            }
            Err(e) => {
                self.skipped += 1;
                tracing::debug!(
                    error = %e,
                    line_len = line.len(),
                    line_prefix = %line.chars().take(120).collect::<String>(),
                    "Skipping undecodable stdout line"
                );
                None
            }
        }
    }

    /// Number of lines decoded so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Number of lines skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Convert one decoded message
    pub fn convert(message: &CliMessage) -> Option<StreamEvent> {
        let start_time = Instant::now();

        let event = match message {
            CliMessage::System(system) => Some(Self::convert_system(system)),
            CliMessage::Assistant(chat) => Self::convert_assistant(chat),
            CliMessage::User(chat) => Self::convert_user(chat),
            CliMessage::Result(result) => Some(Self::convert_result(result)),
            CliMessage::StreamEvent(event) => Some(Self::convert_stream_event(event)),
            CliMessage::Permission(permission) => Some(Self::convert_permission(permission)),
        };

        tracing::trace!(
            message_type = message.kind(),
            emitted = event.is_some(),
            conversion_duration_us = start_time.elapsed().as_micros(),
            "Message conversion completed"
        );

        event
    }

    fn convert_system(system: &CliSystemMessage) -> StreamEvent {
        StreamEvent::System(SystemEvent {
            subtype: system.subtype.clone(),
            session_id: system.session_id.clone(),
            model: system.model.clone(),
            cwd: system.cwd.clone(),
            tools: system.tools.clone().unwrap_or_default(),
            uuid: system.uuid.clone(),
        })
    }

    fn convert_assistant(chat: &CliChatMessage) -> Option<StreamEvent> {
        let content = convert_content(&chat.message.content);
        if content.is_empty() {
            return None;
        }
        Some(StreamEvent::Assistant(AssistantEvent {
            content,
            session_id: chat.session_id.clone(),
            uuid: chat.uuid.clone(),
        }))
    }

    fn convert_user(chat: &CliChatMessage) -> Option<StreamEvent> {
        let content = convert_content(&chat.message.content);
        if content.is_empty() {
            return None;
        }

        // tool_use_result is sometimes a bare string; only the object form carries metadata
        let tool_use_result = chat
            .tool_use_result
            .as_ref()
            .filter(|v| v.is_object())
            .and_then(|v| serde_json::from_value::<ToolUseResultMeta>(camel_keys(v)).ok());

        Some(StreamEvent::User(UserEvent {
            content,
            session_id: chat.session_id.clone(),
            uuid: chat.uuid.clone(),
            tool_use_result,
        }))
    }

    fn convert_result(result: &CliResultMessage) -> StreamEvent {
        let model_usage = result.model_usage.as_ref().map(|entries| {
            entries
                .iter()
                .map(|(model, entry)| {
                    (
                        model.clone(),
                        ModelUsage {
                            input_tokens: entry.input_tokens,
                            output_tokens: entry.output_tokens,
                            cost_usd: entry.cost_usd,
                            context_window: entry.context_window,
                        },
                    )
                })
                .collect()
        });

        StreamEvent::Result(ResultEvent {
            subtype: result.subtype.clone(),
            session_id: result.session_id.clone().unwrap_or_default(),
            is_error: result.is_error.unwrap_or(false),
            duration_ms: result.duration_ms,
            duration_api_ms: result.duration_api_ms,
            num_turns: result.num_turns,
            total_cost_usd: result.total_cost_usd,
            usage: result.usage.as_ref().map(TokenUsage::from_cli_usage),
            result: result.result.clone(),
            model_usage,
        })
    }

    fn convert_stream_event(event: &CliStreamEvent) -> StreamEvent {
        StreamEvent::StreamEvent(DeltaEvent {
            event_type: event.event.event_type.clone(),
            index: event.event.index,
            delta: event.event.delta.as_ref().and_then(convert_delta),
        })
    }

    fn convert_permission(permission: &CliPermissionMessage) -> StreamEvent {
        let request_id = permission
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        StreamEvent::Permission(PermissionRequest {
            request_id,
            tool_name: permission.tool_name.clone(),
            tool_input: permission
                .tool_input
                .clone()
                .unwrap_or_else(|| Value::Object(Map::new())),
            description: permission.description.clone(),
        })
    }
}

/// Decode message content: a block list, or a bare string
fn convert_content(content: &Value) -> Vec<ContentBlock> {
    match content {
        Value::String(text) if !text.is_empty() => vec![ContentBlock::text(text.clone())],
        Value::Array(blocks) => blocks.iter().filter_map(convert_block).collect(),
        _ => Vec::new(),
    }
}

/// Decode one raw block
///
/// Non-objects and blocks missing their required fields are dropped. Blocks
/// of an unrecognized type become a visible placeholder.
fn convert_block(block: &Value) -> Option<ContentBlock> {
    let obj = block.as_object()?;
    let block_type = obj.get("type")?.as_str()?;
    let str_field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    match block_type {
        "text" => str_field("text").map(|text| ContentBlock::Text { text }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: str_field("id")?,
            name: str_field("name")?,
            input: obj
                .get("input")
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new())),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: str_field("tool_use_id")?,
            content: tool_result_text(obj.get("content")),
            is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        }),
        "thinking" => str_field("thinking").map(|thinking| ContentBlock::Thinking { thinking }),
        other => Some(ContentBlock::text(format!("[unsupported block: {other}]"))),
    }
}

/// `tool_result.content` is a string or a list of `{type, text}` items
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn convert_delta(delta: &Value) -> Option<StreamDelta> {
    let str_field = |key: &str| delta.get(key).and_then(Value::as_str).map(str::to_string);

    match delta.get("type")?.as_str()? {
        "text_delta" => str_field("text").map(|text| StreamDelta::TextDelta { text }),
        "input_json_delta" => {
            str_field("partial_json").map(|partial_json| StreamDelta::InputJsonDelta { partial_json })
        }
        "thinking_delta" => {
            str_field("thinking").map(|thinking| StreamDelta::ThinkingDelta { thinking })
        }
        _ => None,
    }
}

/// Re-key a flat snake_case object to camelCase
fn camel_keys(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return value.clone();
    };
    let mapped = obj
        .iter()
        .map(|(key, v)| {
            let mut out = String::with_capacity(key.len());
            let mut upper = false;
            for c in key.chars() {
                if c == '_' {
                    upper = true;
                } else if upper {
                    out.extend(c.to_uppercase());
                    upper = false;
                } else {
                    out.push(c);
                }
            }
            (out, v.clone())
        })
        .collect();
    Value::Object(mapped)
}
