//! Stdout decoding pipeline
//!
//! Turns the child's raw stdout into normalized events:
//! - [`LineFramer`]: bytes → complete lines
//! - [`CliMessage`]: line → raw CLI message
//! - [`MessageConverter`]: CLI message → [`StreamEvent`]

mod cli_message;
mod frame;
mod message;
mod stream_event;

pub use cli_message::CliMessage;
pub use frame::LineFramer;
pub use message::MessageConverter;
pub use stream_event::{
    AssistantEvent, ContentBlock, DeltaEvent, ModelUsage, PermissionRequest, ResultEvent,
    StreamDelta, StreamError, StreamEvent, SystemEvent, ToolUseResultMeta, UserEvent,
};
