//! Session lifecycle
//!
//! This module handles:
//! - Running one child per session and streaming its events
//! - The registry of live sessions (cancel, permission forwarding)
//! - Permission decisions written back to stdin
//! - Accumulating the finished turn for storage

mod executor;
mod permission;
mod registry;
mod state;
mod transcript;

pub use executor::{ExecutionRequest, Executor, SessionHandle};
pub use permission::{PermissionDecision, encode_permission_response, write_permission_response};
pub use registry::{LiveSession, SessionRegistry, StdinWriter};
pub use state::SessionState;
pub use transcript::{MemoryStore, MessageRole, MessageStore, StoredMessage, Transcript};
