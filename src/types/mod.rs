//! Shared types for the stream bridge
//!
//! Errors, configuration, per-invocation options and usage accounting.

mod config;
mod error;
mod options;
mod usage;

pub use config::{
    BridgeConfig, DEFAULT_CANCEL_GRACE, DEFAULT_CEILING_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_RESUME_WINDOW, DEFAULT_SILENCE_TIMEOUT, ExecutionDefaults, ProviderConfig,
};
pub use error::{BridgeError, ErrorCode, Result};
pub use options::{ExecutionOptions, PermissionMode};
pub use usage::TokenUsage;
