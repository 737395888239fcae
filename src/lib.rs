//! Claude Stream Bridge
//!
//! Runs Claude Code (or a direct API wrapper) as a child process per
//! session and streams its output to remote clients over Server-Sent Events.
//! Tool-permission prompts are answered mid-stream by writing the decision
//! to the still-open stdin of the child.
//!
//! ## Layout
//!
//! - [`process`]: spawning, process groups, silence and ceiling timers
//! - [`converter`]: stdout framing and CLI message normalization
//! - [`session`]: the per-session pipeline, the live-session registry,
//!   permission forwarding and transcript storage
//! - [`server`]: SSE framing, HTTP routes and the binary's runner
//! - [`client`]: a reconnecting SSE consumer
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use claude_stream_bridge::session::{ExecutionRequest, Executor, SessionRegistry};
//! use claude_stream_bridge::types::BridgeConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = Executor::new(
//!         Arc::new(BridgeConfig::from_env()),
//!         Arc::new(SessionRegistry::new()),
//!     );
//!     let mut handle = executor.execute(ExecutionRequest::new("Say hello")).await?;
//!     while let Some(event) = handle.events.recv().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! Forwarded to the child process:
//!
//! - `ANTHROPIC_BASE_URL`: Custom API base URL
//! - `ANTHROPIC_API_KEY`: API key (preferred)
//! - `ANTHROPIC_AUTH_TOKEN`: Auth token (legacy, fallback)
//! - `ANTHROPIC_MODEL`: Model used when neither the request nor the server
//!   defaults name one
//! - `ANTHROPIC_SMALL_FAST_MODEL`: Fallback model
//! - `MAX_THINKING_TOKENS`: Maximum tokens for extended thinking mode

pub mod cli;
pub mod client;
pub mod converter;
pub mod process;
pub mod server;
pub mod session;
pub mod tracing;
pub mod types;

pub use cli::Cli;
pub use client::{HttpTransport, StreamClient};
pub use converter::StreamEvent;
pub use server::{router, run_with_cli, shutdown_otel};
pub use session::{ExecutionRequest, Executor, SessionRegistry};
pub use types::{BridgeConfig, BridgeError, ExecutionOptions, Result};
