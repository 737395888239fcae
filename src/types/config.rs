//! Bridge configuration
//!
//! [`ProviderConfig`] carries the `ANTHROPIC_*` environment forwarded to the
//! child; [`BridgeConfig`] carries everything the executor needs to launch
//! and supervise it.

use std::collections::HashMap;
use std::time::Duration;

use crate::process::Backend;
use crate::types::{ExecutionOptions, PermissionMode};

/// Default silence timeout (no stdout byte yet)
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default overall ceiling for one invocation
pub const DEFAULT_CEILING_TIMEOUT: Duration = Duration::from_secs(300);
/// Default SSE heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// Delay between SIGINT and SIGTERM on cancel
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);
/// How long a streamed session stays resumable after its client drops or
/// after it finishes
pub const DEFAULT_RESUME_WINDOW: Duration = Duration::from_secs(30);

/// Provider configuration loaded from environment variables
///
/// Supports pointing the child at alternative model providers through the
/// same variables the Claude CLI understands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    /// Environment variable: `ANTHROPIC_BASE_URL`
    pub base_url: Option<String>,

    /// Environment variable: `ANTHROPIC_API_KEY` (preferred) or `ANTHROPIC_AUTH_TOKEN` (legacy)
    pub api_key: Option<String>,

    /// Environment variable: `ANTHROPIC_MODEL`
    pub model: Option<String>,

    /// Environment variable: `ANTHROPIC_SMALL_FAST_MODEL`
    pub small_fast_model: Option<String>,

    /// Environment variable: `MAX_THINKING_TOKENS`
    pub max_thinking_tokens: Option<u32>,
}

impl ProviderConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .or_else(|| std::env::var("ANTHROPIC_AUTH_TOKEN").ok());

        let max_thinking_tokens = std::env::var("MAX_THINKING_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        Self {
            base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
            api_key,
            model: std::env::var("ANTHROPIC_MODEL").ok(),
            small_fast_model: std::env::var("ANTHROPIC_SMALL_FAST_MODEL").ok(),
            max_thinking_tokens,
        }
    }

    /// Check if any provider setting is present
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
            || self.api_key.is_some()
            || self.model.is_some()
            || self.small_fast_model.is_some()
            || self.max_thinking_tokens.is_some()
    }

    /// Environment variables to set on the child process
    pub fn to_env_vars(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();

        if let Some(ref url) = self.base_url {
            env.insert("ANTHROPIC_BASE_URL".to_string(), url.clone());
        }
        if let Some(ref key) = self.api_key {
            env.insert("ANTHROPIC_API_KEY".to_string(), key.clone());
        }
        if let Some(ref model) = self.model {
            env.insert("ANTHROPIC_MODEL".to_string(), model.clone());
        }
        if let Some(ref model) = self.small_fast_model {
            env.insert("ANTHROPIC_SMALL_FAST_MODEL".to_string(), model.clone());
        }
        if let Some(tokens) = self.max_thinking_tokens {
            env.insert("MAX_THINKING_TOKENS".to_string(), tokens.to_string());
        }

        env
    }

    /// Fill model fields the request left empty
    pub fn apply_to_options(&self, options: &mut ExecutionOptions) {
        if options.model.is_none() {
            options.model.clone_from(&self.model);
        }
        if options.fallback_model.is_none() {
            options.fallback_model.clone_from(&self.small_fast_model);
        }
    }
}

/// Server-wide defaults merged into each request's options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionDefaults {
    pub model: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Option<Vec<String>>,
}

impl ExecutionDefaults {
    /// Fill unset fields of `options`; request values always win
    pub fn apply(&self, options: &mut ExecutionOptions) {
        if options.model.is_none() {
            options.model.clone_from(&self.model);
        }
        if options.permission_mode.is_none() {
            options.permission_mode = self.permission_mode;
        }
        if options.allowed_tools.is_none() {
            options.allowed_tools.clone_from(&self.allowed_tools);
        }
        if options.disallowed_tools.is_none() {
            options.disallowed_tools.clone_from(&self.disallowed_tools);
        }
    }
}

/// Everything the executor needs to launch and supervise a child
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub backend: Backend,
    /// Executable resolved by the login shell in CLI mode
    pub claude_binary: String,
    /// Login shell used to run the CLI command line
    pub shell: String,
    /// Program plus leading arguments for the direct API wrapper
    pub wrapper_command: Vec<String>,
    pub silence_timeout: Duration,
    pub ceiling_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub cancel_grace: Duration,
    /// A disconnected session is cancelled when no client re-attaches
    /// within this window; finished sessions stay replayable for as long
    pub resume_window: Duration,
    pub defaults: ExecutionDefaults,
    pub provider: ProviderConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Cli,
            claude_binary: "claude".to_string(),
            shell: "/bin/sh".to_string(),
            wrapper_command: Vec::new(),
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            ceiling_timeout: DEFAULT_CEILING_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            resume_window: DEFAULT_RESUME_WINDOW,
            defaults: ExecutionDefaults::default(),
            provider: ProviderConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Defaults plus provider settings and `$SHELL` from the environment
    pub fn from_env() -> Self {
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string());

        Self {
            shell,
            provider: ProviderConfig::from_env(),
            ..Self::default()
        }
    }

    /// Build the final options for one invocation
    ///
    /// Request values win over configured defaults, which win over provider
    /// environment values.
    pub fn resolve_options(&self, mut options: ExecutionOptions) -> ExecutionOptions {
        self.defaults.apply(&mut options);
        self.provider.apply_to_options(&mut options);
        options
    }
}
