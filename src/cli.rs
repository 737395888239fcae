//! Command-line interface definitions
//!
//! Provides CLI argument parsing using clap for the stream bridge server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::process::Backend;
use crate::types::{BridgeConfig, BridgeError, PermissionMode, Result};

const DEFAULT_BIND: &str = "127.0.0.1:8787";
const SERVICE_NAME: &str = "claude-stream-bridge";

/// Claude stream bridge - run Claude Code and stream its output over SSE
#[derive(Parser, Debug, Clone)]
#[command(name = "claude-stream-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Address the HTTP server listens on
    #[arg(short, long, value_name = "ADDR", env = "BRIDGE_BIND", default_value = DEFAULT_BIND)]
    pub bind: SocketAddr,

    /// Which child process runs each prompt
    #[arg(long, value_enum, env = "BRIDGE_BACKEND", default_value_t = Backend::Cli)]
    pub backend: Backend,

    /// Claude Code executable, resolved through the login shell
    #[arg(long, value_name = "PATH", env = "CLAUDE_BINARY", default_value = "claude")]
    pub claude_binary: String,

    /// Login shell used to launch the CLI (defaults to $SHELL)
    #[arg(long, value_name = "PATH")]
    pub shell: Option<String>,

    /// Direct API wrapper program and its leading arguments
    #[arg(long, value_name = "CMD", num_args = 1..)]
    pub wrapper_command: Vec<String>,

    /// Seconds to wait for the first byte of output
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub silence_timeout: u64,

    /// Hard limit on a session's total run time, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    pub ceiling_timeout: u64,

    /// Seconds of SSE inactivity before a heartbeat comment is sent
    #[arg(long, value_name = "SECS", default_value_t = 15)]
    pub heartbeat_interval: u64,

    /// Seconds a dropped stream stays resumable before its session is cancelled
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub resume_window: u64,

    /// Model used when a request does not name one
    #[arg(long, value_name = "MODEL")]
    pub default_model: Option<String>,

    /// Permission mode used when a request does not name one
    #[arg(long, value_name = "MODE")]
    pub default_permission_mode: Option<String>,

    /// Enable diagnostic mode (auto-log to temp file)
    #[arg(short, long)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long)]
    pub quiet: bool,

    /// OpenTelemetry OTLP endpoint (e.g., http://localhost:4317)
    /// When otel feature is disabled, this argument is accepted but ignored.
    #[arg(long, value_name = "URL", env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    /// OpenTelemetry service name
    #[arg(long, value_name = "NAME", default_value = SERVICE_NAME)]
    pub otel_service_name: String,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.parse().unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787))),
            backend: Backend::Cli,
            claude_binary: "claude".to_string(),
            shell: None,
            wrapper_command: Vec::new(),
            silence_timeout: 30,
            ceiling_timeout: 300,
            heartbeat_interval: 15,
            resume_window: 30,
            default_model: None,
            default_permission_mode: None,
            diagnostic: false,
            log_dir: None,
            log_file: None,
            verbose: 0,
            quiet: false,
            otel_endpoint: None,
            otel_service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    ///
    /// Returns true if `--diagnostic` is set, or if `--log-dir` or `--log-file` is specified.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    #[cfg(feature = "otel")]
    pub fn is_otel_enabled(&self) -> bool {
        self.otel_endpoint.is_some()
    }

    /// Always false without the otel feature
    #[cfg(not(feature = "otel"))]
    pub fn is_otel_enabled(&self) -> bool {
        if self.otel_endpoint.is_some() {
            tracing::warn!("--otel-endpoint specified but otel feature is not enabled, ignoring");
        }
        false
    }

    /// Get the log level based on CLI arguments
    ///
    /// - `--quiet`: ERROR
    /// - default: INFO
    /// - `-v`: DEBUG
    /// - `-vv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Defaults to `claude-stream-bridge-{timestamp}.log` in the system temp
    /// directory.
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("{SERVICE_NAME}-{timestamp}.log")
        });

        dir.join(filename)
    }

    /// Build the bridge configuration from flags and the environment
    pub fn to_config(&self) -> Result<BridgeConfig> {
        if self.silence_timeout == 0 || self.ceiling_timeout == 0 || self.heartbeat_interval == 0 {
            return Err(BridgeError::config_error("timeouts must be at least one second"));
        }
        if self.backend == Backend::DirectApi && self.wrapper_command.is_empty() {
            return Err(BridgeError::config_error(
                "--wrapper-command is required with the direct-api backend",
            ));
        }

        let mut config = BridgeConfig::from_env();
        config.backend = self.backend;
        config.claude_binary.clone_from(&self.claude_binary);
        if let Some(ref shell) = self.shell {
            config.shell.clone_from(shell);
        }
        config.wrapper_command.clone_from(&self.wrapper_command);
        config.silence_timeout = Duration::from_secs(self.silence_timeout);
        config.ceiling_timeout = Duration::from_secs(self.ceiling_timeout);
        config.heartbeat_interval = Duration::from_secs(self.heartbeat_interval);
        config.resume_window = Duration::from_secs(self.resume_window);
        config.defaults.model.clone_from(&self.default_model);
        config.defaults.permission_mode = match self.default_permission_mode {
            Some(ref mode) => Some(PermissionMode::parse(mode).ok_or_else(|| {
                BridgeError::config_error(format!("unknown permission mode: {mode}"))
            })?),
            None => None,
        };

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cli() {
        let cli = Cli::default();
        assert!(!cli.is_diagnostic());
        assert_eq!(cli.log_level(), tracing::Level::INFO);
        assert_eq!(cli.bind.port(), 8787);
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "claude-stream-bridge",
            "--bind",
            "0.0.0.0:9000",
            "--backend",
            "direct-api",
            "--wrapper-command",
            "node",
            "wrapper.js",
            "--silence-timeout",
            "5",
            "--resume-window",
            "0",
        ])
        .unwrap();
        assert_eq!(cli.bind.port(), 9000);
        assert_eq!(cli.backend, Backend::DirectApi);
        assert_eq!(cli.wrapper_command, vec!["node", "wrapper.js"]);
        assert_eq!(cli.silence_timeout, 5);
        assert_eq!(cli.ceiling_timeout, 300);
        assert_eq!(cli.resume_window, 0);
    }

    #[test]
    fn test_log_dir_implies_diagnostic() {
        let cli = Cli {
            log_dir: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        assert!(cli.is_diagnostic());

        let cli = Cli {
            log_file: Some("test.log".to_string()),
            ..Default::default()
        };
        assert!(cli.is_diagnostic());
    }

    #[test]
    fn test_log_levels() {
        let cli = Cli {
            quiet: true,
            ..Default::default()
        };
        assert_eq!(cli.log_level(), tracing::Level::ERROR);

        let cli = Cli {
            verbose: 1,
            ..Default::default()
        };
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);

        let cli = Cli {
            verbose: 3,
            ..Default::default()
        };
        assert_eq!(cli.log_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_log_path_default_generates_timestamp() {
        let path = Cli::default().log_path();
        assert!(path.starts_with(std::env::temp_dir()));

        let filename = path.file_name().unwrap().to_str().unwrap();
        assert!(filename.starts_with("claude-stream-bridge-"));
        assert!(filename.ends_with(".log"));
    }

    #[test]
    fn test_to_config() {
        let cli = Cli {
            shell: Some("/bin/bash".to_string()),
            ceiling_timeout: 60,
            default_model: Some("opus".to_string()),
            default_permission_mode: Some("plan".to_string()),
            ..Default::default()
        };
        let config = cli.to_config().unwrap();
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.ceiling_timeout, Duration::from_secs(60));
        assert_eq!(config.defaults.model.as_deref(), Some("opus"));
        assert_eq!(config.defaults.permission_mode, Some(PermissionMode::Plan));
    }

    #[test]
    fn test_to_config_rejects_bad_values() {
        let cli = Cli {
            default_permission_mode: Some("yolo".to_string()),
            ..Default::default()
        };
        assert!(matches!(cli.to_config(), Err(BridgeError::ConfigError(_))));

        let cli = Cli {
            backend: Backend::DirectApi,
            ..Default::default()
        };
        assert!(cli.to_config().is_err());

        let cli = Cli {
            silence_timeout: 0,
            ..Default::default()
        };
        assert!(cli.to_config().is_err());
    }
}
