//! Child process launching for both backends
//!
//! The CLI backend runs `claude -p --verbose --output-format stream-json ...`
//! through a login shell so the user's PATH resolves the binary, writes the
//! prompt as the first stdin line and keeps stdin open for permission
//! responses. The direct API backend runs a wrapper command with a single
//! JSON argument and no stdin.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use process_wrap::tokio::{CommandWrap, KillOnDrop, ProcessGroup};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};

use super::WrappedChild;
use crate::types::{BridgeConfig, BridgeError, ExecutionOptions, PermissionMode, Result};

/// How long the availability probe may take
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Which child process carries a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Backend {
    /// Lightweight wrapper calling the API directly; stdin closed at spawn
    DirectApi,
    /// The full Claude Code CLI; stdin stays open
    #[default]
    Cli,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectApi => "direct-api",
            Self::Cli => "cli",
        }
    }

    /// Whether the child accepts permission responses on stdin
    pub fn supports_stdin(&self) -> bool {
        matches!(self, Self::Cli)
    }
}

/// A freshly spawned child with its pipes split out
#[derive(Debug)]
pub struct LaunchedChild {
    pub child: WrappedChild,
    pub pid: u32,
    /// Present only for the CLI backend
    pub stdin: Option<ChildStdin>,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Result of `claude --version`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Serialize)]
struct DirectApiPayload<'a> {
    prompt: &'a str,
    options: &'a ExecutionOptions,
}

/// Builds and spawns child processes
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: Arc<BridgeConfig>,
}

impl ProcessLauncher {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self { config }
    }

    pub fn backend(&self) -> Backend {
        self.config.backend
    }

    /// Spawn the child for one invocation
    ///
    /// On success the child is already a process-group leader and, for the
    /// CLI backend, the prompt line has been written to its stdin.
    #[tracing::instrument(skip(self, prompt, options), fields(backend = self.config.backend.as_str()))]
    pub async fn launch(
        &self,
        prompt: &str,
        cwd: Option<&Path>,
        options: &ExecutionOptions,
    ) -> Result<LaunchedChild> {
        let (program, command) = self.build_command(prompt, cwd, options)?;

        let mut wrapped = CommandWrap::from(command);
        wrapped.wrap(ProcessGroup::leader());
        wrapped.wrap(KillOnDrop);

        let inner = wrapped
            .spawn()
            .map_err(|e| BridgeError::launch(program.clone(), e))?;
        let mut child = WrappedChild::new(inner);
        let pid = child.id();

        let (Some(stdout), Some(stderr)) = (child.take_stdout(), child.take_stderr()) else {
            // Pipes were requested; a missing one means the spawn is unusable
            if let Err(e) = child.start_kill() {
                tracing::warn!(pid, error = %e, "Failed to kill unusable child");
            }
            return Err(BridgeError::launch(
                program,
                std::io::Error::other("child pipes unavailable"),
            ));
        };

        let mut stdin = child.take_stdin();
        if let Some(writer) = stdin.as_mut() {
            if let Err(e) = write_prompt(writer, prompt).await {
                // The child died before reading; its exit status tells the rest
                tracing::warn!(pid, error = %e, "Failed to write prompt to stdin");
                stdin = None;
            }
        }

        tracing::info!(
            pid,
            program = %program,
            cwd = ?cwd,
            has_stdin = stdin.is_some(),
            "Spawned child process"
        );

        Ok(LaunchedChild {
            child,
            pid,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Build the OS command without spawning it
    ///
    /// Returns the program name used in launch errors alongside the command.
    pub fn build_command(
        &self,
        prompt: &str,
        cwd: Option<&Path>,
        options: &ExecutionOptions,
    ) -> Result<(String, Command)> {
        let (program, mut command) = match self.config.backend {
            Backend::Cli => {
                let line = self.command_line(options);
                tracing::debug!(command_line = %line, "Built CLI command line");

                let mut command = Command::new(&self.config.shell);
                command.arg("-l").arg("-c").arg(line);
                command.stdin(Stdio::piped());
                (self.config.claude_binary.clone(), command)
            }
            Backend::DirectApi => {
                let Some((program, leading)) = self.config.wrapper_command.split_first() else {
                    return Err(BridgeError::launch(
                        "direct-api wrapper",
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "no wrapper command configured",
                        ),
                    ));
                };
                let payload = serde_json::to_string(&DirectApiPayload { prompt, options })?;

                let mut command = Command::new(program);
                command.args(leading).arg(payload);
                command.stdin(Stdio::null());
                (program.clone(), command)
            }
        };

        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(self.config.provider.to_env_vars());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        Ok((program, command))
    }

    /// Full shell command line for the CLI backend
    pub fn command_line(&self, options: &ExecutionOptions) -> String {
        let mut parts = vec![shell_escape(&self.config.claude_binary)];
        parts.extend(build_cli_args(options));
        parts.join(" ")
    }

    /// Check whether the CLI is installed and report its version
    pub async fn probe(&self) -> ProbeResult {
        if self.config.backend == Backend::DirectApi {
            return ProbeResult {
                available: !self.config.wrapper_command.is_empty(),
                version: None,
            };
        }

        let line = format!("{} --version", shell_escape(&self.config.claude_binary));
        let mut command = Command::new(&self.config.shell);
        command
            .arg("-l")
            .arg("-c")
            .arg(line)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                ProbeResult {
                    available: true,
                    version: (!version.is_empty()).then_some(version),
                }
            }
            Ok(Ok(output)) => {
                tracing::debug!(status = ?output.status, "CLI probe exited unsuccessfully");
                ProbeResult::default()
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "CLI probe failed to spawn");
                ProbeResult::default()
            }
            Err(_) => {
                tracing::warn!(timeout_secs = PROBE_TIMEOUT.as_secs(), "CLI probe timed out");
                ProbeResult::default()
            }
        }
    }
}

async fn write_prompt(stdin: &mut ChildStdin, prompt: &str) -> std::io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    if !prompt.ends_with('\n') {
        stdin.write_all(b"\n").await?;
    }
    stdin.flush().await
}

/// CLI arguments (already shell-escaped) for the given options
pub fn build_cli_args(options: &ExecutionOptions) -> Vec<String> {
    let mut args: Vec<String> = ["-p", "--verbose", "--output-format", "stream-json"]
        .into_iter()
        .map(String::from)
        .collect();

    let mut flag = |name: &str, value: Option<&str>| {
        args.push(name.to_string());
        if let Some(v) = value {
            args.push(shell_escape(v));
        }
    };

    if let Some(turns) = options.max_turns {
        flag("--max-turns", Some(&turns.to_string()));
    }
    if let Some(ref model) = options.model {
        flag("--model", Some(model));
    }
    if let Some(ref model) = options.fallback_model {
        flag("--fallback-model", Some(model));
    }
    match options.permission_mode {
        None | Some(PermissionMode::BypassPermissions) => {
            flag("--dangerously-skip-permissions", None);
        }
        Some(mode) => flag("--permission-mode", Some(mode.as_str())),
    }
    if let Some(ref id) = options.resume {
        flag("--resume", Some(id));
    }
    if options.continue_conversation == Some(true) {
        flag("--continue", None);
    }
    if options.fork_session == Some(true) {
        flag("--fork-session", None);
    }
    if let Some(ref id) = options.session_id {
        flag("--session-id", Some(id));
    }
    if let Some(ref prompt) = options.system_prompt {
        flag("--system-prompt", Some(prompt));
    }
    if let Some(ref path) = options.system_prompt_file {
        flag("--system-prompt-file", Some(path));
    }
    if let Some(ref prompt) = options.append_system_prompt {
        flag("--append-system-prompt", Some(prompt));
    }
    if let Some(ref path) = options.append_system_prompt_file {
        flag("--append-system-prompt-file", Some(path));
    }
    if let Some(budget) = options.max_budget_usd {
        flag("--max-budget-usd", Some(&format!("{budget:.2}")));
    }
    if options.include_partial_messages == Some(true) {
        flag("--include-partial-messages", None);
    }
    if options.no_session_persistence == Some(true) {
        flag("--no-session-persistence", None);
    }
    for dir in options.add_dirs.iter().flatten() {
        flag("--add-dir", Some(dir));
    }
    if let Some(ref tools) = options.allowed_tools {
        flag("--allowedTools", Some(&tools.join(",")));
    }
    if let Some(ref tools) = options.disallowed_tools {
        flag("--disallowedTools", Some(&tools.join(",")));
    }
    if let Some(ref tools) = options.tools {
        flag("--tools", Some(&tools.join(",")));
    }
    if let Some(ref schema) = options.json_schema {
        flag("--json-schema", Some(schema));
    }
    if let Some(ref config) = options.mcp_config {
        flag("--mcp-config", Some(config));
    }
    if options.strict_mcp_config == Some(true) {
        flag("--strict-mcp-config", None);
    }
    if let Some(ref agents) = options.custom_agents {
        flag("--agents", Some(agents));
    }
    if let Some(ref agent) = options.agent {
        flag("--agent", Some(agent));
    }
    if let Some(ref betas) = options.betas {
        flag("--betas", Some(&betas.join(",")));
    }
    if let Some(ref format) = options.input_format {
        flag("--input-format", Some(format));
    }
    if let Some(ref path) = options.settings_path {
        flag("--settings", Some(path));
    }
    if let Some(ref dir) = options.plugin_dir {
        flag("--plugin-dir", Some(dir));
    }
    if options.disable_slash_commands == Some(true) {
        flag("--disable-slash-commands", None);
    }
    if options.debug == Some(true) {
        flag("--debug", None);
    }
    if let Some(ref path) = options.debug_file {
        flag("--debug-file", Some(path));
    }

    args
}

/// Quote a value for a POSIX shell when it is not a plain word
///
/// Plain words pass through untouched. Anything else is wrapped in single
/// quotes, with embedded single quotes written as `'\''`.
pub fn shell_escape(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-+=@%:,./".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn launcher(backend: Backend) -> ProcessLauncher {
        ProcessLauncher::new(Arc::new(BridgeConfig {
            backend,
            claude_binary: "claude".to_string(),
            wrapper_command: vec!["node".to_string(), "wrapper.js".to_string()],
            ..Default::default()
        }))
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("sonnet"), "sonnet");
        assert_eq!(shell_escape("/tmp/dir-1"), "/tmp/dir-1");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("be brief"), "'be brief'");
        assert_eq!(shell_escape("it's"), r"'it'\''s'");
        assert_eq!(shell_escape("say \"hi\""), "'say \"hi\"'");
        assert_eq!(shell_escape("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_base_args_and_default_permission() {
        let args = build_cli_args(&ExecutionOptions::new());
        assert_eq!(
            args,
            vec![
                "-p",
                "--verbose",
                "--output-format",
                "stream-json",
                "--dangerously-skip-permissions"
            ]
        );
    }

    #[test]
    fn test_flags_follow_options() {
        let options = ExecutionOptions {
            max_turns: Some(3),
            model: Some("sonnet".into()),
            permission_mode: Some(PermissionMode::AcceptEdits),
            resume: Some("abc".into()),
            fork_session: Some(true),
            system_prompt: Some("You are terse".into()),
            max_budget_usd: Some(1.5),
            add_dirs: Some(vec!["/a".into(), "/b c".into()]),
            allowed_tools: Some(vec!["Read".into(), "Bash(git log:*)".into()]),
            include_partial_messages: Some(false),
            ..Default::default()
        };
        let line = build_cli_args(&options).join(" ");

        assert_eq!(
            line,
            "-p --verbose --output-format stream-json --max-turns 3 --model sonnet \
             --permission-mode acceptEdits --resume abc --fork-session \
             --system-prompt 'You are terse' --max-budget-usd 1.50 \
             --add-dir /a --add-dir '/b c' --allowedTools 'Read,Bash(git log:*)'"
        );
    }

    #[test]
    fn test_bypass_mode_uses_skip_flag() {
        let options = ExecutionOptions::new().with_permission_mode(PermissionMode::BypassPermissions);
        let args = build_cli_args(&options);
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(!args.contains(&"--permission-mode".to_string()));
    }

    #[test]
    fn test_command_line_escapes_binary() {
        let launcher = ProcessLauncher::new(Arc::new(BridgeConfig {
            claude_binary: "/opt/my tools/claude".into(),
            ..Default::default()
        }));
        let line = launcher.command_line(&ExecutionOptions::new());
        assert!(line.starts_with("'/opt/my tools/claude' -p --verbose"));
    }

    #[test]
    fn test_cli_command_runs_through_login_shell() {
        let (program, command) = launcher(Backend::Cli)
            .build_command("hello", None, &ExecutionOptions::new())
            .unwrap();
        assert_eq!(program, "claude");

        let std_cmd = command.as_std();
        assert_eq!(std_cmd.get_program(), "/bin/sh");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args[0], "-l");
        assert_eq!(args[1], "-c");
        assert!(args[2].starts_with("claude -p --verbose --output-format stream-json"));
        assert!(!args[2].contains("hello"));
    }

    #[test]
    fn test_direct_api_passes_json_argument() {
        let options = ExecutionOptions::new().with_model("haiku");
        let (program, command) = launcher(Backend::DirectApi)
            .build_command("hi there", None, &options)
            .unwrap();
        assert_eq!(program, "node");

        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], "wrapper.js");
        let payload: serde_json::Value = serde_json::from_str(&args[1]).unwrap();
        assert_eq!(payload["prompt"], "hi there");
        assert_eq!(payload["options"]["model"], "haiku");
    }

    #[test]
    fn test_direct_api_without_wrapper_is_launch_error() {
        let launcher = ProcessLauncher::new(Arc::new(BridgeConfig {
            backend: Backend::DirectApi,
            ..Default::default()
        }));
        let err = launcher
            .build_command("x", None, &ExecutionOptions::new())
            .unwrap_err();
        assert_eq!(err.error_code().as_str(), "LAUNCH_ERROR");
    }

    #[tokio::test]
    async fn test_launch_missing_program_is_launch_error() {
        let launcher = ProcessLauncher::new(Arc::new(BridgeConfig {
            backend: Backend::DirectApi,
            wrapper_command: vec!["/nonexistent/bridge-wrapper".into()],
            ..Default::default()
        }));
        let err = launcher
            .launch("x", None, &ExecutionOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_probe_reports_version() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(&script, "#!/bin/sh\necho '2.0.1 (Claude Code)'\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let launcher = ProcessLauncher::new(Arc::new(BridgeConfig {
            claude_binary: script.to_string_lossy().into_owned(),
            ..Default::default()
        }));
        let probe = launcher.probe().await;
        assert!(probe.available);
        assert_eq!(probe.version.as_deref(), Some("2.0.1 (Claude Code)"));

        let missing = ProcessLauncher::new(Arc::new(BridgeConfig {
            claude_binary: dir.path().join("absent").to_string_lossy().into_owned(),
            ..Default::default()
        }));
        assert_eq!(missing.probe().await, ProbeResult::default());
    }
}
