//! Per-session pipeline
//!
//! One call to [`Executor::execute`] spawns the child, registers it and
//! starts three tasks:
//! - a stdout reader (framing, decoding, event delivery),
//! - a stderr collector,
//! - the supervisor, which owns the child, the timers and the wait.
//!
//! The caller receives events on a bounded channel. The channel closes after
//! the terminal error event (if any); a clean exit or a cancellation closes
//! it without one.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Sleep, sleep};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::registry::{LiveSession, SessionRegistry, StdinWriter};
use super::state::SessionState;
use crate::converter::{LineFramer, MessageConverter, StreamEvent};
use crate::process::{
    LaunchedChild, ProcessLauncher, TimeoutSupervisor, WrappedChild, signal_group,
};
use crate::tracing::ErrorTraceExt;
use crate::types::{BridgeConfig, BridgeError, ExecutionOptions, Result};

/// Events buffered between the reader and the consumer
const EVENT_BUFFER: usize = 256;
const READ_CHUNK: usize = 8192;
/// Stderr kept for error reporting; the rest is drained and dropped
const STDERR_LIMIT: usize = 64 * 1024;
/// Stderr characters carried in a process error message
const STDERR_MESSAGE_CHARS: usize = 200;
/// How long to wait for pipes to close once the child has exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One invocation request
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub prompt: String,
    pub working_directory: Option<PathBuf>,
    pub options: ExecutionOptions,
}

impl ExecutionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Consumer side of a running session
#[derive(Debug)]
pub struct SessionHandle {
    /// Registry key for cancel and permission calls
    pub session_id: String,
    pub events: mpsc::Receiver<StreamEvent>,
    /// Cancelling this stops the session the same way a cancel request does
    pub cancel: CancellationToken,
}

#[derive(Debug, Default, Clone, Copy)]
struct ReaderStats {
    bytes: u64,
    events: u64,
    skipped: u64,
}

/// Runs sessions against the configured backend
#[derive(Debug, Clone)]
pub struct Executor {
    config: Arc<BridgeConfig>,
    launcher: ProcessLauncher,
    registry: Arc<SessionRegistry>,
}

impl Executor {
    pub fn new(config: Arc<BridgeConfig>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            launcher: ProcessLauncher::new(Arc::clone(&config)),
            config,
            registry,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn launcher(&self) -> &ProcessLauncher {
        &self.launcher
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Start one session
    ///
    /// Only an empty prompt is rejected up front. Launch failures and busy
    /// session ids are reported as a single terminal error event on the
    /// returned handle.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<SessionHandle> {
        if request.prompt.trim().is_empty() {
            return Err(BridgeError::EmptyPrompt);
        }

        let options = self.config.resolve_options(request.options);
        let session_id = options
            .session_id
            .clone()
            .or_else(|| options.resume.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            session_id: session_id.clone(),
            events: rx,
            cancel: cancel.clone(),
        };

        // `register` repeats this check atomically
        if self.registry.get(&session_id).is_some() {
            let err = BridgeError::session_busy(&session_id);
            err.trace_error();
            send_terminal(&tx, &err);
            return Ok(handle);
        }

        let launched = match self
            .launcher
            .launch(
                &request.prompt,
                request.working_directory.as_deref(),
                &options,
            )
            .await
        {
            Ok(launched) => launched,
            Err(e) => {
                e.trace_error();
                send_terminal(&tx, &e);
                return Ok(handle);
            }
        };

        let LaunchedChild {
            mut child,
            pid,
            stdin,
            stdout,
            stderr,
        } = launched;

        let stdin = stdin.map(|s| Box::new(s) as StdinWriter);
        let session = match self
            .registry
            .register(&session_id, pid, stdin, cancel.clone())
        {
            Ok(session) => session,
            Err(e) => {
                e.trace_error();
                // Never registered; reap the new child in the background
                tokio::spawn(async move {
                    if let Err(err) = child.kill().await {
                        tracing::warn!(pid, error = %err, "Failed to reap rejected child");
                    }
                });
                send_terminal(&tx, &e);
                return Ok(handle);
            }
        };

        let span = tracing::info_span!("session", session_id = %session_id, pid);
        let supervisor = Supervisor {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            session,
        };
        tokio::spawn(supervisor.run(child, stdout, stderr, tx).instrument(span));

        Ok(handle)
    }
}

fn send_terminal(tx: &mpsc::Sender<StreamEvent>, err: &BridgeError) {
    if let Err(e) = tx.try_send(StreamEvent::from(err)) {
        tracing::debug!(error = %e, "Terminal event not delivered");
    }
}

struct Supervisor {
    config: Arc<BridgeConfig>,
    registry: Arc<SessionRegistry>,
    session: Arc<LiveSession>,
}

impl Supervisor {
    async fn run(
        self,
        mut child: WrappedChild,
        stdout: ChildStdout,
        stderr: ChildStderr,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let pid = self.session.pid;
        let cancel = self.session.cancel_token().clone();

        let (first_byte_tx, first_byte_rx) = oneshot::channel();
        let mut reader = tokio::spawn(
            read_stdout(stdout, tx.clone(), Arc::clone(&self.session), first_byte_tx)
                .in_current_span(),
        );
        let mut stderr_task = tokio::spawn(collect_stderr(stderr).in_current_span());

        let mut timers =
            TimeoutSupervisor::new(self.config.silence_timeout, self.config.ceiling_timeout);
        timers.watch_first_byte(first_byte_rx);
        let mut cancelling = false;
        let mut escalation: Option<(Pin<Box<Sleep>>, Signal)> = None;

        let status = {
            let wait = child.wait();
            tokio::pin!(wait);

            loop {
                tokio::select! {
                    biased;

                    status = &mut wait => break status,

                    kind = timers.expired() => {
                        self.session.set_state(SessionState::TimedOut { kind });
                        tracing::warn!(
                            kind = kind.as_str(),
                            elapsed_ms = self.session.elapsed_ms(),
                            "Timeout fired, killing process group"
                        );
                        send_signal(pid, Signal::SIGKILL);
                    }

                    () = cancel.cancelled(), if !cancelling => {
                        cancelling = true;
                        if self.session.state().is_live() {
                            self.session.set_state(SessionState::Cancelling);
                        }
                        tracing::info!("Cancelling session, sending SIGINT");
                        send_signal(pid, Signal::SIGINT);
                        escalation = Some((Box::pin(sleep(self.config.cancel_grace)), Signal::SIGTERM));
                    }

                    signal = next_escalation(&mut escalation), if escalation.is_some() => {
                        tracing::info!(signal = %signal, "Process still alive after grace period");
                        send_signal(pid, signal);
                        if signal == Signal::SIGTERM {
                            escalation = Some((Box::pin(sleep(self.config.cancel_grace)), Signal::SIGKILL));
                        }
                    }
                }
            }
        };

        // Pipes close once the whole group is gone; a lingering grandchild
        // must not hold the session open
        let stats = match tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Stdout reader task failed");
                ReaderStats::default()
            }
            Err(_) => {
                tracing::warn!("Stdout still open after exit, abandoning reader");
                reader.abort();
                ReaderStats::default()
            }
        };
        let stderr_text = match tokio::time::timeout(DRAIN_TIMEOUT, &mut stderr_task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Stderr collector task failed");
                String::new()
            }
            Err(_) => {
                stderr_task.abort();
                String::new()
            }
        };

        let exit_code = status.as_ref().ok().and_then(exit_code_of);
        let outcome = classify_exit(
            &timers,
            cancel.is_cancelled(),
            &status,
            stats.bytes > 0,
            &stderr_text,
        );

        if self.session.state().is_live() {
            self.session
                .set_state(SessionState::Exited { code: exit_code });
        }
        self.registry
            .deregister(&self.session.session_id, self.session.generation);

        tracing::info!(
            exit_code = ?exit_code,
            elapsed_ms = self.session.elapsed_ms(),
            stdout_bytes = stats.bytes,
            events = stats.events,
            skipped_lines = stats.skipped,
            cancelled = cancel.is_cancelled(),
            error_code = outcome.as_ref().map(|e| e.error_code().as_str()),
            "Session finished"
        );

        if let Some(err) = outcome {
            err.trace_error();
            if tx.send(StreamEvent::from(&err)).await.is_err() {
                tracing::debug!("Consumer gone before terminal event");
            }
        }
    }
}

async fn next_escalation(slot: &mut Option<(Pin<Box<Sleep>>, Signal)>) -> Signal {
    match slot.as_mut() {
        Some((timer, signal)) => {
            timer.as_mut().await;
            let signal = *signal;
            *slot = None;
            signal
        }
        None => std::future::pending().await,
    }
}

fn send_signal(pid: u32, signal: Signal) {
    if let Err(e) = signal_group(pid, signal) {
        tracing::warn!(pid, signal = %signal, error = %e, "Failed to signal process group");
    }
}

fn exit_code_of(status: &ExitStatus) -> Option<i32> {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
}

/// Decide the terminal error for a finished process
///
/// A fired ceiling wins, then silence. Cancellation never produces an
/// error. Without an exit code (killed by a signal we did not send) the
/// exit counts as failed only when stdout was empty and stderr was not;
/// this is an approximation.
fn classify_exit(
    timers: &TimeoutSupervisor,
    cancelled: bool,
    status: &std::io::Result<ExitStatus>,
    saw_output: bool,
    stderr: &str,
) -> Option<BridgeError> {
    if let Some(kind) = timers.outcome() {
        return Some(timers.error_for(kind));
    }
    if cancelled {
        return None;
    }

    let status = match status {
        Ok(status) => status,
        Err(e) => {
            return Some(BridgeError::streaming_error(format!(
                "failed to wait for child: {e}"
            )));
        }
    };
    if status.success() {
        return None;
    }

    let stderr = stderr.trim();
    match status.code() {
        Some(code) => Some(BridgeError::ProcessExit {
            code,
            stderr: truncate_chars(stderr, STDERR_MESSAGE_CHARS),
        }),
        None if !saw_output && !stderr.is_empty() => Some(BridgeError::ProcessExit {
            code: exit_code_of(status).unwrap_or(-1),
            stderr: truncate_chars(stderr, STDERR_MESSAGE_CHARS),
        }),
        None => None,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

async fn read_stdout(
    mut stdout: ChildStdout,
    tx: mpsc::Sender<StreamEvent>,
    session: Arc<LiveSession>,
    first_byte: oneshot::Sender<()>,
) -> ReaderStats {
    let cancel = session.cancel_token().clone();
    let mut first_byte = Some(first_byte);
    let mut framer = LineFramer::new();
    let mut converter = MessageConverter::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut stats = ReaderStats::default();
    let mut reached_eof = false;

    'read: loop {
        let n = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            read = stdout.read(&mut buf) => match read {
                Ok(0) => {
                    reached_eof = true;
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "Stdout read failed");
                    break;
                }
            },
        };

        stats.bytes += n as u64;
        if let Some(signal) = first_byte.take() {
            if signal.send(()).is_err() {
                tracing::trace!("Supervisor gone before first byte");
            }
        }

        for line in framer.push(&buf[..n]) {
            if !deliver(&tx, &session, &mut converter, &line, &mut stats).await {
                cancel.cancel();
                break 'read;
            }
        }
    }

    if reached_eof {
        if let Some(line) = framer.finish() {
            deliver(&tx, &session, &mut converter, &line, &mut stats).await;
        }
    }

    stats.skipped = converter.skipped();
    stats
}

/// Convert and send one line; `false` when the consumer is gone
async fn deliver(
    tx: &mpsc::Sender<StreamEvent>,
    session: &LiveSession,
    converter: &mut MessageConverter,
    line: &str,
    stats: &mut ReaderStats,
) -> bool {
    let Some(event) = converter.convert_line(line) else {
        return true;
    };

    if let StreamEvent::Permission(ref request) = event {
        session.await_permission(&request.request_id);
        tracing::info!(
            request_id = %request.request_id,
            tool_name = %request.tool_name,
            "Awaiting permission decision"
        );
    }

    if tx.send(event).await.is_err() {
        tracing::info!("Event consumer dropped, cancelling session");
        return false;
    }
    stats.events += 1;
    true
}

async fn collect_stderr<R: AsyncRead + Unpin>(mut stderr: R) -> String {
    let mut kept = Vec::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = STDERR_LIMIT.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stderr read failed");
                break;
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}
