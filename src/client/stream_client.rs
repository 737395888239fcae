//! Reconnecting stream consumer
//!
//! One [`StreamClient::send`] call is one logical response. After a transient
//! network failure the client re-attaches to the session the server named in
//! `x-session-id`, sending the id of the last event it yielded as
//! `Last-Event-ID`. The server resumes from there without running the prompt
//! again. Events whose id the caller already has are dropped, except errors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::{ClientError, TransportError};
use super::parser::{ParsedFrame, parse_frame};
use super::state::ConnectionState;
use super::transport::EventTransport;
use crate::converter::StreamEvent;
use crate::server::StreamRequest;
use crate::session::PermissionDecision;

/// Reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after consecutive network failures
    pub max_retries: u32,
    /// Attempt `n` waits `base_delay * n`
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug)]
pub struct StreamClient<T> {
    transport: Arc<T>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: Mutex<CancellationToken>,
}

impl<T: EventTransport> StreamClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_policy(transport, ReconnectPolicy::default())
    }

    pub fn with_policy(transport: T, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport: Arc::new(transport),
            policy,
            state: Arc::new(state),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Stop every stream started so far
    ///
    /// Streams end without an error and the state becomes `Disconnected`.
    /// Streams started afterwards are unaffected.
    pub fn cancel(&self) {
        let previous = match self.cancel.lock() {
            Ok(mut token) => std::mem::take(&mut *token),
            Err(_) => return,
        };
        previous.cancel();
        set_state(&self.state, ConnectionState::Disconnected);
        tracing::debug!("Stream client cancelled");
    }

    fn stream_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .map(|token| token.child_token())
            .unwrap_or_default()
    }

    /// Start one logical response
    ///
    /// The stream yields events until the server's `done` frame, an
    /// unrecoverable error (yielded once, then the stream ends) or
    /// [`cancel`](Self::cancel).
    pub fn send(
        &self,
        request: StreamRequest,
    ) -> impl Stream<Item = Result<StreamEvent, ClientError>> + Send + 'static {
        let transport = Arc::clone(&self.transport);
        let state = Arc::clone(&self.state);
        let cancel = self.stream_token();
        let policy = self.policy;

        async_stream::stream! {
            // Highest frame id yielded so far
            let mut last_id: u64 = 0;
            // Session to re-attach to, learned from the first connection
            let mut resume: Option<StreamRequest> = None;
            let mut failures: u32 = 0;
            set_state(&state, ConnectionState::Connecting);

            loop {
                let (current, resume_from) = match &resume {
                    Some(resumed) => (resumed, Some(last_id)),
                    None => (&request, None),
                };
                let opened = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    opened = transport.open(current, resume_from) => opened,
                };

                let failure = match opened {
                    Err(e) => e,
                    Ok(opened) => {
                        set_state(&state, ConnectionState::Connected);
                        tracing::debug!(
                            session_id = ?opened.session_id,
                            resume_from,
                            "Stream connected"
                        );
                        if resume.is_none() {
                            resume = opened
                                .session_id
                                .map(|id| request.clone().with_session_id(id));
                        }

                        let mut frames = opened.frames;
                        let failure = loop {
                            let next = tokio::select! {
                                biased;
                                () = cancel.cancelled() => None,
                                next = frames.next() => Some(next),
                            };
                            let Some(next) = next else {
                                break None;
                            };

                            let frame = match next {
                                Some(Ok(frame)) => frame,
                                Some(Err(e)) => break Some(e),
                                None => break Some(TransportError::network(
                                    "connection closed before the done frame",
                                )),
                            };

                            match parse_frame(&frame) {
                                Ok(ParsedFrame::Done) => {
                                    tracing::debug!(last_id, "Stream complete");
                                    set_state(&state, ConnectionState::Disconnected);
                                    return;
                                }
                                Ok(ParsedFrame::Event(event)) => {
                                    failures = 0;
                                    match frame.id.parse::<u64>() {
                                        // Already yielded; errors always surface
                                        Ok(id) if id <= last_id && !event.is_error() => {
                                            tracing::debug!(id, last_id, "Skipping replayed event");
                                            continue;
                                        }
                                        Ok(id) => last_id = last_id.max(id),
                                        Err(_) => {}
                                    }
                                    yield Ok(event);
                                }
                                Err(e) => break Some(e),
                            }
                        };

                        match failure {
                            Some(e) => e,
                            // Cancelled mid-stream
                            None => break,
                        }
                    }
                };

                if !failure.is_retryable() {
                    tracing::warn!(error = %failure, "Stream failed");
                    set_state(&state, ConnectionState::Disconnected);
                    yield Err(ClientError::Transport(failure));
                    return;
                }

                failures += 1;
                if failures > policy.max_retries {
                    tracing::warn!(
                        error = %failure,
                        attempts = policy.max_retries,
                        "Reconnect attempts exhausted"
                    );
                    set_state(&state, ConnectionState::Disconnected);
                    yield Err(ClientError::RetriesExhausted {
                        attempts: policy.max_retries,
                        source: failure,
                    });
                    return;
                }

                let delay = policy.delay_for(failures);
                tracing::info!(
                    attempt = failures,
                    delay_ms = delay.as_millis(),
                    last_id,
                    resumable = resume.is_some(),
                    error = %failure,
                    "Reconnecting"
                );
                set_state(&state, ConnectionState::Reconnecting { attempt: failures, delay });

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }

            set_state(&state, ConnectionState::Disconnected);
        }
    }

    /// Answer a permission prompt; `false` when the session is gone
    pub async fn post_decision(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> Result<bool, ClientError> {
        Ok(self
            .transport
            .post_decision(session_id, request_id, decision)
            .await?)
    }

    /// Ask the server to stop a session
    pub async fn cancel_session(&self, session_id: &str) -> Result<bool, ClientError> {
        Ok(self.transport.cancel_session(session_id).await?)
    }
}

fn set_state(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = state.send_replace(next);
    if previous != next {
        tracing::trace!(from = previous.as_str(), to = next.as_str(), "Connection state");
    }
}
