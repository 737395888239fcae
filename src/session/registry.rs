//! Registry of live child processes
//!
//! Uses DashMap with the entry API so every mutation for one session id
//! (register, cancel, permission forward, exit cleanup) goes through that
//! id's single entry. There is no cross-session lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use super::permission::{PermissionDecision, write_permission_response};
use super::state::SessionState;
use crate::types::{BridgeError, Result};

/// Write half of a child's stdin
pub type StdinWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One registered session
pub struct LiveSession {
    pub session_id: String,
    /// Distinguishes this process from later ones reusing the same id
    pub generation: u64,
    pub pid: u32,
    pub started_at: Instant,
    stdin: tokio::sync::Mutex<Option<StdinWriter>>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("session_id", &self.session_id)
            .field("generation", &self.generation)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LiveSession {
    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(SessionState::Cancelling)
    }

    pub fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            tracing::trace!(
                session_id = %self.session_id,
                from = state.as_str(),
                to = next.as_str(),
                "Session state change"
            );
            *state = next;
        }
    }

    /// Enter `AwaitingPermission` unless the session is already winding down
    pub fn await_permission(&self, request_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.is_live() {
                *state = SessionState::AwaitingPermission {
                    request_id: request_id.to_string(),
                };
            }
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Drop stdin unless a permission write holds it
    ///
    /// That write stops on the cancel token and drops stdin itself.
    fn close_stdin(&self) {
        match self.stdin.try_lock() {
            Ok(mut stdin) => {
                stdin.take();
            }
            Err(_) => {
                tracing::debug!(session_id = %self.session_id, "Stdin held by a permission write");
            }
        }
    }

    fn leave_permission_wait(&self, request_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.pending_request() == Some(request_id) {
                *state = SessionState::Running;
            }
        }
    }
}

/// Owned table of live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<LiveSession>>,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned process under `session_id`
    ///
    /// Fails with `SessionBusy` when a live process already owns the id; the
    /// caller then owns the new child and must reap it.
    pub fn register(
        &self,
        session_id: &str,
        pid: u32,
        stdin: Option<StdinWriter>,
        cancel: CancellationToken,
    ) -> Result<Arc<LiveSession>> {
        match self.sessions.entry(session_id.to_string()) {
            dashmap::Entry::Occupied(existing) => {
                tracing::warn!(
                    session_id,
                    existing_pid = existing.get().pid,
                    rejected_pid = pid,
                    "Session id already has a live process"
                );
                Err(BridgeError::session_busy(session_id))
            }
            dashmap::Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let session = Arc::new(LiveSession {
                    session_id: session_id.to_string(),
                    generation,
                    pid,
                    started_at: Instant::now(),
                    stdin: tokio::sync::Mutex::new(stdin),
                    cancel,
                    state: Mutex::new(SessionState::Running),
                });
                vacant.insert(Arc::clone(&session));
                tracing::debug!(session_id, pid, generation, "Session registered");
                Ok(session)
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<LiveSession>> {
        self.sessions.get(session_id).map(|r| Arc::clone(&r))
    }

    /// Cancel a live session
    ///
    /// Removes the entry, signals the session task, which interrupts and
    /// then terminates the process group, and closes stdin. Never waits on
    /// an in-flight permission write. Returns `false` when nothing was
    /// registered.
    pub fn cancel(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            tracing::debug!(session_id, "Cancel for unknown session ignored");
            return false;
        };

        session.set_state(SessionState::Cancelling);
        session.cancel.cancel();
        session.close_stdin();

        tracing::info!(
            session_id,
            pid = session.pid,
            elapsed_ms = session.elapsed_ms(),
            "Session cancelled"
        );
        true
    }

    /// Write a permission decision to the session's stdin
    ///
    /// Returns `false`, never an error, when the session is gone, has no
    /// stdin, or the write fails.
    pub async fn forward_permission(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> bool {
        let Some(session) = self.get(session_id) else {
            tracing::debug!(session_id, request_id, "No live session for permission decision");
            return false;
        };

        let cancel = session.cancel.clone();
        let mut stdin = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(session_id, request_id, "Session cancelled before permission write");
                return false;
            }
            stdin = session.stdin.lock() => stdin,
        };
        let Some(writer) = stdin.as_mut() else {
            tracing::debug!(session_id, request_id, "Session has no stdin");
            return false;
        };

        let written = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = write_permission_response(writer, request_id, decision) => Some(result),
        };

        match written {
            Some(Ok(())) => {
                drop(stdin);
                session.leave_permission_wait(request_id);
                tracing::info!(
                    session_id,
                    request_id,
                    decision = decision.as_str(),
                    "Permission decision forwarded"
                );
                true
            }
            Some(Err(e)) => {
                tracing::warn!(session_id, request_id, error = %e, "Failed to write permission decision");
                stdin.take();
                false
            }
            None => {
                tracing::debug!(session_id, request_id, "Session cancelled during permission write");
                stdin.take();
                false
            }
        }
    }

    /// Remove the entry only if it still belongs to `generation`
    pub fn deregister(&self, session_id: &str, generation: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(session_id, |_, session| session.generation == generation)
            .is_some();
        if removed {
            tracing::debug!(session_id, generation, "Session deregistered");
        }
        removed
    }

    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.state())
    }

    /// Outstanding permission request for the session, if any
    pub fn pending_permission(&self, session_id: &str) -> Option<String> {
        self.state(session_id)
            .and_then(|s| s.pending_request().map(str::to_string))
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
