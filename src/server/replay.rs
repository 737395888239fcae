//! Resumable event history for streamed sessions
//!
//! Each session started over HTTP records its events in an [`EventLog`]; the
//! id of an event is its 1-based position. Every SSE connection follows the
//! log from a position, so a client that lost its connection re-attaches
//! with `Last-Event-ID: <n>` and receives events `n + 1..` of the same run.
//! Logs stay in the [`ReplayCache`] for the resume window after the session
//! finishes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::converter::StreamEvent;

/// Length and completion, published to followers on every change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStatus {
    pub len: usize,
    pub finished: bool,
}

/// Append-only event history of one session
#[derive(Debug)]
pub struct EventLog {
    session_id: String,
    events: Mutex<Vec<StreamEvent>>,
    status: watch::Sender<LogStatus>,
    /// The session's own cancellation token
    cancel: CancellationToken,
    followers: AtomicUsize,
    attaches: AtomicU64,
}

impl EventLog {
    pub fn new(session_id: impl Into<String>, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(LogStatus::default());
        Self {
            session_id: session_id.into(),
            events: Mutex::new(Vec::new()),
            status,
            cancel,
            followers: AtomicUsize::new(0),
            attaches: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append an event and return its id
    pub fn push(&self, event: StreamEvent) -> u64 {
        let len = {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            events.push(event);
            events.len()
        };
        self.status.send_modify(|status| status.len = len);
        len as u64
    }

    /// Mark the session finished; no event is pushed afterwards
    pub fn finish(&self) {
        self.status.send_modify(|status| status.finished = true);
    }

    pub fn is_finished(&self) -> bool {
        self.status.borrow().finished
    }

    pub fn len(&self) -> usize {
        self.status.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events with an id greater than `after`, paired with their ids
    pub fn events_after(&self, after: u64) -> Vec<(u64, StreamEvent)> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::try_from(after).map_or(events.len(), |n| n.min(events.len()));
        (start as u64 + 1..)
            .zip(events[start..].iter().cloned())
            .collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<LogStatus> {
        self.status.subscribe()
    }

    pub fn attach(&self) {
        self.followers.fetch_add(1, Ordering::AcqRel);
        self.attaches.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of followers still attached
    pub fn detach(&self) -> usize {
        self.followers.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    pub fn followers(&self) -> usize {
        self.followers.load(Ordering::Acquire)
    }

    /// Cancel the session unless a follower attaches within `window`
    ///
    /// Called when the last follower lost its client. A finished session is
    /// left alone.
    pub fn cancel_unless_resumed(self: &Arc<Self>, window: Duration) {
        let log = Arc::clone(self);
        let attaches = self.attaches.load(Ordering::Acquire);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let resumed = log.attaches.load(Ordering::Acquire) != attaches;
            if resumed || log.followers() > 0 || log.is_finished() {
                return;
            }
            tracing::info!(
                session_id = %log.session_id,
                window_secs = window.as_secs(),
                "No client re-attached, cancelling session"
            );
            log.cancel.cancel();
        });
    }
}

/// Session id → event log, for sessions that are running or recently finished
#[derive(Debug, Default)]
pub struct ReplayCache {
    logs: DashMap<String, Arc<EventLog>>,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the log for a newly started session
    ///
    /// An unfinished log under the same id belongs to a session that is
    /// still running; it stays in place and the new log is not resumable.
    pub fn start(&self, session_id: &str, cancel: CancellationToken) -> Arc<EventLog> {
        let log = Arc::new(EventLog::new(session_id, cancel));
        match self.logs.entry(session_id.to_string()) {
            dashmap::Entry::Occupied(mut current) => {
                if current.get().is_finished() {
                    current.insert(Arc::clone(&log));
                } else {
                    tracing::debug!(session_id, "Session still streaming, new log not cached");
                }
            }
            dashmap::Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&log));
            }
        }
        log
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<EventLog>> {
        self.logs.get(session_id).map(|r| Arc::clone(&r))
    }

    /// Drop `log` after `window` unless a newer log took its place
    pub fn retire(self: &Arc<Self>, log: &Arc<EventLog>, window: Duration) {
        let cache = Arc::clone(self);
        let log = Arc::clone(log);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let removed = cache
                .logs
                .remove_if(log.session_id(), |_, current| Arc::ptr_eq(current, &log))
                .is_some();
            if removed {
                tracing::debug!(session_id = %log.session_id(), "Event log expired");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u32) -> StreamEvent {
        StreamEvent::error("X", n.to_string())
    }

    #[test]
    fn test_ids_are_positions() {
        let log = EventLog::new("s1", CancellationToken::new());
        assert_eq!(log.push(event(1)), 1);
        assert_eq!(log.push(event(2)), 2);
        assert_eq!(log.push(event(3)), 3);

        let ids: Vec<u64> = log.events_after(1).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(log.events_after(3).is_empty());
        assert!(log.events_after(u64::MAX).is_empty());
        assert_eq!(log.events_after(0).len(), 3);
    }

    #[test]
    fn test_start_keeps_running_log() {
        let cache = ReplayCache::new();
        let running = cache.start("s1", CancellationToken::new());
        let rejected = cache.start("s1", CancellationToken::new());
        assert!(Arc::ptr_eq(&cache.get("s1").unwrap(), &running));
        assert!(!Arc::ptr_eq(&running, &rejected));

        running.finish();
        let next = cache.start("s1", CancellationToken::new());
        assert!(Arc::ptr_eq(&cache.get("s1").unwrap(), &next));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_after_window() {
        let cache = Arc::new(ReplayCache::new());
        let log = cache.start("s1", CancellationToken::new());
        log.finish();
        cache.retire(&log, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(cache.len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_session_is_cancelled() {
        let cancel = CancellationToken::new();
        let log = Arc::new(EventLog::new("s1", cancel.clone()));
        log.attach();
        assert_eq!(log.detach(), 0);
        log.cancel_unless_resumed(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!cancel.is_cancelled());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_keeps_session() {
        let cancel = CancellationToken::new();
        let log = Arc::new(EventLog::new("s1", cancel.clone()));
        log.attach();
        log.detach();
        log.cancel_unless_resumed(Duration::from_secs(10));

        // A new follower comes and goes inside the window
        tokio::time::sleep(Duration::from_secs(5)).await;
        log.attach();
        log.detach();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_session_not_cancelled() {
        let cancel = CancellationToken::new();
        let log = Arc::new(EventLog::new("s1", cancel.clone()));
        log.attach();
        log.detach();
        log.finish();
        log.cancel_unless_resumed(Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!cancel.is_cancelled());
    }
}
