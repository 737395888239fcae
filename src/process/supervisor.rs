//! Silence and ceiling timers for one child process
//!
//! The silence timer guards against a child that never produces output and
//! is disarmed for good by the first stdout byte. The ceiling timer bounds
//! the whole invocation and is never disarmed. Each fires at most once.
//!
//! A first-byte signal that is already delivered is seen before any timer,
//! so output that arrives as the silence deadline passes never counts as
//! silence.

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{Sleep, sleep};

use crate::types::BridgeError;

/// Which deadline expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutKind {
    Silence,
    Ceiling,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silence => "silence",
            Self::Ceiling => "ceiling",
        }
    }
}

/// Per-session timer pair
#[derive(Debug)]
pub struct TimeoutSupervisor {
    silence: Option<Pin<Box<Sleep>>>,
    ceiling: Option<Pin<Box<Sleep>>>,
    silence_after: Duration,
    ceiling_after: Duration,
    silence_fired: bool,
    ceiling_fired: bool,
    first_byte: Option<oneshot::Receiver<()>>,
}

impl TimeoutSupervisor {
    /// Arm both timers starting now
    pub fn new(silence_after: Duration, ceiling_after: Duration) -> Self {
        Self {
            silence: Some(Box::pin(sleep(silence_after))),
            ceiling: Some(Box::pin(sleep(ceiling_after))),
            silence_after,
            ceiling_after,
            silence_fired: false,
            ceiling_fired: false,
            first_byte: None,
        }
    }

    /// Disarm the silence timer once `first_byte` resolves
    ///
    /// A dropped sender leaves the timer armed.
    pub fn watch_first_byte(&mut self, first_byte: oneshot::Receiver<()>) {
        self.first_byte = Some(first_byte);
    }

    /// Permanently disarm the silence timer
    ///
    /// Idempotent; a no-op once the timer has fired.
    pub fn disarm_silence(&mut self) {
        if self.silence.take().is_some() {
            tracing::trace!("Silence timer disarmed");
        }
    }

    #[cfg(test)]
    fn is_silence_armed(&self) -> bool {
        self.silence.is_some()
    }

    /// Wait for the next armed timer to fire
    ///
    /// Pends forever when no timer is armed. Cancel safe: dropping the
    /// future before it completes leaves every timer as it was. When both
    /// deadlines are due at once the ceiling is reported first.
    pub async fn expired(&mut self) -> TimeoutKind {
        let kind = std::future::poll_fn(|cx| {
            if let Some(first_byte) = self.first_byte.as_mut() {
                if let Poll::Ready(received) = Pin::new(first_byte).poll(cx) {
                    self.first_byte = None;
                    if received.is_ok() {
                        self.disarm_silence();
                    }
                }
            }
            if let Some(timer) = self.ceiling.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    self.ceiling = None;
                    return Poll::Ready(TimeoutKind::Ceiling);
                }
            }
            if let Some(timer) = self.silence.as_mut() {
                if timer.as_mut().poll(cx).is_ready() {
                    self.silence = None;
                    return Poll::Ready(TimeoutKind::Silence);
                }
            }
            Poll::Pending
        })
        .await;

        match kind {
            TimeoutKind::Silence => self.silence_fired = true,
            TimeoutKind::Ceiling => self.ceiling_fired = true,
        }
        tracing::debug!(kind = kind.as_str(), "Timeout fired");
        kind
    }

    /// Which timeout decides the session outcome, if any
    ///
    /// The ceiling wins over silence.
    pub fn outcome(&self) -> Option<TimeoutKind> {
        if self.ceiling_fired {
            Some(TimeoutKind::Ceiling)
        } else if self.silence_fired {
            Some(TimeoutKind::Silence)
        } else {
            None
        }
    }

    /// The error reported for a fired timeout
    pub fn error_for(&self, kind: TimeoutKind) -> BridgeError {
        match kind {
            TimeoutKind::Silence => BridgeError::SilenceTimeout(self.silence_after.as_secs()),
            TimeoutKind::Ceiling => BridgeError::CeilingTimeout(self.ceiling_after.as_secs()),
        }
    }
}
