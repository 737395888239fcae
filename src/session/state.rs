//! Lifecycle state of a live session

use serde::Serialize;

use crate::process::TimeoutKind;

/// Where a registered session currently is
///
/// `AwaitingPermission` is entered when the child emits a permission prompt
/// and left when a decision has been written to its stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionState {
    Running,
    AwaitingPermission { request_id: String },
    Cancelling,
    TimedOut { kind: TimeoutKind },
    Exited { code: Option<i32> },
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingPermission { .. } => "awaitingPermission",
            Self::Cancelling => "cancelling",
            Self::TimedOut { .. } => "timedOut",
            Self::Exited { .. } => "exited",
        }
    }

    /// Whether the child can still accept stdin
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingPermission { .. })
    }

    /// Request id of the outstanding permission prompt
    pub fn pending_request(&self) -> Option<&str> {
        match self {
            Self::AwaitingPermission { request_id } => Some(request_id),
            _ => None,
        }
    }
}
