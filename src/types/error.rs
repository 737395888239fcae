//! Error types for the stream bridge

use thiserror::Error;

/// Stable error codes carried by terminal `error` events and HTTP error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The child process could not be spawned
    LaunchError,
    /// No stdout byte arrived before the silence deadline
    SilenceTimeout,
    /// The process outlived the ceiling deadline
    CeilingTimeout,
    /// Non-zero exit not caused by a timeout
    ProcessError,
    /// A live process already owns the session id
    SessionBusy,
    /// No live process for the session id
    SessionNotFound,
    /// The request itself was malformed
    InvalidRequest,
    /// Failure while producing or delivering the stream
    StreamError,
    /// Everything else
    InternalError,
}

impl ErrorCode {
    /// Wire representation of the code
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LaunchError => "LAUNCH_ERROR",
            Self::SilenceTimeout => "SILENCE_TIMEOUT",
            Self::CeilingTimeout => "TIMEOUT",
            Self::ProcessError => "PROCESS_ERROR",
            Self::SessionBusy => "SESSION_BUSY",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::StreamError => "STREAM_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    // === Process errors ===
    /// Spawning the child failed (missing executable, permission denied, ...)
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Silence timeout fired before any stdout byte
    #[error("No output from claude within {0}s, the process is possibly stuck")]
    SilenceTimeout(u64),

    /// Ceiling timeout fired while the process was still alive
    #[error("claude took too long and was stopped after {0}s")]
    CeilingTimeout(u64),

    /// The process exited unsuccessfully on its own
    #[error("claude exited with code {code}: {stderr}")]
    ProcessExit { code: i32, stderr: String },

    // === Session errors ===
    /// Another live process already owns the session id
    #[error("Session is already running: {0}")]
    SessionBusy(String),

    /// No live process for the session id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // === Request errors ===
    /// Empty prompt
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    /// Decision other than allow/deny
    #[error("Invalid permission decision: {0}")]
    InvalidDecision(String),

    /// Malformed `Last-Event-ID` or a resume without a session id
    #[error("Invalid resume request: {0}")]
    InvalidResume(String),

    // === Streaming errors ===
    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamingError(String),

    // === Configuration errors ===
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic errors ===
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Get the wire error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            BridgeError::Launch { .. } => ErrorCode::LaunchError,
            BridgeError::SilenceTimeout(_) => ErrorCode::SilenceTimeout,
            BridgeError::CeilingTimeout(_) => ErrorCode::CeilingTimeout,
            BridgeError::ProcessExit { .. } => ErrorCode::ProcessError,
            BridgeError::SessionBusy(_) => ErrorCode::SessionBusy,
            BridgeError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            BridgeError::EmptyPrompt => ErrorCode::InvalidRequest,
            BridgeError::InvalidDecision(_) => ErrorCode::InvalidRequest,
            BridgeError::InvalidResume(_) => ErrorCode::InvalidRequest,
            BridgeError::StreamingError(_) => ErrorCode::StreamError,
            BridgeError::ConfigError(_) => ErrorCode::InternalError,
            BridgeError::Io(_) => ErrorCode::InternalError,
            BridgeError::Json(_) => ErrorCode::InvalidRequest,
            BridgeError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if this error is retryable
    ///
    /// Timeouts are worth another attempt (the AI service may be busy);
    /// launch failures and bad requests are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::SilenceTimeout(_)
                | BridgeError::CeilingTimeout(_)
                | BridgeError::StreamingError(_)
                | BridgeError::SessionBusy(_)
        )
    }

    /// Check if this error is a client error (caused by invalid input)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BridgeError::SessionNotFound(_)
                | BridgeError::SessionBusy(_)
                | BridgeError::EmptyPrompt
                | BridgeError::InvalidDecision(_)
                | BridgeError::InvalidResume(_)
                | BridgeError::Json(_)
        )
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::Internal(msg.into())
    }

    /// Create a launch error
    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        BridgeError::Launch {
            program: program.into(),
            source,
        }
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        BridgeError::SessionNotFound(session_id.into())
    }

    /// Create a session busy error
    pub fn session_busy(session_id: impl Into<String>) -> Self {
        BridgeError::SessionBusy(session_id.into())
    }

    /// Create a streaming error
    pub fn streaming_error(msg: impl Into<String>) -> Self {
        BridgeError::StreamingError(msg.into())
    }

    /// Create a configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        BridgeError::ConfigError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::session_not_found("test-123");
        assert_eq!(err.to_string(), "Session not found: test-123");

        let err = BridgeError::SilenceTimeout(30);
        assert!(err.to_string().contains("possibly stuck"));

        let err = BridgeError::CeilingTimeout(300);
        assert!(err.to_string().contains("took too long"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BridgeError::SilenceTimeout(30).error_code().as_str(),
            "SILENCE_TIMEOUT"
        );
        assert_eq!(BridgeError::CeilingTimeout(300).error_code().as_str(), "TIMEOUT");
        assert_eq!(
            BridgeError::ProcessExit {
                code: 1,
                stderr: String::new()
            }
            .error_code(),
            ErrorCode::ProcessError
        );

        let err = BridgeError::launch(
            "claude",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.error_code(), ErrorCode::LaunchError);
        assert_eq!(err.error_code().to_string(), "LAUNCH_ERROR");
    }

    #[test]
    fn test_is_retryable() {
        assert!(BridgeError::SilenceTimeout(30).is_retryable());
        assert!(BridgeError::streaming_error("lost").is_retryable());
        assert!(!BridgeError::session_not_found("x").is_retryable());
        assert!(
            !BridgeError::launch("claude", std::io::Error::other("denied")).is_retryable()
        );
    }

    #[test]
    fn test_is_client_error() {
        assert!(BridgeError::session_not_found("x").is_client_error());
        assert!(BridgeError::EmptyPrompt.is_client_error());
        assert!(BridgeError::InvalidDecision("maybe".into()).is_client_error());
        assert!(!BridgeError::internal("oops").is_client_error());
    }
}
