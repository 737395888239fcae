//! Client-side errors
//!
//! Transport failures carry a [`TransportErrorKind`]; only `Network` is
//! retried by the stream client.

use std::fmt;

use thiserror::Error;

/// Transport error category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connect failure, timeout, or the body read breaking mid-stream
    Network,
    /// Malformed SSE framing
    Protocol,
    /// Non-success HTTP status
    Status,
    /// A frame whose data is not a valid event
    Decode,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Network => write!(f, "network"),
            TransportErrorKind::Protocol => write!(f, "protocol"),
            TransportErrorKind::Status => write!(f, "http_status"),
            TransportErrorKind::Decode => write!(f, "decode"),
        }
    }
}

/// Structured transport error with kind and details
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    /// HTTP status for `Status` errors
    pub status: Option<u16>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Protocol, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message)
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status,
            message: format!("HTTP {status}: {}", body.into()),
            status: Some(status),
        }
    }

    /// Map a reqwest failure onto a kind
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::network(format!("Connection failed: {e}"))
        } else if e.is_body() {
            Self::network(format!("Body read failed: {e}"))
        } else if let Some(status) = e.status() {
            Self::status(status.as_u16(), e.to_string())
        } else if e.is_request() {
            Self::protocol(format!("Request error: {e}"))
        } else {
            Self::network(format!("Network error: {e}"))
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == TransportErrorKind::Network
    }
}

/// Errors surfaced by [`StreamClient`](super::StreamClient)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// A failure that is never retried
    #[error("stream failed: {0}")]
    Transport(#[from] TransportError),

    #[error("stream failed after {attempts} reconnect attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

impl ClientError {
    /// The underlying transport error
    pub fn transport(&self) -> &TransportError {
        match self {
            ClientError::Transport(e) | ClientError::RetriesExhausted { source: e, .. } => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_is_retryable() {
        assert!(TransportError::network("reset").is_retryable());
        assert!(!TransportError::protocol("bad frame").is_retryable());
        assert!(!TransportError::decode("bad json").is_retryable());
        assert!(!TransportError::status(503, "busy").is_retryable());
    }

    #[test]
    fn test_status_error_display() {
        let err = TransportError::status(422, "empty prompt");
        assert_eq!(err.status, Some(422));
        assert_eq!(err.to_string(), "http_status: HTTP 422: empty prompt");
    }

    #[test]
    fn test_client_error_exposes_transport() {
        let err = ClientError::RetriesExhausted {
            attempts: 3,
            source: TransportError::network("reset"),
        };
        assert_eq!(err.transport().kind, TransportErrorKind::Network);
        assert!(err.to_string().contains("3 reconnect attempts"));
    }
}
