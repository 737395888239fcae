//! Transport seam for the stream client
//!
//! [`EventTransport`] opens one SSE connection per call and carries the two
//! side channels (permission decisions and cancellation). [`HttpTransport`]
//! talks to the bridge's HTTP routes with reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;

use super::error::TransportError;
use super::parser::{FrameStream, frames_from_bytes};
use crate::server::{LAST_EVENT_ID_HEADER, SESSION_ID_HEADER, StreamRequest};
use crate::session::PermissionDecision;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An open SSE connection
pub struct OpenedStream {
    /// Registry key reported by the server, when present
    pub session_id: Option<String>,
    pub frames: FrameStream,
}

impl std::fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStream")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    /// Open a stream for `request`
    ///
    /// `last_event_id` is set on reconnects to the id of the last event the
    /// caller received, and `request.session_id` then names the session to
    /// re-attach to.
    async fn open(
        &self,
        request: &StreamRequest,
        last_event_id: Option<u64>,
    ) -> Result<OpenedStream, TransportError>;

    /// Post a permission decision; `false` when the session is gone
    async fn post_decision(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> Result<bool, TransportError>;

    /// Ask the server to cancel a session; `true` when something was cancelled
    async fn cancel_session(&self, session_id: &str) -> Result<bool, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CancelResponse {
    #[serde(default)]
    cancelled: bool,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://localhost:8787`
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::from_reqwest(&e))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::status(status.as_u16(), body))
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn open(
        &self,
        request: &StreamRequest,
        last_event_id: Option<u64>,
    ) -> Result<OpenedStream, TransportError> {
        let mut builder = self
            .client
            .post(self.url("/chat/stream"))
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if let Some(id) = last_event_id {
            builder = builder.header(LAST_EVENT_ID_HEADER, id.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let response = Self::check(response).await?;

        let session_id = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        tracing::debug!(session_id = ?session_id, last_event_id, "SSE stream opened");

        Ok(OpenedStream {
            session_id,
            frames: frames_from_bytes(response.bytes_stream()),
        })
    }

    async fn post_decision(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> Result<bool, TransportError> {
        let response = self
            .client
            .post(self.url(&format!("/chat/permission/{session_id}/{request_id}")))
            .json(&serde_json::json!({ "decision": decision }))
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        if response.status() == reqwest::StatusCode::GONE {
            return Ok(false);
        }
        Self::check(response).await.map(|_| true)
    }

    async fn cancel_session(&self, session_id: &str) -> Result<bool, TransportError> {
        let response = self
            .client
            .post(self.url(&format!("/chat/cancel/{session_id}")))
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        let body: CancelResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::decode(format!("invalid cancel response: {e}")))?;
        Ok(body.cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_prefix() {
        let transport = HttpTransport::with_client(reqwest::Client::new(), "http://host:1/");
        assert_eq!(
            transport.url("/chat/cancel/s1"),
            "http://host:1/api/v1/chat/cancel/s1"
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_network() {
        // Port 9 on localhost is reserved for discard and normally closed
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        let err = transport
            .open(&StreamRequest::new("hi"), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
