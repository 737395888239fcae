//! HTTP surface
//!
//! All routes live under `/api/v1`:
//! - `POST /chat/stream` starts a session and streams it as SSE; with
//!   `Last-Event-ID` it re-attaches to the session named in the body instead
//! - `POST /chat/permission/{sessionId}/{requestId}` answers a permission prompt
//! - `POST /chat/cancel/{sessionId}` cancels a live session
//! - `GET /health` reports CLI availability and the live session count

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;

use super::replay::{EventLog, ReplayCache};
use super::sse::{DONE_FRAME, FollowOutcome, SseSink, follow_log};
use crate::session::{
    ExecutionRequest, Executor, MessageStore, PermissionDecision, SessionHandle, StoredMessage,
    Transcript,
};
use crate::tracing::ErrorTraceExt;
use crate::types::{BridgeError, ExecutionOptions};

/// Header carrying the registry key of a streamed session
pub const SESSION_ID_HEADER: &str = "x-session-id";
/// Id of the last event a reconnecting client received
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub executor: Executor,
    pub store: Arc<dyn MessageStore>,
    pub replay: Arc<ReplayCache>,
}

impl AppState {
    pub fn new(executor: Executor, store: Arc<dyn MessageStore>) -> Self {
        Self {
            executor,
            store,
            replay: Arc::new(ReplayCache::new()),
        }
    }
}

/// Body of `POST /chat/stream`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl StreamRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Body of `POST /chat/permission/...`
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionRequest {
    pub decision: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
    pub claude_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_version: Option<String>,
    pub active_sessions: usize,
}

/// A `BridgeError` rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BridgeError::EmptyPrompt => StatusCode::UNPROCESSABLE_ENTITY,
            BridgeError::InvalidDecision(_)
            | BridgeError::InvalidResume(_)
            | BridgeError::Json(_) => StatusCode::BAD_REQUEST,
            BridgeError::SessionNotFound(_) => StatusCode::GONE,
            BridgeError::SessionBusy(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.0.trace_error();
        let body = json!({
            "error": {
                "code": self.0.error_code().as_str(),
                "message": self.0.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/chat/stream", post(chat_stream))
        .route(
            "/chat/permission/{session_id}/{request_id}",
            post(chat_permission),
        )
        .route("/chat/cancel/{session_id}", post(chat_cancel))
        .route("/health", get(health));

    Router::new().nest("/api/v1", api).with_state(state)
}

async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StreamRequest>,
) -> Result<Response, ApiError> {
    if let Some(after) = last_event_id(&headers)? {
        return resume_stream(&state, body, after);
    }

    let StreamRequest {
        prompt,
        session_id,
        working_directory,
        mut options,
    } = body;
    if session_id.is_some() {
        options.session_id = session_id;
    }

    let handle = state
        .executor
        .execute(ExecutionRequest {
            prompt: prompt.clone(),
            working_directory,
            options,
        })
        .await?;
    let session_id = handle.session_id.clone();

    if let Err(e) = state
        .store
        .append(StoredMessage::user(&session_id, prompt))
        .await
    {
        e.trace_error();
    }

    let log = state.replay.start(&session_id, handle.cancel.clone());
    let span = tracing::info_span!("record", session_id = %session_id);
    tokio::spawn(
        record_session(
            handle,
            Arc::clone(&log),
            Arc::clone(&state.replay),
            Arc::clone(&state.store),
            state.executor.config().resume_window,
        )
        .instrument(span),
    );

    sse_response(&session_id, follow(&state, log, 0))
}

/// Re-attach to the event log of a running or recently finished session
fn resume_stream(state: &AppState, body: StreamRequest, after: u64) -> Result<Response, ApiError> {
    let session_id = body
        .session_id
        .or(body.options.session_id)
        .ok_or_else(|| BridgeError::InvalidResume("sessionId is required".to_string()))?;
    let log = state
        .replay
        .get(&session_id)
        .ok_or_else(|| BridgeError::session_not_found(&session_id))?;

    tracing::info!(
        session_id = %session_id,
        last_event_id = after,
        recorded = log.len(),
        finished = log.is_finished(),
        "Client re-attached"
    );
    sse_response(&session_id, follow(state, log, after))
}

/// `Last-Event-ID` as a number; absent means a fresh stream
fn last_event_id(headers: &HeaderMap) -> Result<Option<u64>, BridgeError> {
    let Some(value) = headers.get(LAST_EVENT_ID_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(Some)
        .ok_or_else(|| BridgeError::InvalidResume(format!("bad {LAST_EVENT_ID_HEADER}: {value:?}")))
}

/// Drain the session into its log, then persist the assistant turn
async fn record_session(
    mut handle: SessionHandle,
    log: Arc<EventLog>,
    replay: Arc<ReplayCache>,
    store: Arc<dyn MessageStore>,
    resume_window: Duration,
) {
    let mut transcript = Transcript::new();
    while let Some(event) = handle.events.recv().await {
        transcript.observe(&event);
        log.push(event);
    }

    // Partial turns are kept too
    if let Some(message) = transcript.into_message(log.session_id()) {
        if let Err(e) = store.append(message).await {
            e.trace_error();
        }
    }

    log.finish();
    tracing::debug!(events = log.len(), "Session recorded");
    replay.retire(&log, resume_window);
}

/// Stream `log` from `after` into a new SSE body
fn follow(state: &AppState, log: Arc<EventLog>, after: u64) -> Body {
    let (sink, body) = SseSink::channel();
    let config = state.executor.config();
    let heartbeat = config.heartbeat_interval;
    let resume_window = config.resume_window;
    let span = tracing::info_span!("sse", session_id = %log.session_id(), after);

    log.attach();
    tokio::spawn(
        async move {
            let outcome = follow_log(&log, after, &sink, heartbeat).await;
            let remaining = log.detach();
            match outcome {
                FollowOutcome::Completed => {
                    if !sink.send(DONE_FRAME).await {
                        tracing::debug!("Client left before the done frame");
                    }
                }
                FollowOutcome::Disconnected if remaining == 0 => {
                    log.cancel_unless_resumed(resume_window);
                }
                FollowOutcome::Disconnected => {}
            }
        }
        .instrument(span),
    );
    body
}

fn sse_response(session_id: &str, body: Body) -> Result<Response, ApiError> {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no")
        .header(SESSION_ID_HEADER, session_id)
        .body(body)
        .map_err(|e| ApiError(BridgeError::internal(format!("invalid response: {e}"))))
}

async fn chat_permission(
    State(state): State<AppState>,
    Path((session_id, request_id)): Path<(String, String)>,
    Json(body): Json<DecisionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let decision = PermissionDecision::parse(&body.decision)
        .ok_or_else(|| BridgeError::InvalidDecision(body.decision.clone()))?;

    if let Some(ref reason) = body.reason {
        tracing::debug!(
            session_id = %session_id,
            request_id = %request_id,
            reason = %reason,
            "Permission decision reason"
        );
    }

    let delivered = state
        .executor
        .registry()
        .forward_permission(&session_id, &request_id, decision)
        .await;

    if delivered {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(BridgeError::session_not_found(session_id).into())
    }
}

async fn chat_cancel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let cancelled = state.executor.registry().cancel(&session_id);
    Json(json!({ "success": true, "cancelled": cancelled }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let probe = state.executor.launcher().probe().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.executor.launcher().backend().as_str(),
        claude_available: probe.available,
        claude_version: probe.version,
        active_sessions: state.executor.registry().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError(BridgeError::EmptyPrompt).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError(BridgeError::session_not_found("s")).status(),
            StatusCode::GONE
        );
        assert_eq!(
            ApiError(BridgeError::InvalidDecision("maybe".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(BridgeError::InvalidResume("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(BridgeError::internal("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_stream_request_session_id_optional() {
        let request: StreamRequest =
            serde_json::from_str(r#"{"prompt":"hi","options":{"model":"opus"}}"#).unwrap();
        assert_eq!(request.prompt, "hi");
        assert!(request.session_id.is_none());
        assert_eq!(request.options.model.as_deref(), Some("opus"));

        let request: StreamRequest =
            serde_json::from_str(r#"{"prompt":"hi","sessionId":"s1","workingDirectory":"/tmp"}"#)
                .unwrap();
        assert_eq!(request.session_id.as_deref(), Some("s1"));
        assert_eq!(request.working_directory, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_last_event_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(last_event_id(&headers).unwrap(), None);

        headers.insert(LAST_EVENT_ID_HEADER, "12".parse().unwrap());
        assert_eq!(last_event_id(&headers).unwrap(), Some(12));

        headers.insert(LAST_EVENT_ID_HEADER, "twelve".parse().unwrap());
        assert!(matches!(
            last_event_id(&headers),
            Err(BridgeError::InvalidResume(_))
        ));
    }
}
