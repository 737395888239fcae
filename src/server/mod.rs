//! HTTP delivery of session events
//!
//! [`sse`] frames events for the wire, [`replay`] keeps each session's event
//! history so dropped clients can resume, [`routes`] exposes the stream,
//! permission, cancel and health endpoints, and [`runner`] wires logging and
//! the listener together for the binary.

pub mod replay;
pub mod routes;
pub mod runner;
pub mod sse;

pub use replay::{EventLog, LogStatus, ReplayCache};
pub use routes::{
    AppState, ApiError, LAST_EVENT_ID_HEADER, SESSION_ID_HEADER, StreamRequest, router,
};
pub use runner::{run_with_cli, shutdown_otel};
pub use sse::{DONE_FRAME, FollowOutcome, PING_FRAME, SseSink, encode_event, follow_log};
