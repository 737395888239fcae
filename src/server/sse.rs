//! Server-Sent Events framing
//!
//! Event frames are `id: <n>\nevent: <type>\ndata: <json>\n\n`, where `n` is
//! the event's position in its session log. Heartbeats are `: ping` comments
//! and a finished session ends with an id-less `done` frame.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use super::replay::EventLog;
use crate::converter::StreamEvent;

/// Sent after each heartbeat interval without an event
pub const PING_FRAME: &str = ": ping\n\n";
/// Sent once the session has finished
pub const DONE_FRAME: &str = "event: done\ndata: {}\n\n";

/// Frames buffered between a follower and the HTTP body
const FRAME_BUFFER: usize = 64;

/// `id: <id>\nevent: <type>\ndata: <json>\n\n`
pub fn encode_event(id: u64, event: &StreamEvent) -> String {
    let data = match serde_json::to_string(event) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_name(), "Failed to serialize event");
            serde_json::json!({
                "type": "error",
                "code": "STREAM_ERROR",
                "message": "event could not be serialized",
            })
            .to_string()
        }
    };
    format!("id: {id}\nevent: {}\ndata: {data}\n\n", event.event_name())
}

/// How a follower run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    /// Every event of the finished session was written
    Completed,
    /// The HTTP body was dropped first
    Disconnected,
}

/// Write half of an SSE response body
#[derive(Debug, Clone)]
pub struct SseSink {
    tx: mpsc::Sender<Bytes>,
}

impl SseSink {
    /// A sink plus the streaming body that yields everything written to it
    pub fn channel() -> (Self, Body) {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        (Self { tx }, Body::from_stream(frame_stream(rx)))
    }

    /// Queue one frame; `false` once the body has been dropped
    pub async fn send(&self, frame: impl Into<Bytes>) -> bool {
        self.tx.send(frame.into()).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn frame_stream(mut rx: mpsc::Receiver<Bytes>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield Ok(frame);
        }
    }
}

/// Write the events of `log` with an id greater than `after` into `sink`
///
/// Waits for new events until the log is finished or the body is dropped. A
/// ping is written after each `heartbeat` without an event.
pub async fn follow_log(
    log: &EventLog,
    after: u64,
    sink: &SseSink,
    heartbeat: Duration,
) -> FollowOutcome {
    let mut status = log.subscribe();
    let mut cursor = after;
    loop {
        // Read before draining, so a finish seen here covers every event
        let finished = status.borrow_and_update().finished;
        for (id, event) in log.events_after(cursor) {
            if !sink.send(encode_event(id, &event)).await {
                tracing::info!(last_sent = cursor, "SSE client disconnected");
                return FollowOutcome::Disconnected;
            }
            cursor = id;
        }
        if finished {
            tracing::debug!(last_sent = cursor, "Event log finished");
            return FollowOutcome::Completed;
        }

        match tokio::time::timeout(heartbeat, status.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return FollowOutcome::Completed,
            Err(_) => {
                if !sink.send(PING_FRAME).await {
                    tracing::info!(last_sent = cursor, "SSE client disconnected");
                    return FollowOutcome::Disconnected;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::{AssistantEvent, ContentBlock};
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_encode_event() {
        let event = StreamEvent::error("TIMEOUT", "too long");
        assert_eq!(
            encode_event(7, &event),
            "id: 7\nevent: error\ndata: {\"type\":\"error\",\"code\":\"TIMEOUT\",\"message\":\"too long\"}\n\n"
        );
    }

    #[test]
    fn test_encode_event_name_matches_tag() {
        let event = StreamEvent::Assistant(AssistantEvent {
            content: vec![ContentBlock::text("hi")],
            session_id: None,
            uuid: None,
        });
        let frame = encode_event(1, &event);
        assert!(frame.starts_with("id: 1\nevent: assistant\ndata: {\"type\":\"assistant\""));
        assert!(frame.ends_with("}\n\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follow_heartbeat_then_events() {
        let log = Arc::new(EventLog::new("s1", CancellationToken::new()));
        let (bytes_tx, mut bytes_rx) = mpsc::channel(8);
        let sink = SseSink { tx: bytes_tx };

        let producer = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(20)).await;
                log.push(StreamEvent::error("X", "y"));
                log.finish();
            })
        };

        let outcome = follow_log(&log, 0, &sink, Duration::from_secs(15)).await;
        producer.await.unwrap();

        assert_eq!(outcome, FollowOutcome::Completed);
        assert_eq!(bytes_rx.recv().await.unwrap(), Bytes::from(PING_FRAME));
        let frame = bytes_rx.recv().await.unwrap();
        assert!(frame.starts_with(b"id: 1\nevent: error\n"));
        assert!(bytes_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_follow_from_position() {
        let log = EventLog::new("s1", CancellationToken::new());
        for n in 0..4 {
            log.push(StreamEvent::error("X", n.to_string()));
        }
        log.finish();
        let (bytes_tx, mut bytes_rx) = mpsc::channel(8);
        let sink = SseSink { tx: bytes_tx };

        let outcome = follow_log(&log, 2, &sink, Duration::from_secs(15)).await;
        assert_eq!(outcome, FollowOutcome::Completed);

        let mut frames = Vec::new();
        while let Ok(frame) = bytes_rx.try_recv() {
            frames.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("id: 3\n"));
        assert!(frames[1].starts_with("id: 4\n"));
    }

    #[tokio::test]
    async fn test_follow_stops_on_disconnect() {
        let cancel = CancellationToken::new();
        let log = EventLog::new("s1", cancel.clone());
        log.push(StreamEvent::error("X", "y"));
        let (sink, body) = SseSink::channel();
        drop(body);

        let outcome = follow_log(&log, 0, &sink, Duration::from_secs(15)).await;

        assert_eq!(outcome, FollowOutcome::Disconnected);
        assert!(sink.is_closed());
        // Cancelling is left to the caller
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_body_yields_frames_in_order() {
        let (sink, body) = SseSink::channel();
        assert!(sink.send(PING_FRAME).await);
        assert!(sink.send(DONE_FRAME).await);
        drop(sink);

        let chunks: Vec<_> = body
            .into_data_stream()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let text: Vec<u8> = chunks.concat();
        assert_eq!(
            String::from_utf8(text).unwrap(),
            ": ping\n\nevent: done\ndata: {}\n\n"
        );
    }
}
