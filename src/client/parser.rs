//! SSE frame parsing on the consumer side
//!
//! Byte framing is done by `eventsource-stream`; comment lines (the server's
//! heartbeats) never surface as frames.

use std::pin::Pin;

use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};

use super::error::TransportError;
use crate::converter::StreamEvent;

/// Name of the completion frame
pub const DONE_EVENT: &str = "done";

/// One raw SSE frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: String,
}

/// Frames from one connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame, TransportError>> + Send>>;

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    Event(StreamEvent),
    /// The server finished the stream
    Done,
}

/// Decode one frame's data as a [`StreamEvent`]
pub fn parse_frame(frame: &SseFrame) -> Result<ParsedFrame, TransportError> {
    if frame.event == DONE_EVENT {
        return Ok(ParsedFrame::Done);
    }
    serde_json::from_str(&frame.data)
        .map(ParsedFrame::Event)
        .map_err(|e| {
            TransportError::decode(format!("invalid `{}` event data: {e}", frame.event))
        })
}

/// Turn a body byte stream into SSE frames
///
/// A failure of the underlying stream is a network error; bad framing is a
/// protocol error.
pub fn frames_from_bytes<S, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    Box::pin(bytes.eventsource().map(|item| match item {
        Ok(event) => Ok(SseFrame {
            event: event.event,
            data: event.data,
            id: event.id,
        }),
        Err(EventStreamError::Transport(e)) => {
            Err(TransportError::network(format!("Body read failed: {e}")))
        }
        Err(e) => Err(TransportError::protocol(format!("SSE stream error: {e}"))),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TransportErrorKind;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_frames_skip_heartbeats_and_span_chunks() {
        let frames: Vec<_> = frames_from_bytes(chunks(&[
            ": ping\n\n",
            "event: error\nda",
            "ta: {\"type\":\"error\",\"code\":\"X\",\"message\":\"y\"}\n\n",
            ": ping\n\n",
            "event: done\ndata: {}\n\n",
        ]))
        .collect()
        .await;

        assert_eq!(frames.len(), 2);
        let first = frames[0].as_ref().unwrap();
        assert_eq!(first.event, "error");
        assert_eq!(
            parse_frame(first).unwrap(),
            ParsedFrame::Event(StreamEvent::error("X", "y"))
        );
        assert_eq!(
            parse_frame(frames[1].as_ref().unwrap()).unwrap(),
            ParsedFrame::Done
        );
    }

    #[tokio::test]
    async fn test_body_failure_is_network_error() {
        let failing = futures::stream::iter(vec![
            Ok(Bytes::from_static(b": ping\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let frames: Vec<_> = frames_from_bytes(failing).collect().await;
        let err = frames.last().unwrap().as_ref().unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Network);
    }

    #[test]
    fn test_bad_data_is_decode_error() {
        let frame = SseFrame {
            event: "assistant".into(),
            data: "{not json".into(),
            id: String::new(),
        };
        let err = parse_frame(&frame).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Decode);
        assert!(!err.is_retryable());
    }
}
