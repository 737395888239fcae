//! Stream consumer
//!
//! Opens a stream against the bridge's HTTP surface, decodes SSE frames back
//! into [`StreamEvent`](crate::converter::StreamEvent)s and resumes the same
//! session after transient network failures.

mod error;
mod parser;
mod state;
mod stream_client;
mod transport;

pub use error::{ClientError, TransportError, TransportErrorKind};
pub use parser::{DONE_EVENT, FrameStream, ParsedFrame, SseFrame, frames_from_bytes, parse_frame};
pub use state::ConnectionState;
pub use stream_client::{ReconnectPolicy, StreamClient};
pub use transport::{EventTransport, HttpTransport, OpenedStream};
