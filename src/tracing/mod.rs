//! Tracing helpers

mod error_ext;

pub use error_ext::{ErrorTraceExt, ResultTraceExt};
