//! Error tracing extensions
//!
//! Provides utilities for enriching error handling with tracing context.

use crate::types::BridgeError;
use std::error::Error as StdError;

/// Extension trait for adding tracing context to errors
pub trait ErrorTraceExt {
    /// Log error with its code, classification and source chain
    fn trace_error(&self) -> &Self;
}

impl ErrorTraceExt for BridgeError {
    fn trace_error(&self) -> &Self {
        let error_code = self.error_code();

        let mut error_chain = Vec::new();
        let mut current_source = self.source();
        while let Some(source) = current_source {
            error_chain.push(source.to_string());
            current_source = source.source();
        }

        if self.is_client_error() {
            tracing::warn!(
                error = %self,
                error_code = error_code.as_str(),
                error_chain = ?error_chain,
                "Request rejected"
            );
        } else {
            tracing::error!(
                error = %self,
                error_code = error_code.as_str(),
                is_retryable = self.is_retryable(),
                error_chain_len = error_chain.len(),
                error_chain = ?error_chain,
                "Error occurred with full context"
            );
        }

        self
    }
}

/// Extension trait for Result types
pub trait ResultTraceExt<T>: Sized {
    /// Convert the error into a `BridgeError` and log it
    fn trace_context(self) -> Result<T, BridgeError>;
}

impl<T, E> ResultTraceExt<T> for Result<T, E>
where
    BridgeError: From<E>,
{
    fn trace_context(self) -> Result<T, BridgeError> {
        self.map_err(|e| {
            let bridge_error = BridgeError::from(e);
            bridge_error.trace_error();
            bridge_error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_trace_ext() {
        let error = BridgeError::launch(
            "claude",
            std::io::Error::new(std::io::ErrorKind::NotFound, "No such file"),
        );
        assert_eq!(error.trace_error().error_code().as_str(), "LAUNCH_ERROR");
    }

    #[test]
    fn test_result_trace_ext() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "Broken pipe",
        ));

        let err = result.trace_context().unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
