//! Error types for the coalescer and the batch transport.

use thiserror::Error;

/// Errors a `Submit` caller can observe.
#[derive(Debug, Clone, Error)]
pub enum CoalescerError {
    /// The payload was empty, or the timeout did not strictly exceed `BatchTimeout`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller's per-request deadline elapsed before a response arrived.
    #[error("timeout waiting for batch response")]
    Timeout,

    /// The handler returned an error for the whole batch.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// The handler returned a response sequence of the wrong length.
    #[error("protocol mismatch: handler returned {actual} responses for {expected} requests")]
    ProtocolMismatch { expected: usize, actual: usize },

    /// The coalescer was stopped while the caller was waiting.
    #[error("coalescer stopped")]
    Stopped,
}

impl CoalescerError {
    /// Whether this error should be reported to an HTTP caller as a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoalescerError::Timeout)
    }
}

/// Errors raised by the JSON batch transport when talking to the backend.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to backend failed: {0}")]
    Request(String),

    #[error("backend responded with status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("failed to decode backend response as a JSON array: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}
