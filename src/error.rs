//! Unified error types for the connection core.

use thiserror::Error;

/// Top-level error surfaced by the connection facade.
#[derive(Error, Debug)]
pub enum ConnError {
    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error(transparent)]
    Pending(#[from] PendingError),

    #[error("connection is closing")]
    Closing,
}

/// Errors surfaced to the caller of `send_and_wait`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PendingError {
    #[error("timed out waiting for a matching frame")]
    Timeout,

    #[error("connection closed before a matching frame arrived")]
    ClosedBeforeMatch,
}

/// Errors produced while parsing an inbound frame.
#[derive(Error, Debug, Clone)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Errors a subscription handler may return. Forwarded to that
/// subscription's exception handler rather than propagated to the
/// dispatcher loop — Rust has no exceptions, so both an `Err` return and
/// a caught panic from a handler are routed through this type.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("handler error: {0}")]
    Handler(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Errors from the transport adapter's own operations.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("transport failed to open: {0}")]
    OpenFailed(String),

    #[error("transport send failed: {0}")]
    SendFailed(String),
}
