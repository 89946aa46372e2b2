//! Parsed frames and the codec contract.
//!
//! The core never imposes a wire format — `parse` and `matches` are
//! supplied by the parent client. This module ships a plain JSON
//! [`JsonCodec`] default; a caller wanting a different wire format (an
//! SSE stream, a binary protocol) implements [`Codec`] themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::CodecError;

/// One parsed message delivered by the transport, handed to matched
/// subscriptions and to the pending-request registry.
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    /// The parsed structured value.
    pub value: Value,
    /// The original raw string, retained only when
    /// `ConnectionOptions::output_original_data` is set.
    pub raw: Option<String>,
    /// When this frame was received by the core.
    pub received_at: DateTime<Utc>,
    /// The connection that received this frame.
    pub connection_id: Arc<str>,
}

/// The argument passed to the parent client's `matches` collaborator: a
/// subscription is matched either by its opaque identifier or by the
/// original request object it was created with.
#[derive(Debug, Clone)]
pub enum SubscriptionKey<'a> {
    Identifier(&'a str),
    Request(&'a Value),
}

/// Wire-format parsing, supplied by the parent client.
///
/// `parse` is the only required operation; the core retries a failed
/// parse once by wrapping the payload in quotes, so a codec built for a
/// JSON-object wire format does not need to special-case bare scalar
/// frames (e.g. a lone `"pong"`) itself.
pub trait Codec: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Value, CodecError>;
}

/// Default JSON codec — parses each frame as a `serde_json::Value`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn parse(&self, raw: &str) -> Result<Value, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

/// Parse `raw`, retrying once with the payload wrapped in quotes to admit
/// bare scalar frames (e.g. a server that sends the literal text `pong`
/// rather than `"pong"` or `{"type":"pong"}`).
pub(crate) fn parse_with_retry(codec: &dyn Codec, raw: &str) -> Result<Value, CodecError> {
    match codec.parse(raw) {
        Ok(v) => Ok(v),
        Err(first_err) => {
            let quoted = format!("\"{}\"", raw.replace('"', "\\\""));
            codec.parse(&quoted).map_err(|_| first_err)
        }
    }
}
