//! Runtime options recognized by the connection core.
//!
//! The option-loading layer (reading these from a config file or env vars)
//! is an external collaborator; this struct is the core's own contract —
//! construct it directly or via [`ConnectionOptionsBuilder`].

use std::time::Duration;

/// Tunables for a single [`crate::connection::Connection`].
///
/// Mirrors the options table in the design spec one field at a time; see
/// each field's doc comment for the corresponding knob.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Transport-level idle timeout; passed through to the transport at
    /// construction, not enforced by the core itself.
    pub socket_no_data_timeout: Duration,

    /// Enable the reconnect path at all.
    pub auto_reconnect: bool,

    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,

    /// Cap on failed `connect()` attempts before giving up. `None` = unlimited.
    pub max_reconnect_tries: Option<u32>,

    /// Cap on failed resubscribe passes before giving up. `None` = unlimited.
    pub max_resubscribe_tries: Option<u32>,

    /// Batch size for concurrent resubscription after reconnect.
    pub max_concurrent_resubscriptions: usize,

    /// Retain the raw frame string on delivered `ParsedFrame`s.
    pub output_original_data: bool,

    /// Whether a matched pending request also allows dispatch to
    /// subscriptions for the same frame.
    pub continue_on_query_response: bool,

    /// Suppress the warning log for frames matched by nothing.
    pub unhandled_message_expected: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            socket_no_data_timeout: Duration::from_secs(30),
            auto_reconnect: true,
            reconnect_interval: Duration::from_secs(2),
            max_reconnect_tries: None,
            max_resubscribe_tries: None,
            max_concurrent_resubscriptions: 10,
            output_original_data: false,
            continue_on_query_response: false,
            unhandled_message_expected: false,
        }
    }
}

impl ConnectionOptions {
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::default()
    }
}

/// Builder for [`ConnectionOptions`], mirroring the SDK's builder
/// convention for configuration structs.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptionsBuilder {
    opts: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    pub fn socket_no_data_timeout(mut self, d: Duration) -> Self {
        self.opts.socket_no_data_timeout = d;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.opts.auto_reconnect = enabled;
        self
    }

    pub fn reconnect_interval(mut self, d: Duration) -> Self {
        self.opts.reconnect_interval = d;
        self
    }

    pub fn max_reconnect_tries(mut self, n: Option<u32>) -> Self {
        self.opts.max_reconnect_tries = n;
        self
    }

    pub fn max_resubscribe_tries(mut self, n: Option<u32>) -> Self {
        self.opts.max_resubscribe_tries = n;
        self
    }

    pub fn max_concurrent_resubscriptions(mut self, n: usize) -> Self {
        self.opts.max_concurrent_resubscriptions = n.max(1);
        self
    }

    pub fn output_original_data(mut self, enabled: bool) -> Self {
        self.opts.output_original_data = enabled;
        self
    }

    pub fn continue_on_query_response(mut self, enabled: bool) -> Self {
        self.opts.continue_on_query_response = enabled;
        self
    }

    pub fn unhandled_message_expected(mut self, enabled: bool) -> Self {
        self.opts.unhandled_message_expected = enabled;
        self
    }

    pub fn build(self) -> ConnectionOptions {
        self.opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let opts = ConnectionOptions::default();
        assert!(opts.auto_reconnect);
        assert_eq!(opts.max_reconnect_tries, None);
        assert_eq!(opts.max_concurrent_resubscriptions, 10);
    }

    #[test]
    fn builder_overrides_fields() {
        let opts = ConnectionOptions::builder()
            .auto_reconnect(false)
            .max_reconnect_tries(Some(3))
            .max_concurrent_resubscriptions(0)
            .build();

        assert!(!opts.auto_reconnect);
        assert_eq!(opts.max_reconnect_tries, Some(3));
        // zero is clamped up to 1 — a batch size of zero would never drain
        assert_eq!(opts.max_concurrent_resubscriptions, 1);
    }
}
