//! # wavelink-core
//!
//! A resilient, multiplexed websocket connection manager for streaming
//! market-data and trading APIs.
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Wire** — [`frame`] (parsed frames, the [`frame::Codec`] contract) and
//!    [`transport`] (the [`transport::Transport`] contract every reconnect
//!    loop drives, independent of any specific websocket library).
//! 2. **Correlation** — [`pending`] (request/response matching with a
//!    deadline) and [`subscription`] (the live subscription registry and
//!    its dispatch).
//! 3. **Dispatch** — [`dispatch`] (the per-frame pipeline: parse, correlate,
//!    fan out, or mark unhandled) and [`events`] (connection lifecycle
//!    events).
//! 4. **Connection** — [`connection`] (the public facade) and [`reconnect`]
//!    (the reconnect/resubscribe state machine it runs on top of).
//! 5. **Collaborator** — [`collaborator`] (the narrow, API-specific contract
//!    a caller implements: auth, subscribe requests, frame matching).
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use wavelink_core::prelude::*;
//!
//! let (transport, handle) = MockTransport::new(vec![true]);
//! let conn = Connection::open(
//!     "primary",
//!     Arc::new(transport),
//!     handle.events,
//!     Arc::new(my_parent_client),
//!     Arc::new(JsonCodec),
//!     ConnectionOptions::default(),
//!     None,
//! );
//! conn.send(r#"{"op":"subscribe","channel":"ticker"}"#);
//! ```

/// Layered error types for every stage of the pipeline.
pub mod error;

/// Parsed frames and the wire codec contract.
pub mod frame;

/// The transport adapter contract, plus an in-memory mock for tests.
pub mod transport;

/// Per-connection tunables.
pub mod options;

/// Request/response correlation with a deadline.
pub mod pending;

/// The live subscription registry and per-subscription dispatch.
pub mod subscription;

/// Connection lifecycle events.
pub mod events;

/// The per-frame dispatch pipeline.
pub mod dispatch;

/// The parent client collaborator contract.
pub mod collaborator;

/// The reconnect / resubscribe state machine.
pub mod reconnect;

/// The connection facade — the public surface most callers program against.
pub mod connection;

/// A process-wide registry of live connections, keyed by id.
pub mod registry;

/// A reference [`transport::Transport`] backed by `tokio-tungstenite`.
#[cfg(feature = "native-transport")]
pub mod native;

pub mod prelude {
    pub use crate::collaborator::{default_matches, ParentClient};
    pub use crate::connection::Connection;
    pub use crate::error::{CodecError, ConnError, DispatchError, PendingError, TransportError};
    pub use crate::events::{ConnectionEvent, EventBus};
    pub use crate::frame::{Codec, JsonCodec, ParsedFrame, SubscriptionKey};
    pub use crate::options::{ConnectionOptions, ConnectionOptionsBuilder};
    pub use crate::pending::{PendingHandle, PendingRegistry};
    pub use crate::registry::ConnectionRegistry;
    pub use crate::subscription::{Subscription, SubscriptionBuilder, SubscriptionRegistry};
    pub use crate::transport::{MockTransport, MockTransportHandle, Transport, TransportEvent};

    #[cfg(feature = "native-transport")]
    pub use crate::native::NativeTransport;
}
