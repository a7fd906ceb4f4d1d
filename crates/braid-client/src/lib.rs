//! Client-side reconnecting transport for the braid channel.
//!
//! [`ReconnectingTransport`] owns one logical WebSocket connection and
//! insulates callers from the raw socket lifecycle: it reconnects with a
//! growing delay when the socket drops, routes inbound envelopes to
//! typed subscribers, and surfaces a fatal in-band error once the retry
//! ceiling is reached.

mod transport;

pub use transport::{
    reconnect_delay, ReconnectingTransport, Subscription, TransportConfig, TransportState,
};
