#![deny(unsafe_code)]

//! Session layer for the spoke channel protocol.
//!
//! One coordinating hub talks to any number of lightweight peers over a
//! transport that can deliver a single opaque envelope at a time, optionally
//! with attached sub-channel endpoints. This crate implements everything
//! above the transport:
//!
//! - session establishment and recovery (handshake, `unexpected` signaling)
//! - request/response correlation for typed command invocations
//! - fire-and-forget emits, gated by the remote side's declared interest
//! - the port multiplexer that lets the hub originate messages at all
//!
//! Both roles follow the same shape: a builder registers commands and
//! listeners, then splits into a cloneable handle and a driver future that
//! the caller spawns. The driver exclusively owns all session state and
//! processes inbound messages one at a time; command handlers run as
//! spawned tasks so intake never stalls behind them.
//!
//! ```ignore
//! let (hub, hub_driver) = HubBuilder::new()
//!     .command("sum", |peer, args| async move { /* ... */ })
//!     .build(hub_transport);
//! tokio::spawn(hub_driver.run());
//!
//! let (peer, peer_driver) = PeerBuilder::new().build(peer_transport);
//! tokio::spawn(peer_driver.run());
//!
//! peer.ready().await?;
//! let answer = peer.request("sum", vec![1.into(), 2.into()]).await?;
//! ```

use std::time::Duration;

mod command;
mod correlate;
mod errors;
mod events;
mod hub;
mod peer;
mod port;
mod transport;

#[cfg(test)]
mod tests;

pub use command::{not_found_error, CommandFuture, CommandOutput, CommandRegistry};
pub use errors::CallError;
pub use events::{is_event_name_allowed, InterestSet, ListenerId, Listeners, RESERVED_EVENTS};
pub use hub::{HubBuilder, HubDriver, HubHandle};
pub use peer::{PeerBuilder, PeerDriver, PeerHandle};
pub use port::{port_pair, PortClosed, PortEndpoint};
pub use transport::{Delivery, HubTransport, PeerTransport};

pub use spoke_wire::{Action, ActionKind, Envelope, PeerId, RequestId, Value, DEFAULT_SCOPE};

/// Configuration shared by both channel roles.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Scope token scoping this channel's traffic on a shared transport.
    pub scope: String,
    /// How often an unacknowledged handshake is re-sent.
    pub handshake_retry: Duration,
    /// Capacity of the driver mailbox and the merged inbound-port stream.
    pub buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            handshake_retry: Duration::from_millis(1000),
            buffer: 256,
        }
    }
}
