//! Message transport abstraction.
//!
//! The protocol treats the outside world as a single capability: deliver one
//! opaque envelope, with zero or more attached sub-channel endpoints, and get
//! a callback when one arrives. Anything that can do that can carry a
//! channel; `spoke-mem` provides the in-process implementation.
//!
//! The two roles see different halves of the contract. The initiating peer
//! both sends and receives. The hub only receives: every hub-originated
//! message rides a pooled [`PortEndpoint`](crate::PortEndpoint) previously
//! supplied by the target peer, which is the whole point of the port
//! multiplexer.

use std::future::Future;
use std::io;

use spoke_wire::Envelope;

use crate::port::PortEndpoint;

/// One arriving message: the envelope plus whatever endpoints rode along.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    pub ports: Vec<PortEndpoint>,
}

impl Delivery {
    /// A delivery with no attached endpoints.
    pub fn bare(envelope: Envelope) -> Self {
        Self {
            envelope,
            ports: Vec::new(),
        }
    }
}

/// Transport as seen by the initiating peer: a duplex link to the hub.
pub trait PeerTransport: Send + 'static {
    /// Deliver one envelope with attached endpoints to the hub. Best effort.
    fn send(
        &mut self,
        envelope: Envelope,
        ports: Vec<PortEndpoint>,
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Receive the next hub-addressed message.
    ///
    /// Returns `Ok(None)` when the transport is closed.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Delivery>>> + Send;
}

/// Transport as seen by the accepting hub: the funnel all peers send into.
///
/// Senders are identified by the `peer_id` carried inside each action, not by
/// the transport.
pub trait HubTransport: Send + 'static {
    /// Receive the next message from any peer.
    ///
    /// Returns `Ok(None)` when the transport is closed.
    fn recv(&mut self) -> impl Future<Output = io::Result<Option<Delivery>>> + Send;
}
