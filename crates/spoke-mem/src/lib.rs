#![deny(unsafe_code)]

//! In-memory transport for spoke channels.
//!
//! One hub end, any number of peer ends attached through a cloneable
//! [`MemoryHubLink`]. Envelopes and attached endpoints move as plain values
//! over bounded channels, which makes this the transport used by the test
//! suite and any fully in-process embedding.
//!
//! ```ignore
//! let (hub_transport, link) = memory_hub(64);
//! let peer_transport = link.attach();
//! // hand hub_transport to a HubDriver, peer_transport to a PeerDriver
//! ```

use std::io;

use spoke_session::{Delivery, Envelope, HubTransport, PeerTransport, PortEndpoint};
use tokio::sync::mpsc;

/// Create the hub end of an in-memory transport plus the link peers attach
/// through.
pub fn memory_hub(buffer: usize) -> (MemoryHubTransport, MemoryHubLink) {
    let (tx, rx) = mpsc::channel(buffer);
    (
        MemoryHubTransport { rx },
        MemoryHubLink { tx, buffer },
    )
}

/// The accepting end: every attached peer's messages funnel into it.
///
/// `recv` yields `None` once the link and all attached peer ends are gone.
pub struct MemoryHubTransport {
    rx: mpsc::Receiver<Delivery>,
}

impl HubTransport for MemoryHubTransport {
    async fn recv(&mut self) -> io::Result<Option<Delivery>> {
        Ok(self.rx.recv().await)
    }
}

/// Attachment point for peer ends. Cheap to clone.
#[derive(Clone)]
pub struct MemoryHubLink {
    tx: mpsc::Sender<Delivery>,
    buffer: usize,
}

impl MemoryHubLink {
    /// Create a new peer end delivering into the hub.
    pub fn attach(&self) -> MemoryPeerTransport {
        let (direct_tx, direct_rx) = mpsc::channel(self.buffer);
        MemoryPeerTransport {
            to_hub: self.tx.clone(),
            from_hub: direct_rx,
            _from_hub_tx: direct_tx,
        }
    }
}

/// A peer's end of the transport.
///
/// The hub pushes through peer-supplied sub-channel endpoints rather than
/// the transport, so `recv` stays pending unless the process feeds the
/// direct lane; it exists so the contract is symmetric with real duplex
/// transports.
pub struct MemoryPeerTransport {
    to_hub: mpsc::Sender<Delivery>,
    from_hub: mpsc::Receiver<Delivery>,
    _from_hub_tx: mpsc::Sender<Delivery>,
}

impl PeerTransport for MemoryPeerTransport {
    async fn send(&mut self, envelope: Envelope, ports: Vec<PortEndpoint>) -> io::Result<()> {
        self.to_hub
            .send(Delivery { envelope, ports })
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "hub disconnected"))
    }

    async fn recv(&mut self) -> io::Result<Option<Delivery>> {
        Ok(self.from_hub.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use spoke_wire::{Action, ActionKind, PeerId, DEFAULT_SCOPE};

    use super::*;

    #[tokio::test]
    async fn peer_sends_reach_the_hub_end() {
        let (mut hub, link) = memory_hub(8);
        let mut peer = link.attach();

        let envelope = Envelope::new(
            DEFAULT_SCOPE,
            Action::from_peer(PeerId::new(), ActionKind::Port),
        );
        peer.send(envelope.clone(), Vec::new()).await.unwrap();

        let delivery = hub.recv().await.unwrap().unwrap();
        assert_eq!(delivery.envelope, envelope);
        assert!(delivery.ports.is_empty());
    }

    #[tokio::test]
    async fn attached_endpoints_travel_with_the_envelope() {
        let (mut hub, link) = memory_hub(8);
        let mut peer = link.attach();

        let (_retained, shipped) = spoke_session::port_pair();
        let envelope = Envelope::new(
            DEFAULT_SCOPE,
            Action::from_peer(PeerId::new(), ActionKind::Port),
        );
        peer.send(envelope, vec![shipped]).await.unwrap();

        let delivery = hub.recv().await.unwrap().unwrap();
        assert_eq!(delivery.ports.len(), 1);
    }

    #[tokio::test]
    async fn hub_end_closes_when_all_senders_drop() {
        let (mut hub, link) = memory_hub(8);
        drop(link);
        assert!(hub.recv().await.unwrap().is_none());
    }
}
