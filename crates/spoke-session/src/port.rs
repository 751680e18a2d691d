//! Sub-channel endpoints.
//!
//! The transport carries one envelope at a time, so the accepting side has no
//! way to push a message later without one of these: a [`PortEndpoint`] is one
//! half of a paired duplex sub-channel that can be attached to an outgoing
//! envelope. The peer attaches a fresh half to everything it sends; the hub
//! pools the received halves per connection and spends one per hub-originated
//! message.

use tokio::sync::mpsc;

use crate::transport::Delivery;

/// Buffered deliveries per endpoint before `send` waits.
pub(crate) const PORT_CAPACITY: usize = 64;

/// One half of a paired sub-channel.
///
/// A [`Delivery`] written on one half is readable on the other. Endpoints are
/// plain values and travel inside [`Delivery::ports`].
#[derive(Debug)]
pub struct PortEndpoint {
    tx: mpsc::Sender<Delivery>,
    rx: mpsc::Receiver<Delivery>,
}

impl PortEndpoint {
    /// Write a delivery to the paired half.
    ///
    /// Fails if the paired half was dropped.
    pub async fn send(&self, delivery: Delivery) -> Result<(), PortClosed> {
        self.tx.send(delivery).await.map_err(|_| PortClosed)
    }

    /// Read the next delivery written on the paired half.
    ///
    /// Returns `None` once the paired half is dropped and all buffered
    /// deliveries have been read.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// The paired half of a port was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortClosed;

impl std::fmt::Display for PortClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port closed")
    }
}

impl std::error::Error for PortClosed {}

/// Create two linked sub-channel endpoints.
///
/// This is the pairing primitive the protocol builds on: keep one half, ship
/// the other inside an envelope, and either holder can later write to the
/// remote one.
pub fn port_pair() -> (PortEndpoint, PortEndpoint) {
    let (a_tx, a_rx) = mpsc::channel(PORT_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(PORT_CAPACITY);

    let a = PortEndpoint { tx: a_tx, rx: b_rx };
    let b = PortEndpoint { tx: b_tx, rx: a_rx };

    (a, b)
}
