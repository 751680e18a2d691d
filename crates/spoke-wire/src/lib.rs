#![deny(unsafe_code)]

//! Wire-level types for the spoke channel protocol.
//!
//! An [`Envelope`] is the unit of delivery: a scope token plus one [`Action`].
//! The scope token lets the protocol share a transport with unrelated traffic;
//! a receiver silently ignores envelopes whose scope differs from its own.
//!
//! Payload values (request arguments, results, event arguments) are opaque
//! [`Value`]s. How an envelope is serialized on a concrete transport is the
//! transport's business; these types only fix the shapes.

use serde::{Deserialize, Serialize};

pub use serde_json::Value;

/// The scope token channels use unless configured otherwise.
///
/// Both sides must agree on the token; it is a namespace, not a secret.
pub const DEFAULT_SCOPE: &str = "904a8e57aa9142909c425a6f86514632";

/// Identifies one peer session.
///
/// Generated by the peer at construction and carried on every peer-originated
/// action so the hub can tell its connections apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub ulid::Ulid);

impl PeerId {
    /// Generate a fresh peer id.
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// Identifies an in-flight request on one channel.
///
/// Request ids are unique within the channel that issued them and
/// monotonically increasing, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a request id from its raw value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

/// One protocol message.
///
/// `peer_id` is set on every peer-originated action (the hub keys its
/// connection registry on it) and absent on hub-originated traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<PeerId>,
}

impl Action {
    /// An action originated by the given peer.
    pub fn from_peer(peer_id: PeerId, kind: ActionKind) -> Self {
        Self {
            kind,
            peer_id: Some(peer_id),
        }
    }

    /// An action originated by the hub.
    pub fn from_hub(kind: ActionKind) -> Self {
        Self {
            kind,
            peer_id: None,
        }
    }
}

/// The closed set of protocol actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionKind {
    /// Session establishment. `events` lists the sender's locally subscribed
    /// event names, seeding the receiver's interest set for this connection.
    Handshake { events: Vec<String> },
    /// Invoke a named command on the remote side and await a [`ActionKind::Response`].
    Request {
        id: RequestId,
        name: String,
        args: Vec<Value>,
    },
    /// Completion of a request. Exactly one of `result`/`error` is set.
    Response {
        id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Fire-and-forget notifications, ordered. A peer emit is a one-element
    /// batch; a hub flush may carry many pairs in call order.
    Emit { events: Vec<(String, Vec<Value>)> },
    /// Incremental interest change: the sender started (`enable`) or stopped
    /// listening for `name`.
    ChangeEvent { enable: bool, name: String },
    /// The sender is tearing down its side of the session.
    Destroy,
    /// No-data keep-alive. Its only cargo is the endpoint attached to the
    /// envelope, replenishing the hub's pool for this connection.
    Port,
    /// The hub has no session state for the sender. Wraps the action that
    /// triggered it so the sender can fail an in-flight request immediately.
    Unexpected { original: Box<Action> },
}

/// The unit of transport delivery: a scope token plus one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub scope: String,
    pub action: Action,
}

impl Envelope {
    pub fn new(scope: impl Into<String>, action: Action) -> Self {
        Self {
            scope: scope.into(),
            action,
        }
    }

    /// Whether this envelope belongs to a channel using `scope`.
    ///
    /// Envelopes that do not match are unrelated traffic and must be ignored.
    pub fn matches_scope(&self, scope: &str) -> bool {
        self.scope == scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ids_are_unique() {
        assert_ne!(PeerId::new(), PeerId::new());
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::new(7).to_string(), "req:7");
    }

    #[test]
    fn scope_matching() {
        let env = Envelope::new(DEFAULT_SCOPE, Action::from_hub(ActionKind::Port));
        assert!(env.matches_scope(DEFAULT_SCOPE));
        assert!(!env.matches_scope("someone-elses-traffic"));
    }

    #[test]
    fn action_kind_round_trips_through_json() {
        let peer = PeerId::new();
        let action = Action::from_peer(
            peer,
            ActionKind::Request {
                id: RequestId::new(3),
                name: "sum".into(),
                args: vec![Value::from(1), Value::from(2)],
            },
        );
        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn unexpected_wraps_the_original_action() {
        let peer = PeerId::new();
        let original = Action::from_peer(
            peer,
            ActionKind::Request {
                id: RequestId::new(9),
                name: "missing".into(),
                args: vec![],
            },
        );
        let wrapped = Action::from_hub(ActionKind::Unexpected {
            original: Box::new(original.clone()),
        });
        match wrapped.kind {
            ActionKind::Unexpected { original: inner } => assert_eq!(*inner, original),
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
