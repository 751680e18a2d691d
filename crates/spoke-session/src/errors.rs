//! Errors surfaced by channel handles.
//!
//! Command-level failures (unknown command, handler error) never appear here
//! as distinct variants: they travel back as ordinary response data and
//! surface as [`CallError::Remote`] strings. Only protocol-level conditions
//! get their own variant.

/// Error from an outgoing call or channel operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The remote side reported an error result. Carries the remote's error
    /// string, e.g. `function <name> not found` or a stringified handler
    /// failure.
    Remote(String),
    /// The channel was destroyed while the call was pending.
    ChannelClosed,
    /// The hub did not recognize this session; the peer is re-handshaking
    /// and the wrapped request was failed immediately.
    UnexpectedPeer,
    /// The target peer id has no connection record on the hub.
    NotRegistered,
    /// The driver task is gone; the handle outlived its channel.
    DriverGone,
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Remote(msg) => write!(f, "remote error: {msg}"),
            CallError::ChannelClosed => write!(f, "channel closed"),
            CallError::UnexpectedPeer => write!(f, "peer unexpected at hub"),
            CallError::NotRegistered => write!(f, "client is not registered"),
            CallError::DriverGone => write!(f, "driver task stopped"),
        }
    }
}

impl std::error::Error for CallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_protocol_wording() {
        assert_eq!(CallError::ChannelClosed.to_string(), "channel closed");
        assert_eq!(
            CallError::NotRegistered.to_string(),
            "client is not registered"
        );
        assert_eq!(
            CallError::Remote("function frob not found".into()).to_string(),
            "remote error: function frob not found"
        );
    }
}
