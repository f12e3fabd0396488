//! Error types for the Bebida environment abstraction.

use crate::types::PeerId;
use thiserror::Error;

/// Errors that can occur while exchanging frames with a peer.
///
/// All of them are fatal for the broker: there is no retry tier.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Socket-level failure (bind, connect, send, receive)
    #[error("Transport error on {peer} link: {reason}")]
    Transport { peer: PeerId, reason: String },

    /// The other side of the link went away
    #[error("Link to {0} closed")]
    Closed(PeerId),

    /// Request/reply discipline violated (reply without request, double receive)
    #[error("Out-of-sequence exchange on {peer} link: {reason}")]
    OutOfSequence { peer: PeerId, reason: &'static str },
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(peer: PeerId, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            peer,
            reason: reason.to_string(),
        }
    }

    /// Creates a closed-link error.
    pub fn closed(peer: PeerId) -> Self {
        Self::Closed(peer)
    }

    /// Creates an out-of-sequence error.
    pub fn out_of_sequence(peer: PeerId, reason: &'static str) -> Self {
        Self::OutOfSequence { peer, reason }
    }

    /// Returns true if the peer simply hung up.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}
