//! Peer Types
//!
//! Identities of the Diameter peers the transport is connected to.

use serde::Serialize;

/// Opaque peer identity (typically a `DiameterIdentity` such as `aaa://host:3868`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Create a peer identity.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// The identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Peer connection status as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Connection established and usable.
    Connected,
    /// Connection being established.
    Connecting,
    /// Connection dropped.
    Disconnected,
}

/// A peer known to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    /// Peer identity.
    pub identity: PeerIdentity,
    /// Current connection status.
    pub status: PeerStatus,
}

impl Peer {
    /// Create a connected peer.
    #[must_use]
    pub fn connected(identity: impl Into<String>) -> Self {
        Self {
            identity: PeerIdentity::new(identity),
            status: PeerStatus::Connected,
        }
    }

    /// Whether the peer is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.status, PeerStatus::Connected)
    }
}
