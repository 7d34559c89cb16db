//! Peer Diagnostics
//!
//! Read-only startup report of the peers the transport is connected to.

use serde::Serialize;
use uuid::Uuid;

use crate::application::ports::TransportPort;
use crate::domain::peer::{Peer, PeerIdentity};

/// Snapshot of peer connectivity for one service activation.
#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    /// ID of the service activation that produced the report.
    pub activation_id: Uuid,
    /// Identities of connected peers, sorted.
    pub connected: Vec<PeerIdentity>,
    /// Known peers that are not connected.
    pub other: Vec<Peer>,
}

impl PeerReport {
    /// Build a report from the transport's peer listing.
    #[must_use]
    pub fn collect(activation_id: Uuid, transport: &dyn TransportPort) -> Self {
        let (connected, other): (Vec<Peer>, Vec<Peer>) = transport
            .connected_peers()
            .into_iter()
            .partition(Peer::is_connected);

        let mut connected: Vec<_> = connected.into_iter().map(|peer| peer.identity).collect();
        connected.sort();

        Self {
            activation_id,
            connected,
            other,
        }
    }

    /// Number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.connected.len()
    }

    /// Write the report to the log.
    pub fn log(&self) {
        tracing::info!(
            activation_id = %self.activation_id,
            peer_count = self.peer_count(),
            "Connected to {} peers",
            self.peer_count()
        );

        for identity in &self.connected {
            tracing::info!(activation_id = %self.activation_id, peer = %identity, "Connected peer");
        }

        for peer in &self.other {
            tracing::warn!(
                activation_id = %self.activation_id,
                peer = %peer.identity,
                status = ?peer.status,
                "Peer not connected"
            );
        }
    }
}
