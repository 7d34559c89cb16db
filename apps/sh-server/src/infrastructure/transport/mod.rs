//! Channel Transport
//!
//! In-process `TransportPort` that forwards outbound answers and push
//! notifications onto an unbounded channel. The host binary drains the
//! receiving side; integration tests assert on it directly.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::application::ports::{TransportError, TransportPort};
use crate::domain::message::{Answer, PushNotification};
use crate::domain::peer::{Peer, PeerIdentity, PeerStatus};
use crate::domain::subscription::ActivityHandle;

/// A message handed to the transport for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Answer to a profile query or subscribe request.
    Answer {
        /// Activity the answer belongs to.
        activity: ActivityHandle,
        /// The answer.
        answer: Answer,
    },
    /// Server-initiated push notification.
    PushNotification {
        /// Activity the notification belongs to.
        activity: ActivityHandle,
        /// The notification.
        notification: PushNotification,
    },
}

impl OutboundMessage {
    /// Activity the message is addressed to.
    #[must_use]
    pub const fn activity(&self) -> ActivityHandle {
        match self {
            Self::Answer { activity, .. } | Self::PushNotification { activity, .. } => *activity,
        }
    }
}

/// Transport backed by an unbounded Tokio channel.
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    peers: RwLock<Vec<Peer>>,
    closed: Mutex<HashSet<ActivityHandle>>,
}

impl ChannelTransport {
    /// Create a transport and the receiver for its outbound messages.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let transport = Self {
            outbound,
            peers: RwLock::new(Vec::new()),
            closed: Mutex::new(HashSet::new()),
        };
        (transport, rx)
    }

    /// Replace the peer list with connected peers for `identities`.
    pub fn set_peers(&self, identities: impl IntoIterator<Item = PeerIdentity>) {
        let peers = identities
            .into_iter()
            .map(|identity| Peer {
                identity,
                status: PeerStatus::Connected,
            })
            .collect();
        *self.peers.write() = peers;
    }

    /// Add or update a peer.
    pub fn upsert_peer(&self, peer: Peer) {
        let mut peers = self.peers.write();
        match peers.iter_mut().find(|p| p.identity == peer.identity) {
            Some(existing) => existing.status = peer.status,
            None => peers.push(peer),
        }
    }

    /// Mark an activity closed; later sends on it fail.
    pub fn close_activity(&self, activity: ActivityHandle) {
        self.closed.lock().insert(activity);
    }

    /// Accept sends on a closed activity again.
    ///
    /// Returns `false` when the activity was not closed.
    pub fn reopen_activity(&self, activity: ActivityHandle) -> bool {
        self.closed.lock().remove(&activity)
    }

    fn deliver(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let activity = message.activity();
        if self.closed.lock().contains(&activity) {
            return Err(TransportError::ActivityClosed { activity });
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Disconnected)
    }
}

#[async_trait]
impl TransportPort for ChannelTransport {
    async fn send_answer(
        &self,
        activity: ActivityHandle,
        answer: Answer,
    ) -> Result<(), TransportError> {
        self.deliver(OutboundMessage::Answer { activity, answer })
    }

    async fn send_push_notification(
        &self,
        activity: ActivityHandle,
        notification: PushNotification,
    ) -> Result<(), TransportError> {
        self.deliver(OutboundMessage::PushNotification {
            activity,
            notification,
        })
    }

    fn connected_peers(&self) -> Vec<Peer> {
        self.peers.read().clone()
    }
}
