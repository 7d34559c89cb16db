//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `TransportPort`: sends answers and push notifications, lists peers
//! - `TimerPort`: schedules and cancels delayed timer fires
//!
//! ## Driver Side (Inbound)
//!
//! Inbound requests and timer fires enter through the runtime's event
//! channel and are routed by the dispatcher.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::message::{Answer, PushNotification};
use crate::domain::peer::Peer;
use crate::domain::subscription::{ActivityHandle, TimerId};

// =============================================================================
// Transport Port
// =============================================================================

/// Transport port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The activity is no longer known to the transport.
    #[error("activity {activity} is closed")]
    ActivityClosed {
        /// The closed activity.
        activity: ActivityHandle,
    },

    /// The outbound path is gone.
    #[error("transport disconnected")]
    Disconnected,

    /// Sending failed.
    #[error("send failed: {message}")]
    SendFailed {
        /// Error details.
        message: String,
    },
}

/// Port for the message transport/codec provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// Send an answer on `activity`.
    async fn send_answer(&self, activity: ActivityHandle, answer: Answer)
    -> Result<(), TransportError>;

    /// Send a push notification on `activity`.
    async fn send_push_notification(
        &self,
        activity: ActivityHandle,
        notification: PushNotification,
    ) -> Result<(), TransportError>;

    /// Peers currently known to the transport.
    fn connected_peers(&self) -> Vec<Peer>;
}

// =============================================================================
// Timer Port
// =============================================================================

/// Timer port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// The facility is not accepting timers.
    #[error("timer facility unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },
}

/// Port for the delay-scheduling facility.
///
/// Fires are delivered back to the dispatcher as timer events carrying the
/// activity handle and the `TimerId` returned here.
#[cfg_attr(test, mockall::automock)]
pub trait TimerPort: Send + Sync {
    /// Schedule a fire for `activity` after `delay`.
    ///
    /// With `recurring` the facility keeps firing every `delay` under the
    /// same ID until canceled.
    fn schedule(
        &self,
        activity: ActivityHandle,
        delay: Duration,
        recurring: bool,
    ) -> Result<TimerId, TimerError>;

    /// Cancel a timer. Unknown or already-fired IDs are ignored.
    fn cancel(&self, timer: TimerId);
}
