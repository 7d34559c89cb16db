//! Sh Protocol Message Types
//!
//! Typed request, answer and notification values exchanged with the
//! transport. Encoding and decoding happen outside this crate; the types
//! here are what the codec hands us and what it accepts back.
//!
//! # Message Kinds
//!
//! - `ProfileQuery`: user data request, answered once
//! - `SubscribeRequest`: subscribe-notifications request, answered once and
//!   optionally followed by recurring push notifications
//! - `PushAck`: the subscriber's answer to a push notification
//! - `Answer`: server answer to a profile query or subscribe request
//! - `PushNotification`: server-initiated profile update

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::subscription::ActivityHandle;

// =============================================================================
// Constants
// =============================================================================

/// AVP code of the `Request-Number` extension attribute.
pub const REQUEST_NUMBER_AVP_CODE: u32 = 705;

// =============================================================================
// Correlation
// =============================================================================

/// Correlation pair used to match answers to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    /// Hop-by-hop identifier.
    pub hop_by_hop: u32,
    /// End-to-end identifier.
    pub end_to_end: u32,
}

impl Correlation {
    /// Create a correlation pair.
    #[must_use]
    pub const fn new(hop_by_hop: u32, end_to_end: u32) -> Self {
        Self {
            hop_by_hop,
            end_to_end,
        }
    }
}

impl std::fmt::Display for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hbh={:#010x} e2e={:#010x}", self.hop_by_hop, self.end_to_end)
    }
}

// =============================================================================
// Result Codes
// =============================================================================

/// Diameter result code carried by answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultCode(pub u32);

impl ResultCode {
    /// `DIAMETER_SUCCESS`.
    pub const SUCCESS: Self = Self(2001);

    /// Whether the code is in the 2xxx success class.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 2000 && self.0 < 3000
    }
}

impl Default for ResultCode {
    fn default() -> Self {
        Self::SUCCESS
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Extension Attributes
// =============================================================================

/// An extension attribute (AVP) as delivered by the codec.
///
/// The payload is opaque here; answers copy it byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avp {
    /// Attribute code.
    pub code: u32,
    /// Raw attribute payload.
    pub data: Vec<u8>,
}

impl Avp {
    /// Create an attribute.
    #[must_use]
    pub fn new(code: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }

    /// An attribute with no payload cannot be passed through.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.data.is_empty()
    }
}

/// Return the first attribute with `code`, if any.
#[must_use]
pub fn find_avp(avps: &[Avp], code: u32) -> Option<&Avp> {
    avps.iter().find(|avp| avp.code == code)
}

// =============================================================================
// Requests
// =============================================================================

/// Subscription kind requested by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Single answer, no follow-up notifications.
    OneTime,
    /// Recurring push notifications until the activity ends.
    Subscribe,
}

impl SubscriptionKind {
    /// Whether this kind keeps a timer armed.
    #[must_use]
    pub const fn is_recurring(self) -> bool {
        matches!(self, Self::Subscribe)
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneTime => "one_time",
            Self::Subscribe => "subscribe",
        }
    }
}

/// User profile query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileQuery {
    /// Correlation pair from the request header.
    pub correlation: Correlation,
    /// Extension attributes (codes may repeat).
    pub avps: Vec<Avp>,
}

impl ProfileQuery {
    /// Create a profile query without extension attributes.
    #[must_use]
    pub const fn new(correlation: Correlation) -> Self {
        Self {
            correlation,
            avps: Vec::new(),
        }
    }
}

/// Subscribe-notifications request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Correlation pair from the request header.
    pub correlation: Correlation,
    /// Requested subscription kind.
    pub kind: SubscriptionKind,
    /// Extension attributes (codes may repeat).
    pub avps: Vec<Avp>,
}

impl SubscribeRequest {
    /// Create a subscribe request without extension attributes.
    #[must_use]
    pub const fn new(correlation: Correlation, kind: SubscriptionKind) -> Self {
        Self {
            correlation,
            kind,
            avps: Vec::new(),
        }
    }

    /// Attach an extension attribute.
    #[must_use]
    pub fn with_avp(mut self, avp: Avp) -> Self {
        self.avps.push(avp);
        self
    }

    /// The `Request-Number` attribute, when present and well formed.
    #[must_use]
    pub fn request_number(&self) -> Option<&Avp> {
        find_avp(&self.avps, REQUEST_NUMBER_AVP_CODE).filter(|avp| !avp.is_malformed())
    }
}

/// Subscriber acknowledgement of a push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Correlation pair of the acknowledged notification.
    pub correlation: Correlation,
    /// Result code reported by the subscriber.
    pub result_code: ResultCode,
}

// =============================================================================
// Answers
// =============================================================================

/// Which request an answer responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerKind {
    /// Answer to a `ProfileQuery`.
    ProfileQuery,
    /// Answer to a `SubscribeRequest`.
    Subscribe,
}

/// Server answer, sent exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Request this answer responds to.
    pub kind: AnswerKind,
    /// Correlation pair copied from the request.
    pub correlation: Correlation,
    /// Result code.
    pub result_code: ResultCode,
    /// Extension attributes carried back to the requester.
    pub extension_avps: Vec<Avp>,
}

// =============================================================================
// Push Notifications
// =============================================================================

/// Server-initiated profile update for an active subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    /// Freshly allocated correlation pair.
    pub correlation: Correlation,
    /// Activity of the subscription being notified.
    pub activity: ActivityHandle,
    /// Per-subscription sequence number, starting at 1.
    pub sequence: u64,
    /// When the notification was built.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
