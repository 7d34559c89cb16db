//! Correlation and Answer Building
//!
//! Answers echo the correlation pair of the request they respond to.
//! Server-initiated push notifications get a fresh pair from
//! `CorrelationAllocator`.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

use crate::domain::message::{
    Answer, AnswerKind, Avp, Correlation, ProfileQuery, PushNotification, ResultCode,
    SubscribeRequest,
};
use crate::domain::subscription::ActivityHandle;

/// Builds answers stamped with the request's correlation pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerBuilder {
    result_code: ResultCode,
}

impl AnswerBuilder {
    /// Builder with the default `DIAMETER_SUCCESS` result code.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the result code.
    #[must_use]
    pub const fn with_result_code(mut self, result_code: ResultCode) -> Self {
        self.result_code = result_code;
        self
    }

    /// Answer to a profile query.
    #[must_use]
    pub fn profile_query(&self, request: &ProfileQuery) -> Answer {
        self.answer(AnswerKind::ProfileQuery, request.correlation, Vec::new())
    }

    /// Answer to a subscribe request.
    ///
    /// A well-formed `Request-Number` attribute is copied verbatim.
    #[must_use]
    pub fn subscribe(&self, request: &SubscribeRequest) -> Answer {
        let extension_avps: Vec<Avp> = request.request_number().cloned().into_iter().collect();
        self.answer(AnswerKind::Subscribe, request.correlation, extension_avps)
    }

    fn answer(&self, kind: AnswerKind, correlation: Correlation, extension_avps: Vec<Avp>) -> Answer {
        Answer {
            kind,
            correlation,
            result_code: self.result_code,
            extension_avps,
        }
    }
}

/// Allocates correlation pairs for server-initiated requests.
///
/// Hop-by-hop IDs start at a random value and increment. End-to-end IDs
/// carry the low 12 bits of the start time in their high bits and a
/// random-seeded 20-bit counter in their low bits.
#[derive(Debug)]
pub struct CorrelationAllocator {
    hop_by_hop: AtomicU32,
    end_to_end: AtomicU32,
    time_bits: u32,
}

impl Default for CorrelationAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationAllocator {
    const COUNTER_MASK: u32 = 0x000F_FFFF;

    /// Create an allocator seeded from the clock and RNG.
    #[must_use]
    pub fn new() -> Self {
        #[allow(clippy::cast_sign_loss)]
        let seconds = Utc::now().timestamp() as u64;
        Self::with_seed(rand::random(), rand::random(), seconds)
    }

    /// Create an allocator with explicit seeds.
    #[must_use]
    pub fn with_seed(hop_by_hop: u32, end_to_end: u32, unix_seconds: u64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let time_bits = ((unix_seconds & 0xFFF) as u32) << 20;
        Self {
            hop_by_hop: AtomicU32::new(hop_by_hop),
            end_to_end: AtomicU32::new(end_to_end & Self::COUNTER_MASK),
            time_bits,
        }
    }

    /// Allocate the next correlation pair.
    pub fn allocate(&self) -> Correlation {
        let hop_by_hop = self.hop_by_hop.fetch_add(1, Ordering::Relaxed);
        let counter = self.end_to_end.fetch_add(1, Ordering::Relaxed) & Self::COUNTER_MASK;
        Correlation::new(hop_by_hop, self.time_bits | counter)
    }

    /// Build a push notification for `activity` with a fresh correlation pair.
    pub fn push_notification(&self, activity: ActivityHandle, sequence: u64) -> PushNotification {
        PushNotification {
            correlation: self.allocate(),
            activity,
            sequence,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
