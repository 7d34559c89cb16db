//! Subscription Registry
//!
//! Tracks notification subscriptions keyed by activity handle.
//!
//! # Design
//!
//! Each logical protocol exchange is identified by an `ActivityHandle`.
//! A subscribe request creates (or updates) one `SubscriptionRecord` for
//! its handle. Records of kind `Subscribe` own exactly one pending timer
//! while active; records of kind `OneTime` never own one. Ending an
//! activity removes its record, so the registry only ever holds active
//! records.
//!
//! The registry does not talk to the scheduling facility. Operations that
//! detach a timer hand the `TimerTask` back so the caller can cancel it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::message::SubscriptionKind;

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque identifier correlating all events of one protocol exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityHandle(pub u64);

impl std::fmt::Display for ActivityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "activity-{}", self.0)
    }
}

/// Identifier of a scheduled timer, unique per scheduling facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

// =============================================================================
// Records
// =============================================================================

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Subscription is live.
    Active,
    /// Subscription has ended; never stored in the registry.
    Ended,
}

/// A pending timer owned by a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerTask {
    /// Facility-assigned timer ID.
    pub id: TimerId,
    /// Owning activity.
    pub activity: ActivityHandle,
    /// When the timer is due.
    pub fire_at: DateTime<Utc>,
    /// Whether the owner re-arms the timer after each fire.
    pub recurring: bool,
}

/// A tracked subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    /// Owning activity.
    pub activity: ActivityHandle,
    /// Subscription kind.
    pub kind: SubscriptionKind,
    /// Lifecycle state.
    pub state: SubscriptionState,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the last push notification was sent.
    pub last_notified: Option<DateTime<Utc>>,
    /// Pending timer, if any.
    pub timer: Option<TimerTask>,
    /// Push notifications sent so far.
    pub notifications_sent: u64,
    /// Push acknowledgements received so far.
    pub acks_received: u64,
}

impl SubscriptionRecord {
    fn new(activity: ActivityHandle, kind: SubscriptionKind) -> Self {
        Self {
            activity,
            kind,
            state: SubscriptionState::Active,
            created_at: Utc::now(),
            last_notified: None,
            timer: None,
            notifications_sent: 0,
            acks_received: 0,
        }
    }

    /// Notifications sent but not yet acknowledged.
    #[must_use]
    pub const fn unacknowledged(&self) -> u64 {
        self.notifications_sent.saturating_sub(self.acks_received)
    }
}

// =============================================================================
// Operation Results
// =============================================================================

/// Result of creating or updating a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Whether a new record was created.
    pub created: bool,
    /// Whether the caller must arm a timer for the record.
    pub needs_timer: bool,
    /// Timer detached by a kind change; the caller must cancel it.
    pub detached_timer: Option<TimerTask>,
}

/// Result of resolving a timer fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireResolution {
    /// Active record found; a notification with `sequence` is due.
    Notify {
        /// Sequence number of the notification to send.
        sequence: u64,
        /// Whether a new timer must be armed afterwards.
        rearm: bool,
    },
    /// Record found but the fired timer is not its pending timer.
    Stale,
    /// No record for the handle.
    Missing,
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe registry of active subscriptions.
///
/// Record and pending-timer counts are maintained on every transition, so
/// [`counts`](Self::counts) is O(1). [`stats`](Self::stats) walks every
/// record and is meant for on-demand reporting.
///
/// # Example
///
/// ```rust
/// use sh_server::domain::message::SubscriptionKind;
/// use sh_server::domain::subscription::{ActivityHandle, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let activity = ActivityHandle(42);
///
/// let outcome = registry.upsert(activity, SubscriptionKind::Subscribe);
/// assert!(outcome.created);
/// assert!(outcome.needs_timer);
///
/// let ended = registry.end(activity).unwrap();
/// assert!(registry.get(activity).is_none());
/// assert_eq!(ended.activity, activity);
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    records: HashMap<ActivityHandle, SubscriptionRecord>,
    pending_timers: usize,
}

impl RegistryInner {
    fn release_timer(&mut self, timer: Option<&TimerTask>) {
        if timer.is_some() {
            self.pending_timers = self.pending_timers.saturating_sub(1);
        }
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update the record for `activity` with `kind`, state active.
    pub fn upsert(&self, activity: ActivityHandle, kind: SubscriptionKind) -> UpsertOutcome {
        let mut inner = self.inner.lock();
        let mut created = false;
        let record = inner.records.entry(activity).or_insert_with(|| {
            created = true;
            SubscriptionRecord::new(activity, kind)
        });

        record.kind = kind;
        record.state = SubscriptionState::Active;

        let detached_timer = if kind.is_recurring() {
            None
        } else {
            record.timer.take()
        };
        let needs_timer = kind.is_recurring() && record.timer.is_none();
        inner.release_timer(detached_timer.as_ref());

        UpsertOutcome {
            created,
            needs_timer,
            detached_timer,
        }
    }

    /// Attach a freshly scheduled timer to its owning record.
    ///
    /// Hands the task back when the record is gone, is not recurring, or
    /// already owns a timer; the caller must cancel it.
    pub fn attach_timer(&self, task: TimerTask) -> Result<(), TimerTask> {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(&task.activity) {
            Some(record) if record.kind.is_recurring() && record.timer.is_none() => {
                record.timer = Some(task);
                inner.pending_timers += 1;
                Ok(())
            }
            _ => Err(task),
        }
    }

    /// Resolve a fire of `timer` for `activity`.
    ///
    /// On `Notify` the fired timer is detached, the notification counters
    /// and `last_notified` are updated.
    pub fn resolve_fire(&self, activity: ActivityHandle, timer: TimerId) -> FireResolution {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get_mut(&activity) else {
            return FireResolution::Missing;
        };

        if record.timer.as_ref().map(|t| t.id) != Some(timer) {
            return FireResolution::Stale;
        }

        let fired = record.timer.take();
        let rearm = fired.as_ref().is_some_and(|t| t.recurring);
        record.notifications_sent += 1;
        record.last_notified = Some(Utc::now());
        let sequence = record.notifications_sent;
        inner.release_timer(fired.as_ref());

        FireResolution::Notify { sequence, rearm }
    }

    /// Count a push acknowledgement. Returns `false` for unknown handles.
    pub fn record_ack(&self, activity: ActivityHandle) -> bool {
        let mut inner = self.inner.lock();
        let Some(record) = inner.records.get_mut(&activity) else {
            return false;
        };
        record.acks_received += 1;
        true
    }

    /// End the subscription for `activity`.
    ///
    /// Returns the removed record in state `Ended`, still carrying its
    /// pending timer for the caller to cancel. `None` if absent.
    pub fn end(&self, activity: ActivityHandle) -> Option<SubscriptionRecord> {
        let mut inner = self.inner.lock();
        let mut record = inner.records.remove(&activity)?;
        inner.release_timer(record.timer.as_ref());
        record.state = SubscriptionState::Ended;
        Some(record)
    }

    /// End every subscription.
    pub fn drain(&self) -> Vec<SubscriptionRecord> {
        let mut inner = self.inner.lock();
        inner.pending_timers = 0;
        let mut records: Vec<_> = inner
            .records
            .drain()
            .map(|(_, mut record)| {
                record.state = SubscriptionState::Ended;
                record
            })
            .collect();
        drop(inner);
        records.sort_by_key(|record| record.activity);
        records
    }

    /// Snapshot of the record for `activity`.
    #[must_use]
    pub fn get(&self, activity: ActivityHandle) -> Option<SubscriptionRecord> {
        self.inner.lock().records.get(&activity).cloned()
    }

    /// All known activity handles, sorted.
    #[must_use]
    pub fn handles(&self) -> Vec<ActivityHandle> {
        let mut handles: Vec<_> = self.inner.lock().records.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Number of tracked subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Whether no subscriptions are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Active subscription and pending timer counts, without a scan.
    #[must_use]
    pub fn counts(&self) -> RegistryCounts {
        let inner = self.inner.lock();
        RegistryCounts {
            active: inner.records.len(),
            pending_timers: inner.pending_timers,
        }
    }

    /// Full registry statistics. Walks every record.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        let mut stats = RegistryStats::default();
        for record in inner.records.values() {
            match record.kind {
                SubscriptionKind::OneTime => stats.one_time += 1,
                SubscriptionKind::Subscribe => stats.recurring += 1,
            }
            if record.timer.is_some() {
                stats.pending_timers += 1;
            }
            stats.unacknowledged += record.unacknowledged();
        }
        stats.active = inner.records.len();
        stats
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counts kept up to date by every registry transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    /// Active subscriptions.
    pub active: usize,
    /// Pending timers owned by records.
    pub pending_timers: usize,
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Active subscriptions.
    pub active: usize,
    /// Active `OneTime` subscriptions.
    pub one_time: usize,
    /// Active `Subscribe` subscriptions.
    pub recurring: usize,
    /// Pending timers owned by records.
    pub pending_timers: usize,
    /// Notifications sent but not acknowledged, across all records.
    pub unacknowledged: u64,
}

// =============================================================================
// Tests
// =============================================================================
