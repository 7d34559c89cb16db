//! Request Dispatcher
//!
//! Routes every inbound event to exactly one handler and isolates
//! failures per event: a handler error is logged with the event context
//! and reported as `DispatchOutcome::Failed`, never propagated.
//!
//! # Handlers
//!
//! | Event | Effect |
//! |---|---|
//! | `ServiceStarted` | peer diagnostics, no state change |
//! | `ProfileQuery` | success answer echoing the correlation pair |
//! | `Subscribe` | answer, record upsert, timer for `Subscribe` kind |
//! | `PushAck` | ack counter on the record |
//! | `TimerFire` | push notification and re-arm, or lookup miss |
//! | `ActivityEnded` | record removal and timer cancel (idempotent) |

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::Instrument;
use uuid::Uuid;

use super::correlation::{AnswerBuilder, CorrelationAllocator};
use super::diagnostics::PeerReport;
use crate::application::ports::{TimerError, TimerPort, TransportError, TransportPort};
use crate::domain::message::{ProfileQuery, PushAck, SubscribeRequest};
use crate::domain::subscription::{
    ActivityHandle, FireResolution, SubscriptionRegistry, TimerId, TimerTask,
};
use crate::infrastructure::metrics;

/// Default push notification interval.
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_millis(5000);

// =============================================================================
// Events
// =============================================================================

/// An inbound event delivered to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The service was activated.
    ServiceStarted,
    /// User profile query.
    ProfileQuery {
        /// Activity the request arrived on.
        activity: ActivityHandle,
        /// The request.
        request: ProfileQuery,
    },
    /// Subscribe-notifications request.
    Subscribe {
        /// Activity the request arrived on.
        activity: ActivityHandle,
        /// The request.
        request: SubscribeRequest,
    },
    /// Subscriber acknowledgement of a push notification.
    PushAck {
        /// Activity the answer arrived on.
        activity: ActivityHandle,
        /// The acknowledgement.
        ack: PushAck,
    },
    /// A scheduled timer fired.
    TimerFire {
        /// Activity the timer was scheduled for.
        activity: ActivityHandle,
        /// The timer that fired.
        timer: TimerId,
    },
    /// The activity ended.
    ActivityEnded {
        /// The ended activity.
        activity: ActivityHandle,
    },
}

impl Event {
    /// Event type label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ServiceStarted => "service_started",
            Self::ProfileQuery { .. } => "profile_query",
            Self::Subscribe { .. } => "subscribe",
            Self::PushAck { .. } => "push_ack",
            Self::TimerFire { .. } => "timer_fire",
            Self::ActivityEnded { .. } => "activity_ended",
        }
    }

    /// Activity the event is bound to, if any.
    #[must_use]
    pub const fn activity(&self) -> Option<ActivityHandle> {
        match self {
            Self::ServiceStarted => None,
            Self::ProfileQuery { activity, .. }
            | Self::Subscribe { activity, .. }
            | Self::PushAck { activity, .. }
            | Self::TimerFire { activity, .. }
            | Self::ActivityEnded { activity } => Some(*activity),
        }
    }
}

// =============================================================================
// Errors and Outcomes
// =============================================================================

/// Handler failure, caught by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The transport could not send.
    #[error("transport failure on {activity}: {source}")]
    Transport {
        /// Affected activity.
        activity: ActivityHandle,
        /// Underlying error.
        source: TransportError,
    },

    /// The scheduling facility refused a timer.
    #[error("timer scheduling failed on {activity}: {source}")]
    Timer {
        /// Affected activity.
        activity: ActivityHandle,
        /// Underlying error.
        source: TimerError,
    },

    /// An event referenced an activity with no subscription.
    #[error("no subscription for {activity}; known activities: [{known}]")]
    UnknownActivity {
        /// The unknown activity.
        activity: ActivityHandle,
        /// Every activity handle in the registry at lookup time.
        known: String,
    },
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler completed.
    Handled,
    /// The handler failed; the failure was logged.
    Failed(DispatchError),
}

impl DispatchOutcome {
    /// Whether the handler completed.
    #[must_use]
    pub const fn is_handled(&self) -> bool {
        matches!(self, Self::Handled)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Dispatcher configuration.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Interval between push notifications for `Subscribe` records.
    pub notify_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            notify_interval: DEFAULT_NOTIFY_INTERVAL,
        }
    }
}

/// Routes inbound events to their handlers.
pub struct RequestDispatcher {
    config: DispatcherConfig,
    transport: Arc<dyn TransportPort>,
    timers: Arc<dyn TimerPort>,
    registry: Arc<SubscriptionRegistry>,
    answers: AnswerBuilder,
    correlations: CorrelationAllocator,
}

impl RequestDispatcher {
    /// Create a dispatcher over the given collaborators.
    #[must_use]
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn TransportPort>,
        timers: Arc<dyn TimerPort>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            config,
            transport,
            timers,
            registry,
            answers: AnswerBuilder::new(),
            correlations: CorrelationAllocator::new(),
        }
    }

    /// The subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Run the handler for `event`.
    pub async fn dispatch(&self, event: Event) -> DispatchOutcome {
        let kind = event.kind();
        let activity = event.activity();
        let span = tracing::debug_span!(
            "dispatch",
            event = kind,
            activity = activity.map(|a| a.0)
        );

        let result = self.route(event).instrument(span).await;

        let counts = self.registry.counts();
        metrics::set_active_subscriptions(counts.active);
        metrics::set_pending_timers(counts.pending_timers);

        match result {
            Ok(()) => {
                metrics::record_event(kind, "handled");
                DispatchOutcome::Handled
            }
            Err(error) => {
                metrics::record_event(kind, "failed");
                match activity {
                    Some(activity) => {
                        tracing::error!(event = kind, activity = %activity, error = %error, "Event handler failed");
                    }
                    None => tracing::error!(event = kind, error = %error, "Event handler failed"),
                }
                DispatchOutcome::Failed(error)
            }
        }
    }

    /// End every subscription and cancel its timer.
    ///
    /// Returns the number of subscriptions ended.
    pub fn end_all(&self) -> usize {
        let ended = self.registry.drain();
        for record in &ended {
            if let Some(timer) = &record.timer {
                self.timers.cancel(timer.id);
            }
        }
        metrics::set_active_subscriptions(0);
        metrics::set_pending_timers(0);
        ended.len()
    }

    async fn route(&self, event: Event) -> Result<(), DispatchError> {
        match event {
            Event::ServiceStarted => {
                self.on_service_started();
                Ok(())
            }
            Event::ProfileQuery { activity, request } => {
                self.on_profile_query(activity, &request).await
            }
            Event::Subscribe { activity, request } => self.on_subscribe(activity, &request).await,
            Event::PushAck { activity, ack } => {
                self.on_push_ack(activity, &ack);
                Ok(())
            }
            Event::TimerFire { activity, timer } => self.on_timer_fire(activity, timer).await,
            Event::ActivityEnded { activity } => {
                self.on_activity_ended(activity);
                Ok(())
            }
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    fn on_service_started(&self) {
        tracing::info!("Sh server application started");
        PeerReport::collect(Uuid::new_v4(), self.transport.as_ref()).log();
    }

    async fn on_profile_query(
        &self,
        activity: ActivityHandle,
        request: &ProfileQuery,
    ) -> Result<(), DispatchError> {
        let answer = self.answers.profile_query(request);
        tracing::info!(
            activity = %activity,
            correlation = %answer.correlation,
            result_code = %answer.result_code,
            "Answering profile query"
        );

        self.transport
            .send_answer(activity, answer)
            .await
            .map_err(|source| transport_failure(activity, "profile_query_answer", source))?;

        metrics::record_answer_sent("profile_query");
        Ok(())
    }

    async fn on_subscribe(
        &self,
        activity: ActivityHandle,
        request: &SubscribeRequest,
    ) -> Result<(), DispatchError> {
        let answer = self.answers.subscribe(request);
        tracing::info!(
            activity = %activity,
            kind = request.kind.as_str(),
            correlation = %answer.correlation,
            request_number = answer.extension_avps.len(),
            "Answering subscribe request"
        );

        // Answer delivery and the registry update are independent steps.
        let sent = self
            .transport
            .send_answer(activity, answer)
            .await
            .map_err(|source| transport_failure(activity, "subscribe_answer", source));
        if sent.is_ok() {
            metrics::record_answer_sent("subscribe");
        }

        let outcome = self.registry.upsert(activity, request.kind);
        if let Some(detached) = outcome.detached_timer {
            self.timers.cancel(detached.id);
            tracing::debug!(activity = %activity, timer = %detached.id, "Canceled timer of downgraded subscription");
        }

        let armed = if outcome.needs_timer {
            self.arm_timer(activity)
        } else {
            Ok(())
        };

        tracing::debug!(
            activity = %activity,
            created = outcome.created,
            "Subscription recorded"
        );

        sent.and(armed)
    }

    fn on_push_ack(&self, activity: ActivityHandle, ack: &PushAck) {
        if !self.registry.record_ack(activity) {
            metrics::record_registry_miss();
            tracing::warn!(
                activity = %activity,
                correlation = %ack.correlation,
                known = %format_handles(&self.registry.handles()),
                "Push ack for unknown activity"
            );
            return;
        }

        if ack.result_code.is_success() {
            tracing::debug!(activity = %activity, correlation = %ack.correlation, "Push notification acknowledged");
        } else {
            tracing::warn!(
                activity = %activity,
                correlation = %ack.correlation,
                result_code = %ack.result_code,
                "Push notification rejected by subscriber"
            );
        }
    }

    async fn on_timer_fire(
        &self,
        activity: ActivityHandle,
        timer: TimerId,
    ) -> Result<(), DispatchError> {
        let (sequence, rearm) = match self.registry.resolve_fire(activity, timer) {
            FireResolution::Notify { sequence, rearm } => (sequence, rearm),
            FireResolution::Stale => {
                tracing::debug!(activity = %activity, timer = %timer, "Ignoring stale timer fire");
                return Ok(());
            }
            FireResolution::Missing => {
                metrics::record_registry_miss();
                return Err(DispatchError::UnknownActivity {
                    activity,
                    known: format_handles(&self.registry.handles()),
                });
            }
        };

        let notification = self.correlations.push_notification(activity, sequence);
        tracing::info!(
            activity = %activity,
            sequence,
            correlation = %notification.correlation,
            "Sending push notification"
        );

        let sent = self
            .transport
            .send_push_notification(activity, notification)
            .await
            .map_err(|source| transport_failure(activity, "push_notification", source));
        if sent.is_ok() {
            metrics::record_push_sent();
        }

        let armed = if rearm {
            self.arm_timer(activity)
        } else {
            Ok(())
        };

        sent.and(armed)
    }

    fn on_activity_ended(&self, activity: ActivityHandle) {
        let Some(record) = self.registry.end(activity) else {
            tracing::debug!(activity = %activity, "Activity ended without subscription");
            return;
        };

        if let Some(timer) = &record.timer {
            self.timers.cancel(timer.id);
        }

        tracing::info!(
            activity = %activity,
            kind = record.kind.as_str(),
            notifications_sent = record.notifications_sent,
            acks_received = record.acks_received,
            "Activity ended"
        );
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn arm_timer(&self, activity: ActivityHandle) -> Result<(), DispatchError> {
        let delay = self.config.notify_interval;
        let id = self
            .timers
            .schedule(activity, delay, false)
            .map_err(|source| DispatchError::Timer { activity, source })?;

        let now = Utc::now();
        let fire_at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now);

        let task = TimerTask {
            id,
            activity,
            fire_at,
            recurring: true,
        };

        if let Err(rejected) = self.registry.attach_timer(task) {
            self.timers.cancel(rejected.id);
            tracing::debug!(activity = %activity, timer = %rejected.id, "Discarded surplus timer");
        } else {
            tracing::debug!(activity = %activity, timer = %id, delay_ms = delay.as_millis(), "Timer armed");
        }

        Ok(())
    }
}

fn transport_failure(
    activity: ActivityHandle,
    operation: &'static str,
    source: TransportError,
) -> DispatchError {
    metrics::record_transport_error(operation);
    DispatchError::Transport { activity, source }
}

fn format_handles(handles: &[ActivityHandle]) -> String {
    handles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{MockTimerPort, MockTransportPort};
    use crate::domain::message::{
        Answer, Avp, Correlation, PushNotification, REQUEST_NUMBER_AVP_CODE, ResultCode,
        SubscriptionKind,
    };
    use crate::domain::peer::Peer;
    use crate::domain::subscription::SubscriptionState;

    #[derive(Default)]
    struct RecordingTransport {
        answers: Mutex<Vec<(ActivityHandle, Answer)>>,
        notifications: Mutex<Vec<(ActivityHandle, PushNotification)>>,
    }

    #[async_trait::async_trait]
    impl TransportPort for RecordingTransport {
        async fn send_answer(
            &self,
            activity: ActivityHandle,
            answer: Answer,
        ) -> Result<(), TransportError> {
            self.answers.lock().push((activity, answer));
            Ok(())
        }

        async fn send_push_notification(
            &self,
            activity: ActivityHandle,
            notification: PushNotification,
        ) -> Result<(), TransportError> {
            self.notifications.lock().push((activity, notification));
            Ok(())
        }

        fn connected_peers(&self) -> Vec<Peer> {
            vec![Peer::connected("aaa://127.0.0.1:3868")]
        }
    }

    #[derive(Default)]
    struct RecordingTimers {
        next_id: AtomicU64,
        pending: Mutex<HashSet<TimerId>>,
        scheduled: AtomicU64,
    }

    impl RecordingTimers {
        fn pending(&self) -> usize {
            self.pending.lock().len()
        }

        fn pending_ids(&self) -> Vec<TimerId> {
            self.pending.lock().iter().copied().collect()
        }

        /// Simulates the facility firing a one-shot timer.
        fn fire(&self, timer: TimerId) {
            self.pending.lock().remove(&timer);
        }
    }

    impl TimerPort for RecordingTimers {
        fn schedule(
            &self,
            _activity: ActivityHandle,
            _delay: Duration,
            _recurring: bool,
        ) -> Result<TimerId, TimerError> {
            let id = TimerId(self.next_id.fetch_add(1, Ordering::SeqCst));
            self.pending.lock().insert(id);
            self.scheduled.fetch_add(1, Ordering::SeqCst);
            Ok(id)
        }

        fn cancel(&self, timer: TimerId) {
            self.pending.lock().remove(&timer);
        }
    }

    struct Harness {
        dispatcher: RequestDispatcher,
        transport: Arc<RecordingTransport>,
        timers: Arc<RecordingTimers>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let timers = Arc::new(RecordingTimers::default());
        let dispatcher = RequestDispatcher::new(
            DispatcherConfig::default(),
            Arc::clone(&transport) as Arc<dyn TransportPort>,
            Arc::clone(&timers) as Arc<dyn TimerPort>,
            Arc::new(SubscriptionRegistry::new()),
        );
        Harness {
            dispatcher,
            transport,
            timers,
        }
    }

    fn subscribe(activity: u64, kind: SubscriptionKind) -> Event {
        Event::Subscribe {
            activity: ActivityHandle(activity),
            request: SubscribeRequest::new(Correlation::new(100, 200), kind),
        }
    }

    #[tokio::test]
    async fn profile_query_answers_with_request_correlation() {
        let h = harness();

        let outcome = h
            .dispatcher
            .dispatch(Event::ProfileQuery {
                activity: ActivityHandle(1),
                request: ProfileQuery::new(Correlation::new(0xAA, 0xBB)),
            })
            .await;

        assert!(outcome.is_handled());
        let answers = h.transport.answers.lock();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].1.correlation, Correlation::new(0xAA, 0xBB));
        assert_eq!(answers[0].1.result_code, ResultCode::SUCCESS);
        assert!(h.dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn subscribe_arms_exactly_one_timer() {
        let h = harness();

        h.dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;
        h.dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;

        assert_eq!(h.timers.pending(), 1);
        assert_eq!(h.timers.scheduled.load(Ordering::SeqCst), 1);
        assert_eq!(h.transport.answers.lock().len(), 2);
        assert!(
            h.dispatcher
                .registry()
                .get(ActivityHandle(42))
                .unwrap()
                .timer
                .is_some()
        );
    }

    #[tokio::test]
    async fn one_time_subscribe_never_arms_timer() {
        let h = harness();

        h.dispatcher
            .dispatch(subscribe(7, SubscriptionKind::OneTime))
            .await;

        assert_eq!(h.timers.pending(), 0);
        let record = h.dispatcher.registry().get(ActivityHandle(7)).unwrap();
        assert_eq!(record.kind, SubscriptionKind::OneTime);
        assert!(record.timer.is_none());
    }

    #[tokio::test]
    async fn downgrade_to_one_time_cancels_timer() {
        let h = harness();

        h.dispatcher
            .dispatch(subscribe(7, SubscriptionKind::Subscribe))
            .await;
        h.dispatcher
            .dispatch(subscribe(7, SubscriptionKind::OneTime))
            .await;

        assert_eq!(h.timers.pending(), 0);
    }

    #[tokio::test]
    async fn subscribe_passes_request_number_through() {
        let h = harness();
        let request = SubscribeRequest::new(Correlation::new(1, 2), SubscriptionKind::Subscribe)
            .with_avp(Avp::new(REQUEST_NUMBER_AVP_CODE, b"7".to_vec()));

        h.dispatcher
            .dispatch(Event::Subscribe {
                activity: ActivityHandle(42),
                request,
            })
            .await;

        let answers = h.transport.answers.lock();
        assert_eq!(
            answers[0].1.extension_avps,
            vec![Avp::new(REQUEST_NUMBER_AVP_CODE, b"7".to_vec())]
        );
    }

    #[tokio::test]
    async fn timer_fire_sends_one_notification_and_rearms() {
        let h = harness();
        h.dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;
        let first = h.timers.pending_ids()[0];
        h.timers.fire(first);

        let outcome = h
            .dispatcher
            .dispatch(Event::TimerFire {
                activity: ActivityHandle(42),
                timer: first,
            })
            .await;

        assert!(outcome.is_handled());
        {
            let notifications = h.transport.notifications.lock();
            assert_eq!(notifications.len(), 1);
            let (sent_to, notification) = &notifications[0];
            assert_eq!(*sent_to, ActivityHandle(42));
            assert_eq!(notification.activity, ActivityHandle(42));
            assert_eq!(notification.sequence, 1);
        }
        assert_eq!(h.timers.pending(), 1);
        assert_ne!(h.timers.pending_ids()[0], first);
        let record = h.dispatcher.registry().get(ActivityHandle(42)).unwrap();
        assert_eq!(record.notifications_sent, 1);
        assert!(record.last_notified.is_some());
    }

    #[tokio::test]
    async fn stale_timer_fire_is_ignored() {
        let h = harness();
        h.dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;

        let outcome = h
            .dispatcher
            .dispatch(Event::TimerFire {
                activity: ActivityHandle(42),
                timer: TimerId(999),
            })
            .await;

        assert!(outcome.is_handled());
        assert!(h.transport.notifications.lock().is_empty());
        assert_eq!(h.timers.pending(), 1);
    }

    #[tokio::test]
    async fn activity_end_removes_record_and_cancels_timer() {
        let h = harness();
        h.dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;
        let timer = h.timers.pending_ids()[0];

        h.dispatcher
            .dispatch(Event::ActivityEnded {
                activity: ActivityHandle(42),
            })
            .await;

        assert!(h.dispatcher.registry().get(ActivityHandle(42)).is_none());
        assert_eq!(h.timers.pending(), 0);

        let outcome = h
            .dispatcher
            .dispatch(Event::TimerFire {
                activity: ActivityHandle(42),
                timer,
            })
            .await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(DispatchError::UnknownActivity { .. })
        ));
        assert!(h.transport.notifications.lock().is_empty());
    }

    #[tokio::test]
    async fn lookup_miss_names_known_activities() {
        let h = harness();
        h.dispatcher
            .dispatch(subscribe(1, SubscriptionKind::OneTime))
            .await;
        h.dispatcher
            .dispatch(subscribe(2, SubscriptionKind::OneTime))
            .await;

        let outcome = h
            .dispatcher
            .dispatch(Event::TimerFire {
                activity: ActivityHandle(9),
                timer: TimerId(0),
            })
            .await;

        match outcome {
            DispatchOutcome::Failed(DispatchError::UnknownActivity { activity, known }) => {
                assert_eq!(activity, ActivityHandle(9));
                assert_eq!(known, "activity-1, activity-2");
            }
            other => panic!("expected lookup miss, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn activity_end_is_idempotent() {
        let h = harness();

        let first = h
            .dispatcher
            .dispatch(Event::ActivityEnded {
                activity: ActivityHandle(5),
            })
            .await;
        let second = h
            .dispatcher
            .dispatch(Event::ActivityEnded {
                activity: ActivityHandle(5),
            })
            .await;

        assert!(first.is_handled());
        assert!(second.is_handled());
    }

    #[tokio::test]
    async fn push_ack_counts_on_record() {
        let h = harness();
        h.dispatcher
            .dispatch(subscribe(3, SubscriptionKind::Subscribe))
            .await;

        let outcome = h
            .dispatcher
            .dispatch(Event::PushAck {
                activity: ActivityHandle(3),
                ack: PushAck {
                    correlation: Correlation::new(1, 1),
                    result_code: ResultCode(5012),
                },
            })
            .await;

        assert!(outcome.is_handled());
        let record = h.dispatcher.registry().get(ActivityHandle(3)).unwrap();
        assert_eq!(record.acks_received, 1);
    }

    #[tokio::test]
    async fn push_ack_for_unknown_activity_changes_nothing() {
        let h = harness();
        h.dispatcher
            .dispatch(subscribe(3, SubscriptionKind::Subscribe))
            .await;
        let before = h.dispatcher.registry().get(ActivityHandle(3)).unwrap();

        let outcome = h
            .dispatcher
            .dispatch(Event::PushAck {
                activity: ActivityHandle(99),
                ack: PushAck {
                    correlation: Correlation::new(1, 1),
                    result_code: ResultCode::SUCCESS,
                },
            })
            .await;

        assert!(outcome.is_handled());
        assert!(h.dispatcher.registry().get(ActivityHandle(99)).is_none());
        assert_eq!(h.dispatcher.registry().len(), 1);
        assert_eq!(
            h.dispatcher.registry().get(ActivityHandle(3)).unwrap(),
            before
        );
        assert_eq!(h.timers.pending(), 1);
        assert!(h.transport.notifications.lock().is_empty());
    }

    #[tokio::test]
    async fn service_started_changes_no_state() {
        let h = harness();

        let outcome = h.dispatcher.dispatch(Event::ServiceStarted).await;

        assert!(outcome.is_handled());
        assert!(h.dispatcher.registry().is_empty());
        assert!(h.transport.answers.lock().is_empty());
    }

    #[tokio::test]
    async fn end_all_cancels_every_timer() {
        let h = harness();
        for id in 0..3 {
            h.dispatcher
                .dispatch(subscribe(id, SubscriptionKind::Subscribe))
                .await;
        }

        assert_eq!(h.dispatcher.end_all(), 3);
        assert_eq!(h.timers.pending(), 0);
        assert!(h.dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn subscribe_transport_failure_still_records_subscription() {
        let mut transport = MockTransportPort::new();
        transport
            .expect_send_answer()
            .times(1)
            .returning(|_, _| Err(TransportError::Disconnected));
        let timers = Arc::new(RecordingTimers::default());
        let dispatcher = RequestDispatcher::new(
            DispatcherConfig::default(),
            Arc::new(transport),
            Arc::clone(&timers) as Arc<dyn TimerPort>,
            Arc::new(SubscriptionRegistry::new()),
        );

        let outcome = dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(DispatchError::Transport {
                source: TransportError::Disconnected,
                ..
            })
        ));
        assert!(dispatcher.registry().get(ActivityHandle(42)).is_some());
        assert_eq!(timers.pending(), 1);
    }

    #[tokio::test]
    async fn push_failure_still_rearms() {
        let mut transport = MockTransportPort::new();
        transport.expect_send_answer().returning(|_, _| Ok(()));
        transport
            .expect_send_push_notification()
            .times(1)
            .returning(|activity, _| Err(TransportError::ActivityClosed { activity }));
        let timers = Arc::new(RecordingTimers::default());
        let dispatcher = RequestDispatcher::new(
            DispatcherConfig::default(),
            Arc::new(transport),
            Arc::clone(&timers) as Arc<dyn TimerPort>,
            Arc::new(SubscriptionRegistry::new()),
        );
        dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;
        let first = timers.pending_ids()[0];
        timers.fire(first);

        let outcome = dispatcher
            .dispatch(Event::TimerFire {
                activity: ActivityHandle(42),
                timer: first,
            })
            .await;

        assert!(!outcome.is_handled());
        assert_eq!(timers.pending(), 1);
    }

    #[tokio::test]
    async fn profile_query_failure_does_not_affect_next_event() {
        let mut transport = MockTransportPort::new();
        let mut calls = 0;
        transport.expect_send_answer().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(TransportError::SendFailed {
                    message: "peer reset".to_string(),
                })
            } else {
                Ok(())
            }
        });
        let dispatcher = RequestDispatcher::new(
            DispatcherConfig::default(),
            Arc::new(transport),
            Arc::new(RecordingTimers::default()),
            Arc::new(SubscriptionRegistry::new()),
        );
        let query = |id| Event::ProfileQuery {
            activity: ActivityHandle(id),
            request: ProfileQuery::new(Correlation::new(1, 1)),
        };

        assert!(!dispatcher.dispatch(query(1)).await.is_handled());
        assert!(dispatcher.dispatch(query(2)).await.is_handled());
    }

    #[tokio::test]
    async fn scheduling_failure_keeps_record_without_timer() {
        let transport = Arc::new(RecordingTransport::default());
        let mut timers = MockTimerPort::new();
        let mut attempts = 0;
        timers
            .expect_schedule()
            .times(2)
            .returning(move |_, _, recurring| {
                assert!(!recurring);
                attempts += 1;
                if attempts == 1 {
                    Err(TimerError::Unavailable {
                        message: "event loop gone".to_string(),
                    })
                } else {
                    Ok(TimerId(5))
                }
            });
        timers.expect_cancel().never();
        let dispatcher = RequestDispatcher::new(
            DispatcherConfig::default(),
            Arc::clone(&transport) as Arc<dyn TransportPort>,
            Arc::new(timers),
            Arc::new(SubscriptionRegistry::new()),
        );

        let outcome = dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed(DispatchError::Timer {
                activity: ActivityHandle(42),
                source: TimerError::Unavailable { .. },
            })
        ));
        assert_eq!(transport.answers.lock().len(), 1);
        let record = dispatcher.registry().get(ActivityHandle(42)).unwrap();
        assert_eq!(record.state, SubscriptionState::Active);
        assert!(record.timer.is_none());
        assert_eq!(dispatcher.registry().counts().pending_timers, 0);

        // A later subscribe on the same activity arms the missing timer.
        let outcome = dispatcher
            .dispatch(subscribe(42, SubscriptionKind::Subscribe))
            .await;

        assert!(outcome.is_handled());
        let record = dispatcher.registry().get(ActivityHandle(42)).unwrap();
        assert_eq!(record.timer.map(|t| t.id), Some(TimerId(5)));
        assert_eq!(dispatcher.registry().counts().pending_timers, 1);
    }

    #[tokio::test]
    async fn rejected_timer_is_canceled() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut timers = MockTimerPort::new();
        let ending = Arc::clone(&registry);
        timers
            .expect_schedule()
            .times(1)
            .returning(move |activity, _, _| {
                // The record disappears before the timer can be attached.
                ending.end(activity);
                Ok(TimerId(77))
            });
        timers
            .expect_cancel()
            .with(mockall::predicate::eq(TimerId(77)))
            .times(1)
            .return_const(());
        let dispatcher = RequestDispatcher::new(
            DispatcherConfig::default(),
            Arc::new(RecordingTransport::default()),
            Arc::new(timers),
            Arc::clone(&registry),
        );

        let outcome = dispatcher
            .dispatch(subscribe(9, SubscriptionKind::Subscribe))
            .await;

        assert!(outcome.is_handled());
        assert!(registry.get(ActivityHandle(9)).is_none());
        assert_eq!(registry.counts().pending_timers, 0);
    }

    #[test]
    fn event_labels() {
        assert_eq!(Event::ServiceStarted.kind(), "service_started");
        assert_eq!(Event::ServiceStarted.activity(), None);
        assert_eq!(
            Event::ActivityEnded {
                activity: ActivityHandle(3)
            }
            .activity(),
            Some(ActivityHandle(3))
        );
    }
}
