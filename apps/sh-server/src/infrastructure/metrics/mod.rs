//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Inbound events dispatched, by type and outcome
//! - **Messages**: Answers and push notifications sent
//! - **Errors**: Transport failures and registry lookup misses
//! - **Subscriptions**: Active subscriptions and pending timers
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "sh_server_events_total",
        "Inbound events dispatched, by event type and outcome"
    );
    describe_counter!(
        "sh_server_answers_sent_total",
        "Answers sent, by request type"
    );
    describe_counter!(
        "sh_server_push_notifications_sent_total",
        "Push notifications sent to subscribers"
    );
    describe_counter!(
        "sh_server_transport_errors_total",
        "Transport send failures, by operation"
    );
    describe_counter!(
        "sh_server_registry_misses_total",
        "Timer fires and push acks that found no subscription"
    );
    describe_gauge!(
        "sh_server_active_subscriptions",
        "Subscriptions currently tracked"
    );
    describe_gauge!(
        "sh_server_pending_timers",
        "Notification timers currently armed"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a dispatched event.
pub fn record_event(event: &'static str, outcome: &'static str) {
    counter!(
        "sh_server_events_total",
        "event" => event,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record an answer sent.
pub fn record_answer_sent(request: &'static str) {
    counter!("sh_server_answers_sent_total", "request" => request).increment(1);
}

/// Record a push notification sent.
pub fn record_push_sent() {
    counter!("sh_server_push_notifications_sent_total").increment(1);
}

/// Record a transport send failure.
pub fn record_transport_error(operation: &'static str) {
    counter!("sh_server_transport_errors_total", "operation" => operation).increment(1);
}

/// Record a timer fire or push ack that found no subscription.
pub fn record_registry_miss() {
    counter!("sh_server_registry_misses_total").increment(1);
}

/// Update the active subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("sh_server_active_subscriptions").set(count as f64);
}

/// Update the pending timer gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_timers(count: usize) {
    gauge!("sh_server_pending_timers").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
