#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Sh Server - Profile Query and Subscription Handler
//!
//! Server side of a Diameter Sh-style profile service. Answers profile
//! queries, accepts one-time and recurring subscriptions, and pushes
//! periodic notifications to recurring subscribers until their activity
//! ends.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Protocol message types and subscription state
//!   - `message`: Correlation pairs, result codes, AVPs, requests and answers
//!   - `subscription`: Activity handles, timer tasks, the subscription registry
//!   - `peer`: Peer identity and status
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport and timer interfaces
//!   - `services`: Request dispatcher, answer builder, peer diagnostics
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `runtime`: Event loop driving the dispatcher
//!   - `scheduler`: Tokio-backed timers
//!   - `transport`: In-process channel transport
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! transport host ──┐
//!                  ├──► event channel ──► RequestDispatcher ──► TransportPort
//! timer scheduler ─┘                            │
//!        ▲                                      ▼
//!        └────────── TimerPort ◄──────── SubscriptionRegistry
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Message types and subscription state.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::message::{
    Answer, AnswerKind, Avp, Correlation, ProfileQuery, PushAck, PushNotification,
    REQUEST_NUMBER_AVP_CODE, ResultCode, SubscribeRequest, SubscriptionKind,
};
pub use domain::peer::{Peer, PeerIdentity, PeerStatus};
pub use domain::subscription::{
    ActivityHandle, RegistryCounts, RegistryStats, SubscriptionRecord, SubscriptionRegistry,
    SubscriptionState, TimerId,
};

// Ports and services
pub use application::ports::{TimerError, TimerPort, TransportError, TransportPort};
pub use application::services::{
    DispatchError, DispatchOutcome, DispatcherConfig, Event, RequestDispatcher,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, EventLoopSettings, NotificationSettings, ServerConfig, ServerSettings,
};

// Runtime and adapters
pub use infrastructure::runtime::{RuntimeError, ShServer};
pub use infrastructure::scheduler::TokioTimerScheduler;
pub use infrastructure::transport::{ChannelTransport, OutboundMessage};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
