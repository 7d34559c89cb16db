//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `RequestDispatcher`: routes inbound events to their handlers
//! - `AnswerBuilder` / `CorrelationAllocator`: correlation stamping
//! - `PeerReport`: startup peer diagnostics

/// Answer building and correlation allocation.
pub mod correlation;

/// Peer diagnostics reported on service start.
pub mod diagnostics;

/// Event routing and per-event handlers.
pub mod dispatcher;

pub use correlation::{AnswerBuilder, CorrelationAllocator};
pub use diagnostics::PeerReport;
pub use dispatcher::{
    DEFAULT_NOTIFY_INTERVAL, DispatchError, DispatchOutcome, DispatcherConfig, Event,
    RequestDispatcher,
};
