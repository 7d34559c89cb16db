//! Application Layer - Event handling and port definitions.
//!
//! This layer contains the dispatcher and the port interfaces that
//! define how the domain interacts with the transport and the
//! scheduling facility.

/// Port interfaces for external systems (transport, timers).
pub mod ports;

/// Application services (dispatcher, answer building, diagnostics).
pub mod services;
