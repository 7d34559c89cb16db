//! Domain Layer - Sh protocol values and subscription state.
//!
//! Pure types with no I/O. Everything here is usable from tests without a
//! runtime.

/// Protocol message types (requests, answers, notifications).
pub mod message;

/// Peer identities and connection status.
pub mod peer;

/// Subscription records and the registry that tracks them.
pub mod subscription;
