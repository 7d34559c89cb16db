//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the event loop that drives them.

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Event loop runtime.
pub mod runtime;

/// Tokio-backed timer scheduler.
pub mod scheduler;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// In-process channel transport.
pub mod transport;
