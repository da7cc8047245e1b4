//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Outbound broadcast channels for routed events.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Provider event ingestion and the dispatch loop.
pub mod ingest;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Provider adapters and the provider registry.
pub mod providers;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// JSON-lines client transport over stdio.
pub mod transport;
