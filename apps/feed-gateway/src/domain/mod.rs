//! Domain Layer - Core market data types and business logic.
//!
//! This layer contains the identifiers, market data types, reference-counted
//! registries, and bar aggregation for the gateway. Nothing here performs
//! I/O; all types are pure Rust with serialization support.

/// Market data types (securities, ticks, bars, bar specifications).
pub mod market;

/// Reference-counted registries for logins, subscriptions, and requests.
pub mod subscription;

/// Tick to bar aggregation under the supported slicing policies.
pub mod aggregation;

/// Outbound events delivered to strategy clients.
pub mod events;
