//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Inbound client commands.
pub mod commands;

/// Port interfaces for provider adapters, event sinks and publishers.
pub mod ports;

/// Application services for session multiplexing and event dispatch.
pub mod services;
