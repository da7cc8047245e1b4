#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Feed Gateway - Market Data Session Multiplexer
//!
//! Shares one session per named market data provider between many strategy
//! clients. Logins and subscriptions are reference counted, ticks are
//! aggregated into live bars, and every provider event is routed back to the
//! strategies that asked for it.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market data types and pure logic
//!   - `market`: Securities, ticks, bars, bar specifications
//!   - `subscription`: Reference-counted registries
//!   - `aggregation`: Tick to bar aggregation
//!   - `events`: Outbound events and rejections
//!
//! - **Application**: Use cases and port definitions
//!   - `commands`: Inbound client commands
//!   - `ports`: Provider adapter, event sink, outbound publisher
//!   - `services`: Session multiplexer, dispatcher, command router
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `providers`: Provider registry, simulated and mock adapters
//!   - `ingest`: Provider event queue and dispatch loop
//!   - `broadcast`: Outbound channels
//!   - `transport`: JSON-lines stdio transport
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!               commands                      ┌──────────────┐
//! Client ──────────────► CommandRouter ──────►│   Session    │──► ProviderAdapter
//!                                             │  Multiplexer │        │
//!                                             └──────────────┘        │ events
//!                                                    ▲                ▼
//! Client ◄── OutboundHub ◄── Dispatcher ◄────────────┴─────── IngestQueue
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{BarAggregator, BarBuilder};
pub use domain::events::{OutboundEvent, Recipient, Rejection};
pub use domain::market::{
    AppId, Bar, BarFormat, BarPriceType, BarRequestId, BarSpecification, HistoricBarRequest,
    HistoricRequestId, ProviderName, Security, SpecError, StrategyId, Tick,
};
pub use domain::subscription::{RefTransition, RegistryError};

// Application
pub use application::commands::{CommandEnvelope, GatewayCommand};
pub use application::ports::{
    EventSink, OutboundPublisher, ProviderAdapter, ProviderEnvelope, ProviderError,
    ProviderEvent, ProviderFactory,
};
pub use application::services::{
    CommandRouter, Dispatcher, GatewayError, ProviderSnapshot, SessionMultiplexer,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatewayConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Outbound hub
pub use infrastructure::broadcast::{OutboundConfig, OutboundHub, SharedOutboundHub};

// Ingestion
pub use infrastructure::ingest::{IngestQueue, IngestReceiver, ingest_channel, run_dispatch_loop};

// Providers
pub use infrastructure::providers::{ProviderRegistry, SIMULATED, SimulatedProvider};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
