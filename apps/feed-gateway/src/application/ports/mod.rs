//! Port Interfaces
//!
//! Contracts between the multiplexer and the outside world, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ProviderAdapter`: one external market data session
//! - `ProviderFactory`: constructs adapters by provider name
//! - `OutboundPublisher`: delivers routed events to clients
//!
//! ## Driver Ports (Inbound)
//!
//! - `EventSink`: where adapters push their events

mod event_sink_port;
mod outbound_port;
mod provider_port;

pub use event_sink_port::{
    EventSink, ProviderEnvelope, ProviderEvent, RecordingEventSink, SessionSink,
};
pub use outbound_port::{OutboundPublisher, RecordingPublisher};
pub use provider_port::{ProviderAdapter, ProviderError, ProviderFactory};
