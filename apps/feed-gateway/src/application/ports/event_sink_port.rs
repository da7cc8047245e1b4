//! Event Sink Port (Driver Port)
//!
//! Adapters push everything they receive from a provider into an
//! `EventSink`. Implementations must never block the caller: this runs on
//! the adapter's read path.
//!
//! Each adapter is handed a [`SessionSink`] that stamps its events with the
//! adapter generation, so events still queued from a replaced adapter can be
//! told apart from those of the current one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::market::{Bar, HistoricRequestId, ProviderName, Security, Tick};

/// An event raised by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The session is logged on.
    Logon,
    /// The session was closed.
    Logout,
    /// A market data update.
    Tick(Tick),
    /// Response to a historic request.
    HistoricBarData {
        /// Request ID from the originating request.
        request_id: HistoricRequestId,
        /// Bars returned.
        bars: Vec<Bar>,
    },
    /// The provider refused a market data request.
    MarketDataRejection {
        /// Security the rejection concerns, when known.
        security: Option<Security>,
        /// Bar or historic request ID the rejection concerns, when known.
        request_id: Option<String>,
        /// Reason given by the provider.
        reason: String,
    },
}

impl ProviderEvent {
    /// Event kind as a static label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Logon => "logon",
            Self::Logout => "logout",
            Self::Tick(_) => "tick",
            Self::HistoricBarData { .. } => "historic_bar_data",
            Self::MarketDataRejection { .. } => "market_data_rejection",
        }
    }
}

/// A provider event tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEnvelope {
    /// Provider that raised the event.
    pub provider: ProviderName,
    /// The event.
    pub event: ProviderEvent,
    /// When the gateway received it. Aggregator clocks run on this time.
    pub received_at: DateTime<Utc>,
    /// Generation of the adapter that raised it, when known.
    pub generation: Option<u64>,
}

impl ProviderEnvelope {
    /// Wrap an event received now.
    #[must_use]
    pub fn new(provider: impl Into<ProviderName>, event: ProviderEvent) -> Self {
        Self {
            provider: provider.into(),
            event,
            received_at: Utc::now(),
            generation: None,
        }
    }

    /// Override the receive time.
    #[must_use]
    pub const fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    /// Tag with the generation of the adapter that raised the event.
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }
}

/// Port adapters publish events into.
pub trait EventSink: Send + Sync {
    /// Accept one envelope without blocking.
    fn deliver(&self, envelope: ProviderEnvelope);

    /// Wrap an event received now and deliver it.
    fn publish(&self, provider: &str, event: ProviderEvent) {
        self.deliver(ProviderEnvelope::new(provider, event));
    }
}

/// Sink handed to one adapter; tags everything it publishes with the
/// adapter's generation.
#[derive(Clone)]
pub struct SessionSink {
    inner: Arc<dyn EventSink>,
    generation: u64,
}

impl SessionSink {
    /// Wrap `inner` for the adapter of `generation`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventSink>, generation: u64) -> Self {
        Self { inner, generation }
    }

    /// Generation stamped on every event.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl EventSink for SessionSink {
    fn deliver(&self, envelope: ProviderEnvelope) {
        self.inner.deliver(envelope.with_generation(self.generation));
    }
}

impl std::fmt::Debug for SessionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Event sink that keeps every event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ProviderEnvelope>>,
}

impl RecordingEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<ProviderEnvelope> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of events recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn deliver(&self, envelope: ProviderEnvelope) {
        self.events.lock().push(envelope);
    }
}
