//! Outbound Broadcast Hub
//!
//! Delivers routed events to transports using tokio broadcast channels for
//! fan-out to any number of consumers.
//!
//! # Architecture
//!
//! The `OutboundHub` keeps one channel per event family so a flood of ticks
//! cannot push acks or historic responses out of a slow consumer's buffer:
//! - Ticks
//! - Live bars
//! - Historic bar responses
//! - Session events (logon/logout acks and rejections)
//!
//! Each channel supports multiple receivers with configurable capacity.
//! Sending never blocks; a lagging receiver loses its oldest events.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::application::ports::OutboundPublisher;
use crate::domain::events::OutboundEvent;
use crate::infrastructure::config::OutboundSettings;

// =============================================================================
// Outbound Hub
// =============================================================================

/// Configuration for outbound channel capacities.
#[derive(Debug, Clone, Copy)]
pub struct OutboundConfig {
    /// Capacity for the tick channel.
    pub ticks_capacity: usize,
    /// Capacity for the live bar channel.
    pub bars_capacity: usize,
    /// Capacity for the historic response channel.
    pub historic_capacity: usize,
    /// Capacity for the session event channel.
    pub session_capacity: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            ticks_capacity: 50_000,
            bars_capacity: 10_000,
            historic_capacity: 1_000,
            session_capacity: 1_000,
        }
    }
}

impl From<OutboundSettings> for OutboundConfig {
    fn from(settings: OutboundSettings) -> Self {
        Self {
            ticks_capacity: settings.ticks_capacity,
            bars_capacity: settings.bars_capacity,
            historic_capacity: settings.historic_capacity,
            session_capacity: settings.session_capacity,
        }
    }
}

/// Central hub for outbound channels.
#[derive(Debug)]
pub struct OutboundHub {
    ticks_tx: broadcast::Sender<OutboundEvent>,
    bars_tx: broadcast::Sender<OutboundEvent>,
    historic_tx: broadcast::Sender<OutboundEvent>,
    session_tx: broadcast::Sender<OutboundEvent>,
}

impl OutboundHub {
    /// Create a new hub with the given configuration.
    #[must_use]
    pub fn new(config: OutboundConfig) -> Self {
        Self {
            ticks_tx: broadcast::channel(config.ticks_capacity).0,
            bars_tx: broadcast::channel(config.bars_capacity).0,
            historic_tx: broadcast::channel(config.historic_capacity).0,
            session_tx: broadcast::channel(config.session_capacity).0,
        }
    }

    /// Create a new hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(OutboundConfig::default())
    }

    /// Send an event on its family's channel.
    ///
    /// Returns the number of receivers that got it, or `None` if the channel
    /// has no receivers.
    pub fn send(&self, event: OutboundEvent) -> Option<usize> {
        self.sender_for(&event).send(event).ok()
    }

    const fn sender_for(&self, event: &OutboundEvent) -> &broadcast::Sender<OutboundEvent> {
        match event {
            OutboundEvent::Tick { .. } => &self.ticks_tx,
            OutboundEvent::Bar { .. } => &self.bars_tx,
            OutboundEvent::HistoricBarData { .. } => &self.historic_tx,
            OutboundEvent::LogonAck { .. }
            | OutboundEvent::LogoutAck { .. }
            | OutboundEvent::Rejection(_) => &self.session_tx,
        }
    }

    /// Get a new receiver for ticks.
    #[must_use]
    pub fn ticks_rx(&self) -> broadcast::Receiver<OutboundEvent> {
        self.ticks_tx.subscribe()
    }

    /// Get a new receiver for live bars.
    #[must_use]
    pub fn bars_rx(&self) -> broadcast::Receiver<OutboundEvent> {
        self.bars_tx.subscribe()
    }

    /// Get a new receiver for historic responses.
    #[must_use]
    pub fn historic_rx(&self) -> broadcast::Receiver<OutboundEvent> {
        self.historic_tx.subscribe()
    }

    /// Get a new receiver for session events.
    #[must_use]
    pub fn session_rx(&self) -> broadcast::Receiver<OutboundEvent> {
        self.session_tx.subscribe()
    }

    /// Receivers for every channel, in the order ticks, bars, historic,
    /// session.
    #[must_use]
    pub fn subscribe_all(&self) -> [broadcast::Receiver<OutboundEvent>; 4] {
        [
            self.ticks_rx(),
            self.bars_rx(),
            self.historic_rx(),
            self.session_rx(),
        ]
    }

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> OutboundStats {
        OutboundStats {
            ticks_receivers: self.ticks_tx.receiver_count(),
            bars_receivers: self.bars_tx.receiver_count(),
            historic_receivers: self.historic_tx.receiver_count(),
            session_receivers: self.session_tx.receiver_count(),
        }
    }
}

impl OutboundPublisher for OutboundHub {
    fn publish(&self, event: OutboundEvent) {
        // No receivers means no transport is attached; the event is dropped.
        let _ = self.send(event);
    }
}

/// Shared outbound hub reference.
pub type SharedOutboundHub = Arc<OutboundHub>;

/// Statistics about outbound channels.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OutboundStats {
    /// Number of tick receivers.
    pub ticks_receivers: usize,
    /// Number of live bar receivers.
    pub bars_receivers: usize,
    /// Number of historic response receivers.
    pub historic_receivers: usize,
    /// Number of session event receivers.
    pub session_receivers: usize,
}

impl OutboundStats {
    /// Get total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.ticks_receivers + self.bars_receivers + self.historic_receivers + self.session_receivers
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::events::{Recipient, Rejection};
    use crate::domain::market::{Security, Tick};

    fn tick_event() -> OutboundEvent {
        OutboundEvent::Tick {
            strategy_id: "S1".to_string(),
            tick: Tick::trade("SIM", Security::new("AAPL"), dec!(150.00), dec!(100), Utc::now()),
        }
    }

    #[test]
    fn hub_creation() {
        let hub = OutboundHub::with_defaults();
        assert_eq!(hub.stats().total_receivers(), 0);
    }

    #[test]
    fn receiver_count_decreases_on_drop() {
        let hub = OutboundHub::with_defaults();

        {
            let _rx = hub.ticks_rx();
            assert_eq!(hub.stats().ticks_receivers, 1);
        }

        assert_eq!(hub.stats().ticks_receivers, 0);
    }

    #[tokio::test]
    async fn events_land_on_their_family_channel() {
        let hub = OutboundHub::with_defaults();
        let mut ticks = hub.ticks_rx();
        let mut session = hub.session_rx();

        assert_eq!(hub.send(tick_event()), Some(1));
        hub.publish(OutboundEvent::Rejection(Rejection::new(
            Recipient::App("A1".to_string()),
            "SIM",
            "refused",
        )));

        assert_eq!(ticks.recv().await.unwrap().kind(), "tick");
        assert_eq!(session.recv().await.unwrap().kind(), "rejection");
        assert!(ticks.try_recv().is_err());
    }

    #[test]
    fn send_with_no_receivers_returns_none() {
        let hub = OutboundHub::with_defaults();
        assert!(hub.send(tick_event()).is_none());
    }

    #[test]
    fn subscribe_all_counts_every_channel() {
        let hub = OutboundHub::new(OutboundConfig {
            ticks_capacity: 16,
            bars_capacity: 16,
            historic_capacity: 4,
            session_capacity: 4,
        });

        let _receivers = hub.subscribe_all();

        assert_eq!(hub.stats().total_receivers(), 4);
    }
}
