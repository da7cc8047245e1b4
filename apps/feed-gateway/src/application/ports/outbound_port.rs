//! Outbound Port (Driven Port)
//!
//! Where routed events leave the gateway. The transport behind it is
//! opaque: at-least-once, no ordering across recipients.

use parking_lot::Mutex;

use crate::domain::events::OutboundEvent;

/// Port for delivering routed events to clients.
pub trait OutboundPublisher: Send + Sync {
    /// Deliver one event without blocking.
    fn publish(&self, event: OutboundEvent);
}

/// Publisher that keeps every event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingPublisher {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<OutboundEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Copy of everything published so far.
    #[must_use]
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().clone()
    }
}

impl OutboundPublisher for RecordingPublisher {
    fn publish(&self, event: OutboundEvent) {
        self.events.lock().push(event);
    }
}
