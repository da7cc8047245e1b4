//! Provider Event Ingestion
//!
//! Decouples adapter read paths from dispatch. Adapters publish into an
//! [`IngestQueue`] (the `EventSink` they were created with); a single
//! dispatch loop drains the paired [`IngestReceiver`].
//!
//! # Backpressure
//!
//! - Ticks go through a bounded `tokio::sync::broadcast` ring. Publishing
//!   never blocks; when dispatch falls behind the oldest ticks are
//!   overwritten and counted as dropped.
//! - Control events (logon, logout, historic data, rejections) go through an
//!   unbounded channel and are never dropped. They are drained ahead of
//!   ticks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{EventSink, ProviderEnvelope, ProviderEvent};
use crate::application::services::Dispatcher;
use crate::infrastructure::metrics;

// =============================================================================
// Statistics
// =============================================================================

/// Counters shared by the queue and its receiver.
#[derive(Debug, Default)]
pub struct IngestStats {
    ticks_received: AtomicU64,
    control_received: AtomicU64,
    ticks_dropped: AtomicU64,
}

impl IngestStats {
    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            control_received: self.control_received.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
        }
    }

    fn record_dropped(&self, count: u64) {
        self.ticks_dropped.fetch_add(count, Ordering::Relaxed);
        metrics::record_ticks_dropped(count);
    }
}

/// Copy of the ingest counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    /// Ticks accepted from adapters.
    pub ticks_received: u64,
    /// Control events accepted from adapters.
    pub control_received: u64,
    /// Ticks overwritten before dispatch read them.
    pub ticks_dropped: u64,
}

// =============================================================================
// Queue
// =============================================================================

/// Producer side handed to adapters.
#[derive(Debug)]
pub struct IngestQueue {
    ticks_tx: broadcast::Sender<ProviderEnvelope>,
    control_tx: mpsc::UnboundedSender<ProviderEnvelope>,
    stats: Arc<IngestStats>,
}

/// Consumer side drained by the dispatch loop.
#[derive(Debug)]
pub struct IngestReceiver {
    ticks_rx: broadcast::Receiver<ProviderEnvelope>,
    control_rx: mpsc::UnboundedReceiver<ProviderEnvelope>,
    stats: Arc<IngestStats>,
}

/// Create a queue holding at most `tick_capacity` undelivered ticks.
///
/// # Panics
///
/// Panics if `tick_capacity` is zero.
#[must_use]
pub fn ingest_channel(tick_capacity: usize) -> (Arc<IngestQueue>, IngestReceiver) {
    let (ticks_tx, ticks_rx) = broadcast::channel(tick_capacity);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let stats = Arc::new(IngestStats::default());

    let queue = IngestQueue {
        ticks_tx,
        control_tx,
        stats: Arc::clone(&stats),
    };
    let receiver = IngestReceiver {
        ticks_rx,
        control_rx,
        stats,
    };
    (Arc::new(queue), receiver)
}

impl IngestQueue {
    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }
}

impl EventSink for IngestQueue {
    fn deliver(&self, envelope: ProviderEnvelope) {
        if matches!(envelope.event, ProviderEvent::Tick(_)) {
            self.stats.ticks_received.fetch_add(1, Ordering::Relaxed);
            if self.ticks_tx.send(envelope).is_err() {
                self.stats.record_dropped(1);
            }
        } else {
            self.stats.control_received.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.control_tx.send(envelope) {
                warn!(provider = %e.0.provider, event = e.0.event.kind(), "Ingest receiver closed, event dropped");
            }
        }
    }
}

impl IngestReceiver {
    /// Next event, control events first.
    ///
    /// Returns `None` once every producer is gone and both channels are
    /// drained.
    pub async fn recv(&mut self) -> Option<ProviderEnvelope> {
        loop {
            tokio::select! {
                biased;
                Some(envelope) = self.control_rx.recv() => return Some(envelope),
                next = self.ticks_rx.recv() => match next {
                    Ok(envelope) => return Some(envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dispatch lagging, oldest ticks dropped");
                        self.stats.record_dropped(skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return self.control_rx.recv().await;
                    }
                },
            }
        }
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }
}

// =============================================================================
// Dispatch Loop
// =============================================================================

/// Drain `receiver` into `dispatcher` and drive the bar clock until
/// cancelled or every producer is gone.
pub async fn run_dispatch_loop(
    mut receiver: IngestReceiver,
    dispatcher: Dispatcher,
    clock_interval: Duration,
    cancel: CancellationToken,
) {
    let mut clock = tokio::time::interval(clock_interval);
    clock.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(clock_ms = clock_interval.as_millis(), "Dispatch loop started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = clock.tick() => dispatcher.on_clock(Utc::now()).await,
            next = receiver.recv() => match next {
                Some(envelope) => dispatcher.dispatch(envelope).await,
                None => {
                    debug!("Ingest queue closed");
                    break;
                }
            },
        }
    }

    info!(stats = ?receiver.stats.snapshot(), "Dispatch loop stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::market::{Security, Tick};

    fn tick(price: i64) -> ProviderEvent {
        ProviderEvent::Tick(Tick::trade(
            "SIM",
            Security::new("AAPL"),
            Decimal::from(price),
            Decimal::ONE,
            Utc::now(),
        ))
    }

    fn price_of(envelope: &ProviderEnvelope) -> Option<Decimal> {
        match &envelope.event {
            ProviderEvent::Tick(tick) => tick.last,
            _ => None,
        }
    }

    #[tokio::test]
    async fn control_events_jump_the_tick_queue() {
        let (queue, mut rx) = ingest_channel(16);

        queue.publish("SIM", tick(1));
        queue.publish("SIM", ProviderEvent::Logon);

        assert_eq!(rx.recv().await.unwrap().event, ProviderEvent::Logon);
        assert_eq!(price_of(&rx.recv().await.unwrap()), Some(Decimal::ONE));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_ticks() {
        let (queue, mut rx) = ingest_channel(2);

        for price in 0..5 {
            queue.publish("SIM", tick(price));
        }

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        assert_eq!(price_of(&first), Some(Decimal::from(3)));
        assert_eq!(price_of(&second), Some(Decimal::from(4)));

        let stats = rx.stats().snapshot();
        assert_eq!(stats.ticks_received, 5);
        assert_eq!(stats.ticks_dropped, 3);
    }

    #[tokio::test]
    async fn control_events_are_never_dropped() {
        let (queue, mut rx) = ingest_channel(1);

        for _ in 0..10 {
            queue.publish("SIM", ProviderEvent::Logout);
        }

        for _ in 0..10 {
            assert_eq!(rx.recv().await.unwrap().event, ProviderEvent::Logout);
        }
        assert_eq!(queue.stats().snapshot().control_received, 10);
    }

    #[tokio::test]
    async fn envelopes_keep_generation_and_receive_time() {
        let (queue, mut rx) = ingest_channel(4);
        let received_at = Utc::now() - chrono::Duration::seconds(5);

        queue.deliver(
            ProviderEnvelope::new("SIM", tick(1))
                .with_received_at(received_at)
                .with_generation(3),
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.generation, Some(3));
        assert_eq!(envelope.received_at, received_at);
    }

    #[tokio::test]
    async fn receiver_ends_when_queue_dropped() {
        let (queue, mut rx) = ingest_channel(4);
        queue.publish("SIM", ProviderEvent::Logon);
        drop(queue);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
