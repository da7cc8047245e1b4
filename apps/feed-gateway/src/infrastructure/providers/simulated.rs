//! Simulated Provider
//!
//! Built-in adapter that needs no vendor connection. Every subscribed
//! security follows a random walk; each period it emits a quote tick and a
//! trade tick. Historic requests are answered with synthetic bars.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::ports::{EventSink, ProviderAdapter, ProviderError, ProviderEvent};
use crate::domain::market::{Bar, HistoricBarRequest, Security, Tick};
use crate::infrastructure::config::SimulatedSettings;

/// Name the simulated provider is registered under.
pub const SIMULATED: &str = "SIMULATED";

/// Upper bound on bars in one synthetic historic response.
pub const MAX_HISTORIC_BARS: usize = 10_000;

/// Random-walk market data adapter.
pub struct SimulatedProvider {
    inner: Arc<Inner>,
}

struct Inner {
    settings: SimulatedSettings,
    sink: Arc<dyn EventSink>,
    connected: AtomicBool,
    prices: Mutex<HashMap<Security, Decimal>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SimulatedProvider {
    /// Create a stopped adapter.
    #[must_use]
    pub fn new(settings: SimulatedSettings, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                sink,
                connected: AtomicBool::new(false),
                prices: Mutex::new(HashMap::new()),
                cancel: Mutex::new(None),
            }),
        }
    }

    /// Securities currently streaming.
    #[must_use]
    pub fn subscribed(&self) -> Vec<Security> {
        self.inner.prices.lock().keys().cloned().collect()
    }

    fn require_connected(&self) -> Result<(), ProviderError> {
        if self.inner.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ProviderError::NotStarted)
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    for tick in self.next_ticks() {
                        self.sink.publish(SIMULATED, ProviderEvent::Tick(tick));
                    }
                }
            }
        }

        debug!("Simulated tick loop stopped");
    }

    fn next_ticks(&self) -> Vec<Tick> {
        let mut rng = rand::rng();
        let now = Utc::now();
        let step = self.settings.price_step;
        let half_spread = step / Decimal::TWO;

        let mut prices = self.prices.lock();
        let mut ticks = Vec::with_capacity(prices.len() * 2);
        for (security, mid) in prices.iter_mut() {
            *mid = walk(*mid, step, rng.random_range(-100..=100));
            let size = Decimal::from(rng.random_range(1_u32..=500));

            ticks.push(Tick::quote(
                SIMULATED,
                security.clone(),
                *mid - half_spread,
                *mid + half_spread,
                now,
            ));
            ticks.push(Tick::trade(SIMULATED, security.clone(), *mid, size, now));
        }
        ticks
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedProvider {
    fn provider(&self) -> &str {
        SIMULATED
    }

    async fn start(&self) -> Result<(), ProviderError> {
        let token = {
            let mut cancel = self.inner.cancel.lock();
            if cancel.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            *cancel = Some(token.clone());
            token
        };

        tokio::spawn(Arc::clone(&self.inner).run(token));
        self.inner.connected.store(true, Ordering::Release);
        info!(
            tick_interval_ms = self.inner.settings.tick_interval.as_millis(),
            "Simulated provider started"
        );
        self.inner.sink.publish(SIMULATED, ProviderEvent::Logon);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        let Some(token) = self.inner.cancel.lock().take() else {
            return Err(ProviderError::NotStarted);
        };

        token.cancel();
        self.inner.connected.store(false, Ordering::Release);
        self.inner.prices.lock().clear();
        info!("Simulated provider stopped");
        self.inner.sink.publish(SIMULATED, ProviderEvent::Logout);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn subscribe_tick_data(&self, security: &Security) -> Result<(), ProviderError> {
        self.require_connected()?;
        self.inner
            .prices
            .lock()
            .entry(security.clone())
            .or_insert(self.inner.settings.initial_price);
        debug!(security = %security, "Simulated subscription opened");
        Ok(())
    }

    async fn unsubscribe_tick_data(&self, security: &Security) -> Result<(), ProviderError> {
        self.require_connected()?;
        self.inner.prices.lock().remove(security);
        debug!(security = %security, "Simulated subscription closed");
        Ok(())
    }

    async fn historic_bar_data_request(
        &self,
        request: &HistoricBarRequest,
    ) -> Result<(), ProviderError> {
        self.require_connected()?;

        let start_price = self
            .inner
            .prices
            .lock()
            .get(&request.security)
            .copied()
            .unwrap_or(self.inner.settings.initial_price);
        let bars = synthetic_bars(
            request,
            start_price,
            self.inner.settings.price_step,
            &mut rand::rng(),
        );

        debug!(
            request_id = %request.request_id,
            security = %request.security,
            bars = bars.len(),
            "Answering historic request"
        );
        self.inner.sink.publish(
            SIMULATED,
            ProviderEvent::HistoricBarData {
                request_id: request.request_id.clone(),
                bars,
            },
        );
        Ok(())
    }
}

impl Drop for SimulatedProvider {
    fn drop(&mut self) {
        if let Some(token) = self.inner.cancel.lock().take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for SimulatedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedProvider")
            .field("connected", &self.is_connected())
            .field("securities", &self.inner.prices.lock().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Price Generation
// =============================================================================

/// Move `mid` by `percent` hundredths of `step`, never below zero.
fn walk(mid: Decimal, step: Decimal, percent: i64) -> Decimal {
    let next = (mid + step * Decimal::new(percent, 2)).round_dp(4);
    if next > Decimal::ZERO { next } else { mid }
}

/// One bar per full interval in `[start, end]`, stamped at the interval end.
fn synthetic_bars<R: Rng>(
    request: &HistoricBarRequest,
    start_price: Decimal,
    step: Decimal,
    rng: &mut R,
) -> Vec<Bar> {
    let interval = ChronoDuration::seconds(i64::from(request.interval));
    let mut bars = Vec::new();
    let mut close = start_price;
    let mut timestamp = request.start + interval;

    while timestamp <= request.end && bars.len() < MAX_HISTORIC_BARS {
        let open = close;
        close = walk(open, step, rng.random_range(-100..=100));
        let high = open.max(close) + step * Decimal::new(rng.random_range(0..=50), 2);
        let low = (open.min(close) - step * Decimal::new(rng.random_range(0..=50), 2))
            .max(Decimal::ZERO);

        bars.push(Bar {
            open,
            high,
            low,
            close,
            volume: Decimal::from(rng.random_range(100_u32..=10_000)),
            security: request.security.clone(),
            provider: SIMULATED.to_string(),
            request_id: Some(request.request_id.clone()),
            timestamp,
            is_bar_copied: false,
        });
        timestamp += interval;
    }

    bars
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::RecordingEventSink;
    use crate::domain::market::BarPriceType;

    fn provider(sink: &Arc<RecordingEventSink>) -> SimulatedProvider {
        let settings = SimulatedSettings {
            tick_interval: Duration::from_millis(10),
            ..SimulatedSettings::default()
        };
        SimulatedProvider::new(settings, Arc::clone(sink) as Arc<dyn EventSink>)
    }

    fn request(seconds: i64) -> HistoricBarRequest {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        HistoricBarRequest {
            request_id: "5000".to_string(),
            security: Security::new("AAPL"),
            bar_type: BarPriceType::Last,
            start,
            end: start + ChronoDuration::seconds(seconds),
            interval: 60,
        }
    }

    #[test]
    fn walk_stays_positive() {
        assert_eq!(walk(dec!(100), dec!(0.05), 100), dec!(100.05));
        assert_eq!(walk(dec!(100), dec!(0.05), -50), dec!(99.975));
        assert_eq!(walk(dec!(0.01), dec!(1), -100), dec!(0.01));
    }

    #[test]
    fn synthetic_bars_cover_full_intervals() {
        let mut rng = StdRng::seed_from_u64(7);

        let bars = synthetic_bars(&request(300), dec!(100), dec!(0.05), &mut rng);

        assert_eq!(bars.len(), 5);
        for pair in bars.windows(2) {
            assert_eq!(pair[1].open, pair[0].close);
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
        for bar in &bars {
            assert!(bar.low <= bar.open.min(bar.close));
            assert!(bar.high >= bar.open.max(bar.close));
            assert_eq!(bar.request_id.as_deref(), Some("5000"));
        }
    }

    #[test]
    fn short_range_yields_no_bars() {
        let mut rng = StdRng::seed_from_u64(7);

        assert!(synthetic_bars(&request(30), dec!(100), dec!(0.05), &mut rng).is_empty());
    }

    #[tokio::test]
    async fn commands_require_start() {
        let sink = Arc::new(RecordingEventSink::new());
        let adapter = provider(&sink);

        assert_eq!(
            adapter.subscribe_tick_data(&Security::new("AAPL")).await,
            Err(ProviderError::NotStarted)
        );
        assert_eq!(adapter.stop().await, Err(ProviderError::NotStarted));
    }

    #[tokio::test]
    async fn start_and_stop_emit_session_events() {
        let sink = Arc::new(RecordingEventSink::new());
        let adapter = provider(&sink);

        adapter.start().await.unwrap();
        assert!(adapter.is_connected());
        adapter.stop().await.unwrap();
        assert!(!adapter.is_connected());

        let events: Vec<_> = sink.drain().into_iter().map(|e| e.event).collect();
        assert_eq!(events, vec![ProviderEvent::Logon, ProviderEvent::Logout]);
    }

    #[tokio::test]
    async fn subscribed_security_streams_ticks() {
        let sink = Arc::new(RecordingEventSink::new());
        let adapter = provider(&sink);
        let aapl = Security::new("AAPL");

        adapter.start().await.unwrap();
        adapter.subscribe_tick_data(&aapl).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        adapter.stop().await.unwrap();

        let ticks: Vec<Tick> = sink
            .drain()
            .into_iter()
            .filter_map(|e| match e.event {
                ProviderEvent::Tick(tick) => Some(tick),
                _ => None,
            })
            .collect();
        assert!(!ticks.is_empty());
        assert!(ticks.iter().all(|t| t.security == aapl));
        assert!(ticks.iter().any(Tick::is_trade));
    }

    #[tokio::test]
    async fn historic_request_answers_on_the_sink() {
        let sink = Arc::new(RecordingEventSink::new());
        let adapter = provider(&sink);
        adapter.start().await.unwrap();
        sink.drain();

        adapter.historic_bar_data_request(&request(120)).await.unwrap();

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        match &events[0].event {
            ProviderEvent::HistoricBarData { request_id, bars } => {
                assert_eq!(request_id, "5000");
                assert_eq!(bars.len(), 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
