//! Dispatch Routing Integration Tests
//!
//! Tests that provider events reach the strategies recorded in the
//! registries: tick fan-out, live bars, historic responses, logon acks and
//! provider rejections.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use feed_gateway::application::ports::{RecordingEventSink, RecordingPublisher};
use feed_gateway::infrastructure::providers::MockProviderFactory;
use feed_gateway::{
    Bar, BarFormat, BarPriceType, BarSpecification, Dispatcher, OutboundEvent, ProviderEnvelope,
    ProviderEvent, Recipient, Security, SessionMultiplexer, Tick,
};

const SIM: &str = "SIM";

struct Harness {
    sink: Arc<RecordingEventSink>,
    publisher: Arc<RecordingPublisher>,
    mux: SessionMultiplexer,
    dispatcher: Dispatcher,
}

impl Harness {
    async fn logged_in(apps: &[&str]) -> Self {
        let sink = Arc::new(RecordingEventSink::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let mux = SessionMultiplexer::new(
            Arc::new(MockProviderFactory::new()),
            Arc::clone(&sink) as _,
            Arc::clone(&publisher) as _,
        );
        for app in apps {
            mux.login(SIM, &(*app).to_string()).await.unwrap();
        }
        publisher.drain();

        let dispatcher = Dispatcher::new(mux.clone());
        Self {
            sink,
            publisher,
            mux,
            dispatcher,
        }
    }

    async fn subscribe(&self, symbol: &str, strategy: &str) {
        self.mux
            .subscribe(SIM, &Security::new(symbol), &strategy.to_string())
            .await
            .unwrap();
    }

    async fn bar_subscribe(&self, id: &str, spec: &BarSpecification, strategy: &str) {
        self.mux
            .subscribe_live_bars(SIM, &Security::new("AAPL"), spec, id, &strategy.to_string())
            .await
            .unwrap();
    }

    async fn deliver(&self, event: ProviderEvent) {
        self.dispatcher
            .dispatch(ProviderEnvelope::new(SIM, event))
            .await;
    }

    async fn deliver_at(&self, event: ProviderEvent, received_at: DateTime<Utc>) {
        self.dispatcher
            .dispatch(ProviderEnvelope::new(SIM, event).with_received_at(received_at))
            .await;
    }
}

fn trade(symbol: &str, price: Decimal, at: DateTime<Utc>) -> ProviderEvent {
    ProviderEvent::Tick(Tick::trade(SIM, Security::new(symbol), price, dec!(10), at))
}

fn tick_recipients(events: &[OutboundEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::Tick { strategy_id, .. } => Some(strategy_id.clone()),
            _ => None,
        })
        .collect()
}

fn bars_for(events: &[OutboundEvent]) -> Vec<(String, Bar)> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::Bar { strategy_id, bar } => Some((strategy_id.clone(), bar.clone())),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Session Events
// =============================================================================

#[tokio::test]
async fn logon_acks_each_app_once() {
    let h = Harness::logged_in(&["A1", "A2", "A1"]).await;

    h.deliver(ProviderEvent::Logon).await;

    assert_eq!(
        h.publisher.drain(),
        vec![
            OutboundEvent::LogonAck {
                app_id: "A1".to_string(),
                provider: SIM.to_string(),
            },
            OutboundEvent::LogonAck {
                app_id: "A2".to_string(),
                provider: SIM.to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn logon_from_replaced_adapter_is_dropped() {
    let h = Harness::logged_in(&["A1"]).await;
    h.mux.logout(SIM, &"A1".to_string()).await.unwrap();
    h.mux.login(SIM, &"A1".to_string()).await.unwrap();
    h.publisher.drain();

    let logons: Vec<ProviderEnvelope> = h
        .sink
        .drain()
        .into_iter()
        .filter(|envelope| envelope.event == ProviderEvent::Logon)
        .collect();
    assert_eq!(logons.len(), 2);
    let (stale, current) = (logons[0].clone(), logons[1].clone());

    h.dispatcher.dispatch(stale).await;
    assert!(h.publisher.drain().is_empty());

    h.dispatcher.dispatch(current).await;
    assert_eq!(
        h.publisher.drain(),
        vec![OutboundEvent::LogonAck {
            app_id: "A1".to_string(),
            provider: SIM.to_string(),
        }]
    );
}

#[tokio::test]
async fn events_for_unknown_provider_are_dropped() {
    let h = Harness::logged_in(&["A1"]).await;

    h.dispatcher
        .dispatch(ProviderEnvelope::new("OTHER", ProviderEvent::Logon))
        .await;

    assert!(h.publisher.drain().is_empty());
}

// =============================================================================
// Ticks
// =============================================================================

#[tokio::test]
async fn tick_fans_out_once_per_reference() {
    let h = Harness::logged_in(&["A1"]).await;
    h.subscribe("AAPL", "S1").await;
    h.subscribe("AAPL", "S1").await;
    h.subscribe("AAPL", "S2").await;

    h.deliver(trade("AAPL", dec!(150), Utc::now())).await;

    assert_eq!(
        tick_recipients(&h.publisher.drain()),
        vec!["S1".to_string(), "S1".to_string(), "S2".to_string()]
    );
}

#[tokio::test]
async fn tick_for_unsubscribed_security_is_dropped() {
    let h = Harness::logged_in(&["A1"]).await;
    h.subscribe("AAPL", "S1").await;

    h.deliver(trade("MSFT", dec!(400), Utc::now())).await;

    assert!(h.publisher.drain().is_empty());
}

#[tokio::test]
async fn unsubscribed_strategy_stops_receiving_ticks() {
    let h = Harness::logged_in(&["A1"]).await;
    h.subscribe("AAPL", "S1").await;
    h.subscribe("AAPL", "S2").await;
    h.mux
        .unsubscribe(SIM, &Security::new("AAPL"), &"S1".to_string())
        .await
        .unwrap();

    h.deliver(trade("AAPL", dec!(150), Utc::now())).await;

    assert_eq!(tick_recipients(&h.publisher.drain()), vec!["S2".to_string()]);
}

// =============================================================================
// Live Bars
// =============================================================================

#[tokio::test]
async fn equal_engineered_bars_reach_every_request() {
    let h = Harness::logged_in(&["A1"]).await;
    let spec = BarSpecification::new(
        BarFormat::EqualEngineered,
        BarPriceType::Last,
        2,
        Decimal::ZERO,
    );
    h.bar_subscribe("B1", &spec, "S1").await;
    h.bar_subscribe("B2", &spec, "S2").await;
    let now = Utc::now();

    h.deliver(trade("AAPL", dec!(100), now)).await;
    assert!(bars_for(&h.publisher.drain()).is_empty());
    h.deliver(trade("AAPL", dec!(103), now + Duration::seconds(1))).await;

    let mut bars = bars_for(&h.publisher.drain());
    bars.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].0, "S1");
    assert_eq!(bars[0].1.request_id.as_deref(), Some("B1"));
    assert_eq!(bars[1].0, "S2");
    assert_eq!(bars[1].1.request_id.as_deref(), Some("B2"));
    for (_, bar) in &bars {
        assert_eq!(
            (bar.open, bar.high, bar.low, bar.close),
            (dec!(100), dec!(103), dec!(100), dec!(103))
        );
        assert_eq!(bar.volume, dec!(20));
    }
}

#[tokio::test]
async fn time_bars_close_on_the_clock() {
    let h = Harness::logged_in(&["A1"]).await;
    let spec = BarSpecification::new(BarFormat::Time, BarPriceType::Last, 60, Decimal::ZERO);
    h.bar_subscribe("B1", &spec, "S1").await;
    let now = Utc::now();

    h.deliver(trade("AAPL", dec!(100), now)).await;
    h.dispatcher.on_clock(now + Duration::seconds(180)).await;

    let bars = bars_for(&h.publisher.drain());
    assert!(bars.len() >= 2);
    assert!(!bars[0].1.is_bar_copied);
    assert_eq!(bars[0].1.close, dec!(100));
    for (strategy, bar) in &bars[1..] {
        assert_eq!(strategy, "S1");
        assert!(bar.is_bar_copied);
        assert_eq!(
            (bar.open, bar.high, bar.low, bar.close),
            (dec!(100), dec!(100), dec!(100), dec!(100))
        );
        assert_eq!(bar.volume, Decimal::ZERO);
    }
    for pair in bars.windows(2) {
        assert!(pair[1].1.timestamp >= pair[0].1.timestamp);
    }
}

#[tokio::test]
async fn unequal_engineered_bars_slice_on_receive_time() {
    let h = Harness::logged_in(&["A1"]).await;
    let spec = BarSpecification::new(
        BarFormat::UnequalEngineered,
        BarPriceType::Last,
        10,
        Decimal::ZERO,
    );
    h.bar_subscribe("B1", &spec, "S1").await;
    let now = Utc::now();

    // Provider clock runs a minute behind the gateway.
    h.deliver_at(trade("AAPL", dec!(100), now - Duration::seconds(60)), now)
        .await;
    h.dispatcher.on_clock(now + Duration::milliseconds(250)).await;
    assert!(bars_for(&h.publisher.drain()).is_empty());

    h.dispatcher.on_clock(now + Duration::seconds(11)).await;
    let bars = bars_for(&h.publisher.drain());
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].1.close, dec!(100));
}

#[tokio::test]
async fn time_tick_received_after_its_window_closed_is_dropped() {
    let h = Harness::logged_in(&["A1"]).await;
    let spec = BarSpecification::new(BarFormat::Time, BarPriceType::Last, 60, Decimal::ZERO);
    h.bar_subscribe("B1", &spec, "S1").await;
    let t = Utc::now();

    h.deliver_at(trade("AAPL", dec!(100), t), t).await;
    h.dispatcher.on_clock(t + Duration::seconds(61)).await;
    let closed = bars_for(&h.publisher.drain());
    assert!(!closed.is_empty());
    assert_eq!(closed[0].1.close, dec!(100));

    h.deliver_at(trade("AAPL", dec!(90), t), t).await;
    assert!(bars_for(&h.publisher.drain()).is_empty());

    h.dispatcher.on_clock(t + Duration::seconds(122)).await;
    let bars = bars_for(&h.publisher.drain());
    assert!(!bars.is_empty());
    for (_, bar) in &bars {
        assert!(bar.is_bar_copied);
        assert_eq!(bar.close, dec!(100));
        assert_eq!(bar.volume, Decimal::ZERO);
    }
}

#[tokio::test]
async fn released_bar_stream_stops_emitting() {
    let h = Harness::logged_in(&["A1"]).await;
    let spec = BarSpecification::new(
        BarFormat::EqualEngineered,
        BarPriceType::Last,
        1,
        Decimal::ZERO,
    );
    h.bar_subscribe("B1", &spec, "S1").await;
    h.mux
        .unsubscribe_live_bars(SIM, &Security::new("AAPL"), &spec, "B1", &"S1".to_string())
        .await
        .unwrap();

    h.deliver(trade("AAPL", dec!(100), Utc::now())).await;

    assert!(h.publisher.drain().is_empty());
}

// =============================================================================
// Historic Responses
// =============================================================================

#[tokio::test]
async fn historic_response_routes_once_to_requester() {
    let h = Harness::logged_in(&["A1"]).await;
    let now = Utc::now();
    let request = feed_gateway::HistoricBarRequest {
        request_id: "5000".to_string(),
        security: Security::new("AAPL"),
        bar_type: BarPriceType::Last,
        start: now - Duration::hours(1),
        end: now,
        interval: 60,
    };
    h.mux
        .request_historic(SIM, &request, &"S1".to_string())
        .await
        .unwrap();
    let bar = Bar {
        open: dec!(1),
        high: dec!(2),
        low: dec!(1),
        close: dec!(2),
        volume: dec!(100),
        security: Security::new("AAPL"),
        provider: SIM.to_string(),
        request_id: None,
        timestamp: now,
        is_bar_copied: false,
    };
    let response = ProviderEvent::HistoricBarData {
        request_id: "5000".to_string(),
        bars: vec![bar],
    };

    h.deliver(response.clone()).await;

    let events = h.publisher.drain();
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutboundEvent::HistoricBarData {
            strategy_id,
            request_id,
            bars,
        } => {
            assert_eq!(strategy_id, "S1");
            assert_eq!(request_id, "5000");
            assert_eq!(bars[0].request_id.as_deref(), Some("5000"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(h.mux.historic_request(SIM, "5000").await, None);

    h.deliver(response).await;
    assert!(h.publisher.drain().is_empty());
}

#[tokio::test]
async fn unknown_historic_response_is_dropped() {
    let h = Harness::logged_in(&["A1"]).await;

    h.deliver(ProviderEvent::HistoricBarData {
        request_id: "9999".to_string(),
        bars: vec![],
    })
    .await;

    assert!(h.publisher.drain().is_empty());
}

// =============================================================================
// Provider Rejections
// =============================================================================

#[tokio::test]
async fn rejection_reaches_security_subscribers_and_keeps_registries() {
    let h = Harness::logged_in(&["A1"]).await;
    h.subscribe("AAPL", "S1").await;

    h.deliver(ProviderEvent::MarketDataRejection {
        security: Some(Security::new("AAPL")),
        request_id: None,
        reason: "symbol halted".to_string(),
    })
    .await;

    let events = h.publisher.drain();
    assert_eq!(events.len(), 1);
    let OutboundEvent::Rejection(rejection) = &events[0] else {
        panic!("expected a rejection, got {:?}", events[0]);
    };
    assert_eq!(rejection.recipient, Recipient::Strategy("S1".to_string()));
    assert_eq!(rejection.reason, "symbol halted");
    assert_eq!(h.mux.subscriber_count(SIM, &Security::new("AAPL")).await, 1);
}

#[tokio::test]
async fn unattributed_rejection_reaches_every_app() {
    let h = Harness::logged_in(&["A1", "A2"]).await;

    h.deliver(ProviderEvent::MarketDataRejection {
        security: None,
        request_id: None,
        reason: "rate limited".to_string(),
    })
    .await;

    let recipients: Vec<Recipient> = h
        .publisher
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            OutboundEvent::Rejection(rejection) => Some(rejection.recipient),
            _ => None,
        })
        .collect();
    assert_eq!(
        recipients,
        vec![
            Recipient::App("A1".to_string()),
            Recipient::App("A2".to_string())
        ]
    );
}
