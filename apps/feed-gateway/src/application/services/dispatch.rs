//! Event Dispatch
//!
//! Routes provider events to the strategies recorded in the multiplexer's
//! registries. Runs off the adapter's read path, consuming the ingest queue.
//!
//! | Event | Routed to |
//! |-------|-----------|
//! | `Logon` | every distinct logged-in app |
//! | `Tick` | each subscription entry, then the security's aggregators |
//! | `HistoricBarData` | the strategy recorded for the request ID |
//! | `MarketDataRejection` | request owner, security subscribers, or apps |
//!
//! Every event is handled in isolation; an event with no matching route is
//! logged and dropped.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::session::ProviderSession;
use super::SessionMultiplexer;
use crate::application::ports::{ProviderEnvelope, ProviderEvent};
use crate::domain::events::{OutboundEvent, Recipient, Rejection};
use crate::domain::market::{Bar, BarSpecification, Security, StrategyId, Tick};
use crate::infrastructure::metrics;

/// Fans provider events out to clients.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    multiplexer: SessionMultiplexer,
}

impl Dispatcher {
    /// Create a dispatcher over the multiplexer's registries.
    #[must_use]
    pub const fn new(multiplexer: SessionMultiplexer) -> Self {
        Self { multiplexer }
    }

    /// Route one provider event.
    pub async fn dispatch(&self, envelope: ProviderEnvelope) {
        let started = Instant::now();
        let kind = envelope.event.kind();
        metrics::record_provider_event(&envelope.provider, kind);

        let Some(handle) = self.multiplexer.session(&envelope.provider) else {
            debug!(provider = %envelope.provider, event = kind, "Event for unknown provider dropped");
            metrics::record_unknown_routing("provider");
            return;
        };
        let mut session = handle.lock().await;

        if envelope
            .generation
            .is_some_and(|generation| generation != session.generation)
        {
            debug!(
                provider = %envelope.provider,
                event = kind,
                generation = ?envelope.generation,
                current = session.generation,
                "Event from replaced adapter dropped"
            );
            metrics::record_stale_event(&envelope.provider, kind);
            return;
        }

        let received_at = envelope.received_at;
        match envelope.event {
            ProviderEvent::Logon => self.on_logon(&session),
            ProviderEvent::Logout => {
                info!(provider = %session.provider, "Provider reported logout");
            }
            ProviderEvent::Tick(tick) => self.on_tick(&mut session, &tick, received_at),
            ProviderEvent::HistoricBarData { request_id, bars } => {
                self.on_historic(&mut session, request_id, bars);
            }
            ProviderEvent::MarketDataRejection {
                security,
                request_id,
                reason,
            } => self.on_rejection(&session, security, request_id, reason),
        }

        metrics::record_dispatch_duration(kind, started.elapsed());
    }

    /// Advance every aggregator to `now`, routing the bars that completed.
    pub async fn on_clock(&self, now: DateTime<Utc>) {
        for handle in self.multiplexer.sessions() {
            let mut session = handle.lock().await;
            if session.aggregators.is_empty() {
                continue;
            }

            let completed: Vec<(BarSpecification, Bar)> = session
                .aggregators
                .iter_mut()
                .flat_map(|((_, spec), aggregator)| {
                    aggregator
                        .on_clock(now)
                        .into_iter()
                        .map(|bar| (spec.clone(), bar))
                        .collect::<Vec<_>>()
                })
                .collect();

            for (spec, bar) in completed {
                self.route_bar(&session, &spec, &bar);
            }
        }
    }

    fn on_logon(&self, session: &ProviderSession) {
        let apps = session.logins.distinct_apps();
        info!(provider = %session.provider, apps = apps.len(), "Provider logged on");

        for app_id in apps {
            self.publish(OutboundEvent::LogonAck {
                app_id,
                provider: session.provider.clone(),
            });
        }
    }

    fn on_tick(&self, session: &mut ProviderSession, tick: &Tick, received_at: DateTime<Utc>) {
        let subscribers = session.subscriptions.subscribers(&tick.security);
        if subscribers.is_empty() {
            debug!(
                provider = %session.provider,
                security = %tick.security,
                "Tick for unsubscribed security dropped"
            );
            metrics::record_unknown_routing("subscription");
            return;
        }

        for strategy_id in subscribers {
            self.publish(OutboundEvent::Tick {
                strategy_id: strategy_id.clone(),
                tick: tick.clone(),
            });
        }

        let provider = session.provider.clone();
        let completed: Vec<(BarSpecification, Bar)> = session
            .aggregators
            .iter_mut()
            .filter(|((security, _), _)| security == &tick.security)
            .flat_map(|((_, spec), aggregator)| {
                if aggregator.is_late(received_at) {
                    debug!(
                        provider = %provider,
                        security = %tick.security,
                        spec = %spec,
                        "Tick for a closed window dropped"
                    );
                    metrics::record_late_tick(&provider, spec.format.as_str());
                }
                aggregator
                    .on_tick(tick, received_at)
                    .into_iter()
                    .map(|bar| (spec.clone(), bar))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (spec, bar) in completed {
            self.route_bar(session, &spec, &bar);
        }
    }

    fn route_bar(&self, session: &ProviderSession, spec: &BarSpecification, bar: &Bar) {
        metrics::record_bars_emitted(spec.format.as_str(), 1);

        for (request_id, entry) in session.live_bars.routes(&bar.security, spec) {
            let stamped = bar.for_request(request_id);
            for strategy_id in entry.subscribers() {
                self.publish(OutboundEvent::Bar {
                    strategy_id: strategy_id.clone(),
                    bar: stamped.clone(),
                });
            }
        }
    }

    fn on_historic(&self, session: &mut ProviderSession, request_id: String, bars: Vec<Bar>) {
        let Some(strategy_id) = session.historic.take(&request_id) else {
            warn!(
                provider = %session.provider,
                request_id = %request_id,
                "Historic response for unknown request dropped"
            );
            metrics::record_unknown_routing("historic");
            return;
        };

        debug!(
            provider = %session.provider,
            request_id = %request_id,
            strategy_id = %strategy_id,
            bars = bars.len(),
            "Routing historic response"
        );

        let bars = bars.iter().map(|bar| bar.for_request(&request_id)).collect();
        self.publish(OutboundEvent::HistoricBarData {
            strategy_id,
            request_id,
            bars,
        });
    }

    fn on_rejection(
        &self,
        session: &ProviderSession,
        security: Option<Security>,
        request_id: Option<String>,
        reason: String,
    ) {
        let recipients = rejection_recipients(session, security.as_ref(), request_id.as_deref());
        warn!(
            provider = %session.provider,
            security = ?security.as_ref().map(|s| s.symbol.as_str()),
            request_id = ?request_id,
            recipients = recipients.len(),
            reason = %reason,
            "Provider rejected market data request"
        );

        for recipient in recipients {
            let rejection = Rejection::new(recipient, session.provider.clone(), reason.clone())
                .with_request_id(request_id.clone())
                .with_security(security.clone());
            self.publish(OutboundEvent::Rejection(rejection));
        }
    }

    fn publish(&self, event: OutboundEvent) {
        metrics::record_event_routed(event.kind());
        self.multiplexer.publisher().publish(event);
    }
}

/// Who a provider rejection is forwarded to.
///
/// The request ID is tried against historic then live-bar requests, then
/// the security's subscribers; with no match every logged-in app is told.
fn rejection_recipients(
    session: &ProviderSession,
    security: Option<&Security>,
    request_id: Option<&str>,
) -> Vec<Recipient> {
    if let Some(request_id) = request_id {
        if let Some(strategy_id) = session.historic.get(request_id) {
            return vec![Recipient::Strategy(strategy_id.clone())];
        }
        if let Some(entry) = session.live_bars.get(request_id) {
            return distinct(entry.subscribers())
                .into_iter()
                .map(Recipient::Strategy)
                .collect();
        }
    }

    if let Some(security) = security {
        let subscribers = session.subscriptions.subscribers(security);
        if !subscribers.is_empty() {
            return distinct(subscribers)
                .into_iter()
                .map(Recipient::Strategy)
                .collect();
        }
    }

    session
        .logins
        .distinct_apps()
        .into_iter()
        .map(Recipient::App)
        .collect()
}

fn distinct(strategies: &[StrategyId]) -> Vec<StrategyId> {
    let mut seen: Vec<StrategyId> = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        if !seen.contains(strategy) {
            seen.push(strategy.clone());
        }
    }
    seen
}
