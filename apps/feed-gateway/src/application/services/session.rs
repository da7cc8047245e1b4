//! Provider Session State
//!
//! Everything the gateway tracks for one provider: the adapter, the four
//! reference-counted registries and the live aggregators. Guarded by one
//! async mutex per provider so all mutations for a provider are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::GatewayError;
use crate::application::ports::ProviderAdapter;
use crate::domain::aggregation::BarAggregator;
use crate::domain::market::{AppId, BarSpecification, ProviderName, Security};
use crate::domain::subscription::{
    HistoricRequestRegistry, LiveBarRegistry, LoginRegistry, SubscriptionRegistry,
};
use crate::infrastructure::metrics;

/// Aggregators keyed by the stream they consume.
pub type AggregatorMap = HashMap<(Security, BarSpecification), BarAggregator>;

/// State of one provider session.
pub struct ProviderSession {
    /// Provider name.
    pub provider: ProviderName,
    /// Adapter, present iff `logins` is non-empty.
    pub adapter: Option<Arc<dyn ProviderAdapter>>,
    /// Generation of the running adapter's sink, 0 while idle.
    pub generation: u64,
    /// Logged-in apps.
    pub logins: LoginRegistry,
    /// Tick subscriptions.
    pub subscriptions: SubscriptionRegistry,
    /// Live bar requests.
    pub live_bars: LiveBarRegistry,
    /// In-flight historic requests.
    pub historic: HistoricRequestRegistry,
    /// Live aggregators.
    pub aggregators: AggregatorMap,
}

impl ProviderSession {
    /// Create an idle session.
    #[must_use]
    pub fn new(provider: impl Into<ProviderName>) -> Self {
        Self {
            provider: provider.into(),
            adapter: None,
            generation: 0,
            logins: LoginRegistry::default(),
            subscriptions: SubscriptionRegistry::default(),
            live_bars: LiveBarRegistry::default(),
            historic: HistoricRequestRegistry::default(),
            aggregators: HashMap::new(),
        }
    }

    /// The running adapter.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotLoggedIn` when nobody holds a login.
    pub fn require_adapter(&self) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
        match &self.adapter {
            Some(adapter) if !self.logins.is_empty() => Ok(Arc::clone(adapter)),
            _ => Err(GatewayError::NotLoggedIn {
                provider: self.provider.clone(),
            }),
        }
    }

    /// Whether no login is held.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.logins.is_empty()
    }

    /// Drop every registry entry and aggregator.
    pub fn clear(&mut self) {
        self.logins.clear();
        self.subscriptions.clear();
        self.live_bars.clear();
        self.historic.clear();
        self.aggregators.clear();
    }

    /// Push the session gauges.
    pub fn report_gauges(&self) {
        metrics::set_active_logins(&self.provider, self.logins.count());
        metrics::set_active_subscriptions(&self.provider, self.subscriptions.security_count());
    }

    /// Point-in-time view of the session.
    #[must_use]
    pub fn snapshot(&self) -> ProviderSnapshot {
        let mut subscriptions: Vec<_> = self
            .subscriptions
            .iter()
            .map(|(security, subscribers)| SubscriptionSnapshot {
                symbol: security.symbol.clone(),
                references: subscribers.len(),
            })
            .collect();
        subscriptions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut live_bars: Vec<_> = self
            .live_bars
            .iter()
            .map(|(request_id, entry)| LiveBarSnapshot {
                request_id: request_id.clone(),
                symbol: entry.security.symbol.clone(),
                spec: entry.spec.to_string(),
                references: entry.count(),
            })
            .collect();
        live_bars.sort_by(|a, b| a.request_id.cmp(&b.request_id));

        ProviderSnapshot {
            provider: self.provider.clone(),
            connected: self.adapter.as_ref().is_some_and(|a| a.is_connected()),
            logins: self.logins.count(),
            apps: self.logins.distinct_apps(),
            subscriptions,
            live_bars,
            aggregators: self.aggregators.len(),
            historic_pending: self.historic.len(),
        }
    }
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("provider", &self.provider)
            .field("adapter", &self.adapter.is_some())
            .field("logins", &self.logins)
            .field("subscriptions", &self.subscriptions)
            .field("live_bars", &self.live_bars)
            .field("historic", &self.historic)
            .field("aggregators", &self.aggregators.len())
            .finish()
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time view of one provider session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSnapshot {
    /// Provider name.
    pub provider: ProviderName,
    /// Whether the adapter reports a live session.
    pub connected: bool,
    /// Login reference count.
    pub logins: usize,
    /// Distinct logged-in apps.
    pub apps: Vec<AppId>,
    /// Tick subscriptions by symbol.
    pub subscriptions: Vec<SubscriptionSnapshot>,
    /// Live bar requests.
    pub live_bars: Vec<LiveBarSnapshot>,
    /// Live aggregators.
    pub aggregators: usize,
    /// Historic requests awaiting a response.
    pub historic_pending: usize,
}

/// Reference count of one tick subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSnapshot {
    /// Security symbol.
    pub symbol: String,
    /// Subscriber references.
    pub references: usize,
}

/// Reference count of one live bar request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveBarSnapshot {
    /// Bar request ID.
    pub request_id: String,
    /// Security symbol.
    pub symbol: String,
    /// Bar specification.
    pub spec: String,
    /// Subscriber references.
    pub references: usize,
}
