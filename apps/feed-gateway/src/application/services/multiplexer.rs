//! Session Multiplexer
//!
//! Owns the provider adapter lifecycle and every reference-counted registry.
//! One physical session per provider is opened on the first login and closed
//! on the last logout; tick subscriptions are opened on the first reference
//! and closed on the last.
//!
//! # Concurrency
//!
//! Each provider has its own `tokio::sync::Mutex<ProviderSession>`; adapter
//! commands are issued while it is held, so mutations for one provider are
//! strictly serialized while different providers proceed in parallel. The
//! provider map itself sits behind a `parking_lot::RwLock` that is never held
//! across an await point.
//!
//! A session leaves the map once its last login is gone, so a name that
//! never logs in successfully leaves nothing behind. Every adapter publishes
//! through a `SessionSink` stamped with a fresh generation; the dispatcher
//! drops events from generations that are no longer current.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::session::{ProviderSession, ProviderSnapshot};
use super::GatewayError;
use crate::application::commands::{CommandEnvelope, GatewayCommand};
use crate::application::ports::{
    EventSink, OutboundPublisher, ProviderError, ProviderFactory, SessionSink,
};
use crate::domain::aggregation::BarAggregator;
use crate::domain::events::{OutboundEvent, Recipient, Rejection};
use crate::domain::market::{
    AppId, BarSpecification, HistoricBarRequest, ProviderName, Security, StrategyId,
};
use crate::domain::subscription::RefTransition;
use crate::infrastructure::metrics::{self, CommandOutcome};

/// Shared handle to one provider's session state.
pub type SessionHandle = Arc<Mutex<ProviderSession>>;

/// Multiplexes many client logins and subscriptions onto one adapter per
/// provider.
#[derive(Clone)]
pub struct SessionMultiplexer {
    factory: Arc<dyn ProviderFactory>,
    sink: Arc<dyn EventSink>,
    publisher: Arc<dyn OutboundPublisher>,
    sessions: Arc<RwLock<HashMap<ProviderName, SessionHandle>>>,
    next_generation: Arc<AtomicU64>,
}

impl SessionMultiplexer {
    /// Create a multiplexer.
    ///
    /// `sink` is handed to every adapter the factory creates; `publisher`
    /// receives acks and rejections.
    #[must_use]
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        sink: Arc<dyn EventSink>,
        publisher: Arc<dyn OutboundPublisher>,
    ) -> Self {
        Self {
            factory,
            sink,
            publisher,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    // =========================================================================
    // Command Entry Point
    // =========================================================================

    /// Apply one client command.
    ///
    /// Failures are never returned: `UnknownRouting` is logged and dropped,
    /// anything else is published as a `Rejection` to the sender.
    pub async fn handle(&self, envelope: CommandEnvelope) {
        let kind = envelope.command.kind();
        let provider = envelope.command.provider().to_string();

        match self.apply(&envelope).await {
            Ok(()) => {
                debug!(
                    provider = %provider,
                    command = kind,
                    app_id = %envelope.app_id,
                    strategy_id = %envelope.strategy_id,
                    "Command applied"
                );
                metrics::record_command(kind, CommandOutcome::Applied);
            }
            Err(GatewayError::UnknownRouting { registry, key, .. }) => {
                warn!(
                    provider = %provider,
                    command = kind,
                    correlation_id = %envelope.correlation_id,
                    registry,
                    key = %key,
                    "Dropping command with unknown routing key"
                );
                metrics::record_command(kind, CommandOutcome::Dropped);
                metrics::record_unknown_routing(registry);
            }
            Err(error) => {
                warn!(
                    provider = %provider,
                    command = kind,
                    correlation_id = %envelope.correlation_id,
                    error = %error,
                    "Command rejected"
                );
                metrics::record_command(kind, CommandOutcome::Rejected);
                self.publish(OutboundEvent::Rejection(rejection_for(&envelope, &error)));
            }
        }
    }

    async fn apply(&self, envelope: &CommandEnvelope) -> Result<(), GatewayError> {
        let strategy = &envelope.strategy_id;
        let command = &envelope.command;

        match command {
            GatewayCommand::Login { provider } => self.login(provider, &envelope.app_id).await,
            GatewayCommand::Logout { provider } => self.logout(provider, &envelope.app_id).await,
            GatewayCommand::Subscribe { provider, security } => {
                self.subscribe(provider, security, strategy).await
            }
            GatewayCommand::Unsubscribe { provider, security } => {
                self.unsubscribe(provider, security, strategy).await
            }
            GatewayCommand::BarSubscribe {
                provider,
                security,
                id,
                ..
            } => {
                let spec = bar_spec(command)?;
                self.subscribe_live_bars(provider, security, &spec, id, strategy)
                    .await
            }
            GatewayCommand::BarUnsubscribe {
                provider,
                security,
                id,
                ..
            } => {
                let spec = bar_spec(command)?;
                self.unsubscribe_live_bars(provider, security, &spec, id, strategy)
                    .await
            }
            GatewayCommand::HistoricRequest { provider, .. } => {
                let request = command.historic_request().ok_or_else(|| {
                    GatewayError::InvalidRequest("missing historic request".to_string())
                })?;
                self.request_historic(provider, &request, strategy).await
            }
        }
    }

    // =========================================================================
    // Login / Logout
    // =========================================================================

    /// Register a login, opening the provider session on the first one.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConnectionFailure` if the provider is unknown
    /// or the adapter cannot be created or started; the login is not
    /// recorded and no session state is kept in that case.
    pub async fn login(&self, provider: &str, app_id: &AppId) -> Result<(), GatewayError> {
        if !self.factory.supports(provider) {
            let error = ProviderError::UnknownProvider {
                provider: provider.to_string(),
            };
            return Err(GatewayError::connection(provider, &error));
        }

        let (handle, mut session) = self.lock_or_create(provider).await;

        if session.is_idle() {
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            let sink = Arc::new(SessionSink::new(Arc::clone(&self.sink), generation));
            let adapter = match self.factory.create(provider, sink) {
                Ok(adapter) => adapter,
                Err(e) => {
                    self.reap(provider, &handle);
                    return Err(GatewayError::connection(provider, &e));
                }
            };

            info!(
                provider = %provider,
                app_id = %app_id,
                generation,
                "Starting provider session"
            );
            if let Err(e) = adapter.start().await {
                metrics::record_adapter_error(provider, "start");
                self.reap(provider, &handle);
                return Err(GatewayError::connection(provider, &e));
            }
            session.adapter = Some(adapter);
            session.generation = generation;
        }

        let transition = session.logins.add(app_id);
        session.report_gauges();
        debug!(
            provider = %provider,
            app_id = %app_id,
            logins = session.logins.count(),
            "Login registered"
        );

        let connected = session.adapter.as_ref().is_some_and(|a| a.is_connected());
        if !transition.is_first() && connected {
            self.publish(OutboundEvent::LogonAck {
                app_id: app_id.clone(),
                provider: provider.to_string(),
            });
        }

        Ok(())
    }

    /// Release one login, closing the provider session on the last one.
    ///
    /// The last logout also clears every registry and aggregator of the
    /// provider.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::UnknownRouting` if `app_id` holds no login.
    pub async fn logout(&self, provider: &str, app_id: &AppId) -> Result<(), GatewayError> {
        let handle = self
            .session(provider)
            .ok_or_else(|| unknown(provider, "login", app_id))?;
        let mut session = handle.lock().await;

        match session.logins.remove(app_id) {
            RefTransition::NotFound => return Err(unknown(provider, "login", app_id)),
            RefTransition::Released => {
                info!(provider = %provider, app_id = %app_id, "Last logout, stopping provider session");
                session.clear();
                if let Some(adapter) = session.adapter.take() {
                    if let Err(e) = adapter.stop().await {
                        metrics::record_adapter_error(provider, "stop");
                        warn!(provider = %provider, error = %e, "Provider adapter failed to stop cleanly");
                    }
                }
                self.reap(provider, &handle);
            }
            _ => {}
        }

        session.report_gauges();
        self.publish(OutboundEvent::LogoutAck {
            app_id: app_id.clone(),
            provider: provider.to_string(),
        });
        Ok(())
    }

    // =========================================================================
    // Tick Subscriptions
    // =========================================================================

    /// Add one tick subscription reference.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn` without a login, or `AdapterFault` if the first
    /// reference could not be opened upstream (the reference is rolled back).
    pub async fn subscribe(
        &self,
        provider: &str,
        security: &Security,
        strategy: &StrategyId,
    ) -> Result<(), GatewayError> {
        let handle = self.logged_in_session(provider)?;
        let mut session = handle.lock().await;
        subscribe_locked(&mut session, security, strategy).await
    }

    /// Remove one tick subscription reference.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRouting` if no such reference exists, or
    /// `AdapterFault` if closing the last reference upstream failed.
    pub async fn unsubscribe(
        &self,
        provider: &str,
        security: &Security,
        strategy: &StrategyId,
    ) -> Result<(), GatewayError> {
        let handle = self
            .session(provider)
            .ok_or_else(|| unknown(provider, "subscription", &security.symbol))?;
        let mut session = handle.lock().await;
        unsubscribe_locked(&mut session, security, strategy).await
    }

    // =========================================================================
    // Live Bars
    // =========================================================================

    /// Add one live bar reference and its underlying tick subscription.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a bad spec or a request ID bound to a
    /// different stream, plus any error of [`Self::subscribe`].
    pub async fn subscribe_live_bars(
        &self,
        provider: &str,
        security: &Security,
        spec: &BarSpecification,
        request_id: &str,
        strategy: &StrategyId,
    ) -> Result<(), GatewayError> {
        spec.validate()?;
        let handle = self.logged_in_session(provider)?;
        let mut session = handle.lock().await;
        let request_id = request_id.to_string();

        session.live_bars.check(&request_id, security, spec)?;
        subscribe_locked(&mut session, security, strategy).await?;

        let transition = session
            .live_bars
            .add(&request_id, security, spec, strategy)?;
        if transition.is_first() {
            debug!(
                provider = %provider,
                security = %security,
                spec = %spec,
                "Creating bar aggregator"
            );
            session.aggregators.insert(
                (security.clone(), spec.clone()),
                BarAggregator::new(provider, security.clone(), spec.clone(), Utc::now()),
            );
        }

        Ok(())
    }

    /// Remove one live bar reference and its underlying tick subscription.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRouting` if the request is not held by `strategy` for
    /// this security and spec.
    pub async fn unsubscribe_live_bars(
        &self,
        provider: &str,
        security: &Security,
        spec: &BarSpecification,
        request_id: &str,
        strategy: &StrategyId,
    ) -> Result<(), GatewayError> {
        let handle = self
            .session(provider)
            .ok_or_else(|| unknown(provider, "live_bar", request_id))?;
        let mut session = handle.lock().await;

        let matches = session
            .live_bars
            .get(request_id)
            .is_some_and(|entry| &entry.security == security && &entry.spec == spec);
        if !matches {
            return Err(unknown(provider, "live_bar", request_id));
        }

        let Some((transition, security, spec)) =
            session.live_bars.remove(&request_id.to_string(), strategy)
        else {
            return Err(unknown(provider, "live_bar", request_id));
        };

        if transition.is_last() {
            debug!(provider = %provider, security = %security, spec = %spec, "Dropping bar aggregator");
            session.aggregators.remove(&(security.clone(), spec));
        }

        unsubscribe_locked(&mut session, &security, strategy).await
    }

    // =========================================================================
    // Historic Requests
    // =========================================================================

    /// Record a historic request and forward it to the adapter.
    ///
    /// A request ID still in flight is rebound to the new strategy.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed range, `NotLoggedIn` without
    /// a login, or `AdapterFault` if the adapter refused the request (the
    /// record is rolled back).
    pub async fn request_historic(
        &self,
        provider: &str,
        request: &HistoricBarRequest,
        strategy: &StrategyId,
    ) -> Result<(), GatewayError> {
        request.validate().map_err(GatewayError::InvalidRequest)?;
        let handle = self.logged_in_session(provider)?;
        let mut session = handle.lock().await;
        let adapter = session.require_adapter()?;

        let previous = session.historic.insert(&request.request_id, strategy);
        if let Some(previous) = &previous {
            warn!(
                provider = %provider,
                request_id = %request.request_id,
                previous = %previous,
                strategy_id = %strategy,
                "Historic request ID reused while in flight"
            );
        }

        if let Err(e) = adapter.historic_bar_data_request(request).await {
            metrics::record_adapter_error(provider, "historic_bar_data_request");
            match previous {
                Some(previous) => {
                    session.historic.insert(&request.request_id, &previous);
                }
                None => {
                    session.historic.take(&request.request_id);
                }
            }
            return Err(GatewayError::adapter(provider, &e));
        }

        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop every running adapter, clear all registries and drop every
    /// session.
    pub async fn stop_all(&self) {
        for handle in self.sessions() {
            let mut session = handle.lock().await;
            session.clear();
            if let Some(adapter) = session.adapter.take() {
                info!(provider = %session.provider, "Stopping provider session");
                if let Err(e) = adapter.stop().await {
                    warn!(provider = %session.provider, error = %e, "Provider adapter failed to stop cleanly");
                }
            }
            session.report_gauges();
            let provider = session.provider.clone();
            self.reap(&provider, &handle);
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Login count, or `None` when the provider has no login entry.
    pub async fn login_count(&self, provider: &str) -> Option<usize> {
        let handle = self.session(provider)?;
        let session = handle.lock().await;
        (!session.logins.is_empty()).then(|| session.logins.count())
    }

    /// Tick subscription references for a security.
    pub async fn subscriber_count(&self, provider: &str, security: &Security) -> usize {
        match self.session(provider) {
            Some(handle) => handle.lock().await.subscriptions.count(security),
            None => 0,
        }
    }

    /// Live bar references held under one request ID.
    pub async fn live_bar_references(&self, provider: &str, request_id: &str) -> usize {
        match self.session(provider) {
            Some(handle) => handle
                .lock()
                .await
                .live_bars
                .get(request_id)
                .map_or(0, |entry| entry.count()),
            None => 0,
        }
    }

    /// Strategy waiting on a historic request, if it is still in flight.
    pub async fn historic_request(&self, provider: &str, request_id: &str) -> Option<StrategyId> {
        let handle = self.session(provider)?;
        let session = handle.lock().await;
        session.historic.get(request_id).cloned()
    }

    /// Live aggregators for a provider.
    pub async fn aggregator_count(&self, provider: &str) -> usize {
        match self.session(provider) {
            Some(handle) => handle.lock().await.aggregators.len(),
            None => 0,
        }
    }

    /// Whether an adapter is running for the provider.
    pub async fn adapter_active(&self, provider: &str) -> bool {
        match self.session(provider) {
            Some(handle) => handle.lock().await.adapter.is_some(),
            None => false,
        }
    }

    /// Snapshot of every provider with at least one login.
    pub async fn snapshot(&self) -> Vec<ProviderSnapshot> {
        let mut snapshots = Vec::new();
        for handle in self.sessions() {
            let session = handle.lock().await;
            if !session.is_idle() {
                snapshots.push(session.snapshot());
            }
        }
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }

    // =========================================================================
    // Session Lookup
    // =========================================================================

    /// Session of an existing provider.
    #[must_use]
    pub fn session(&self, provider: &str) -> Option<SessionHandle> {
        self.sessions.read().get(provider).cloned()
    }

    /// Every known provider session.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions.read().values().cloned().collect()
    }

    /// Whether the factory can build an adapter for `provider`.
    #[must_use]
    pub fn supports(&self, provider: &str) -> bool {
        self.factory.supports(provider)
    }

    /// Publisher for routed events.
    #[must_use]
    pub fn publisher(&self) -> Arc<dyn OutboundPublisher> {
        Arc::clone(&self.publisher)
    }

    /// Lock the provider's current session, creating it when absent.
    ///
    /// Retries when the locked session was reaped while this call waited.
    async fn lock_or_create(
        &self,
        provider: &str,
    ) -> (SessionHandle, OwnedMutexGuard<ProviderSession>) {
        loop {
            let handle = self.session(provider).unwrap_or_else(|| {
                let mut sessions = self.sessions.write();
                let handle = sessions
                    .entry(provider.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(ProviderSession::new(provider))));
                Arc::clone(handle)
            });
            let guard = Arc::clone(&handle).lock_owned().await;
            if self.is_current(provider, &handle) {
                return (handle, guard);
            }
        }
    }

    fn is_current(&self, provider: &str, handle: &SessionHandle) -> bool {
        self.sessions
            .read()
            .get(provider)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    /// Drop an idle session from the map. Callers hold its lock.
    fn reap(&self, provider: &str, handle: &SessionHandle) {
        let mut sessions = self.sessions.write();
        if sessions
            .get(provider)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            sessions.remove(provider);
            debug!(provider = %provider, "Provider session removed");
        }
    }

    fn logged_in_session(&self, provider: &str) -> Result<SessionHandle, GatewayError> {
        self.session(provider)
            .ok_or_else(|| GatewayError::NotLoggedIn {
                provider: provider.to_string(),
            })
    }

    fn publish(&self, event: OutboundEvent) {
        metrics::record_event_routed(event.kind());
        self.publisher.publish(event);
    }
}

impl std::fmt::Debug for SessionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMultiplexer")
            .field("providers", &self.sessions.read().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Locked Operations
// =============================================================================

async fn subscribe_locked(
    session: &mut ProviderSession,
    security: &Security,
    strategy: &StrategyId,
) -> Result<(), GatewayError> {
    let adapter = session.require_adapter()?;

    let transition = session.subscriptions.add(security, strategy);
    if transition.is_first() {
        debug!(provider = %session.provider, security = %security, "Opening tick subscription");
        if let Err(e) = adapter.subscribe_tick_data(security).await {
            metrics::record_adapter_error(&session.provider, "subscribe_tick_data");
            session.subscriptions.remove(security, strategy);
            return Err(GatewayError::adapter(&session.provider, &e));
        }
    }

    session.report_gauges();
    Ok(())
}

async fn unsubscribe_locked(
    session: &mut ProviderSession,
    security: &Security,
    strategy: &StrategyId,
) -> Result<(), GatewayError> {
    let transition = session.subscriptions.remove(security, strategy);
    session.report_gauges();

    match transition {
        RefTransition::NotFound => Err(unknown(&session.provider, "subscription", &security.symbol)),
        RefTransition::Released => {
            debug!(provider = %session.provider, security = %security, "Closing tick subscription");
            let Some(adapter) = session.adapter.clone() else {
                return Ok(());
            };
            adapter.unsubscribe_tick_data(security).await.map_err(|e| {
                metrics::record_adapter_error(&session.provider, "unsubscribe_tick_data");
                GatewayError::adapter(&session.provider, &e)
            })
        }
        _ => Ok(()),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn unknown(provider: &str, registry: &'static str, key: &str) -> GatewayError {
    GatewayError::UnknownRouting {
        provider: provider.to_string(),
        registry,
        key: key.to_string(),
    }
}

fn bar_spec(command: &GatewayCommand) -> Result<BarSpecification, GatewayError> {
    command
        .bar_specification()
        .ok_or_else(|| GatewayError::InvalidRequest("missing bar specification".to_string()))
}

fn rejection_for(envelope: &CommandEnvelope, error: &GatewayError) -> Rejection {
    let command = &envelope.command;
    let recipient = match command {
        GatewayCommand::Login { .. } | GatewayCommand::Logout { .. } => {
            Recipient::App(envelope.app_id.clone())
        }
        _ => Recipient::Strategy(envelope.strategy_id.clone()),
    };

    let (security, request_id) = match command {
        GatewayCommand::Login { .. } | GatewayCommand::Logout { .. } => (None, None),
        GatewayCommand::Subscribe { security, .. } | GatewayCommand::Unsubscribe { security, .. } => {
            (Some(security.clone()), None)
        }
        GatewayCommand::BarSubscribe { security, id, .. }
        | GatewayCommand::BarUnsubscribe { security, id, .. }
        | GatewayCommand::HistoricRequest { security, id, .. } => {
            (Some(security.clone()), Some(id.clone()))
        }
    };

    Rejection::new(recipient, command.provider(), error.to_string())
        .with_correlation(envelope.correlation_id)
        .with_request_id(request_id)
        .with_security(security)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_rejections_go_to_the_app() {
        let envelope = CommandEnvelope::new(
            "A1",
            "S1",
            GatewayCommand::Login {
                provider: "P".to_string(),
            },
        );
        let error = GatewayError::ConnectionFailure {
            provider: "P".to_string(),
            reason: "refused".to_string(),
        };

        let rejection = rejection_for(&envelope, &error);

        assert_eq!(rejection.recipient, Recipient::App("A1".to_string()));
        assert_eq!(rejection.correlation_id, Some(envelope.correlation_id));
        assert!(rejection.security.is_none());
    }

    #[test]
    fn subscription_rejections_go_to_the_strategy() {
        let envelope = CommandEnvelope::new(
            "A1",
            "S1",
            GatewayCommand::Subscribe {
                provider: "P".to_string(),
                security: Security::new("AAPL"),
            },
        );
        let error = GatewayError::NotLoggedIn {
            provider: "P".to_string(),
        };

        let rejection = rejection_for(&envelope, &error);

        assert_eq!(rejection.recipient, Recipient::Strategy("S1".to_string()));
        assert_eq!(rejection.security, Some(Security::new("AAPL")));
        assert_eq!(rejection.reason, "not logged in to P");
    }
}
