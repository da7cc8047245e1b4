//! Mock Provider
//!
//! Recording adapter for tests. Counts every call, remembers what it was
//! asked for, and fails on demand. Failure switches live on a
//! [`MockBehavior`] shared by every adapter a [`MockProviderFactory`] builds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{
    EventSink, ProviderAdapter, ProviderError, ProviderEvent, ProviderFactory,
};
use crate::domain::market::{HistoricBarRequest, ProviderName, Security};

/// Failure switches and session behavior of mock adapters.
#[derive(Debug)]
pub struct MockBehavior {
    /// Fail `start` with `ConnectionFailed`.
    pub fail_start: AtomicBool,
    /// Fail `subscribe_tick_data` with `SubscriptionRejected`.
    pub fail_subscribe: AtomicBool,
    /// Fail `historic_bar_data_request` with `RequestRejected`.
    pub fail_historic: AtomicBool,
    /// Publish `Logon` when started and `Logout` when stopped.
    pub emit_session_events: AtomicBool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            fail_start: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_historic: AtomicBool::new(false),
            emit_session_events: AtomicBool::new(true),
        }
    }
}

impl MockBehavior {
    fn is(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

/// Recording `ProviderAdapter`.
pub struct MockProvider {
    name: ProviderName,
    sink: Arc<dyn EventSink>,
    behavior: Arc<MockBehavior>,
    connected: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    historic_requests: Mutex<Vec<HistoricBarRequest>>,
    subscribed: Mutex<Vec<Security>>,
}

impl MockProvider {
    /// Create a stopped adapter with default behavior.
    #[must_use]
    pub fn new(name: impl Into<ProviderName>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_behavior(name, sink, Arc::new(MockBehavior::default()))
    }

    /// Create a stopped adapter with shared behavior.
    #[must_use]
    pub fn with_behavior(
        name: impl Into<ProviderName>,
        sink: Arc<dyn EventSink>,
        behavior: Arc<MockBehavior>,
    ) -> Self {
        Self {
            name: name.into(),
            sink,
            behavior,
            connected: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
            historic_requests: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
        }
    }

    /// Publish an event as if it came from the provider.
    pub fn emit(&self, event: ProviderEvent) {
        self.sink.publish(&self.name, event);
    }

    /// Calls to `start`.
    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Calls to `stop`.
    #[must_use]
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Calls to `subscribe_tick_data`.
    #[must_use]
    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Calls to `unsubscribe_tick_data`.
    #[must_use]
    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Securities with an open upstream subscription.
    #[must_use]
    pub fn subscribed(&self) -> Vec<Security> {
        self.subscribed.lock().clone()
    }

    /// Historic requests received, in order.
    #[must_use]
    pub fn historic_requests(&self) -> Vec<HistoricBarRequest> {
        self.historic_requests.lock().clone()
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("starts", &self.starts())
            .field("stops", &self.stops())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if MockBehavior::is(&self.behavior.fail_start) {
            return Err(ProviderError::ConnectionFailed {
                message: "connection refused".to_string(),
            });
        }

        self.connected.store(true, Ordering::SeqCst);
        if MockBehavior::is(&self.behavior.emit_session_events) {
            self.emit(ProviderEvent::Logon);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.subscribed.lock().clear();
        if MockBehavior::is(&self.behavior.emit_session_events) {
            self.emit(ProviderEvent::Logout);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe_tick_data(&self, security: &Security) -> Result<(), ProviderError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if MockBehavior::is(&self.behavior.fail_subscribe) {
            return Err(ProviderError::SubscriptionRejected {
                symbol: security.symbol.clone(),
                message: "not entitled".to_string(),
            });
        }

        self.subscribed.lock().push(security.clone());
        Ok(())
    }

    async fn unsubscribe_tick_data(&self, security: &Security) -> Result<(), ProviderError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.subscribed.lock().retain(|s| s != security);
        Ok(())
    }

    async fn historic_bar_data_request(
        &self,
        request: &HistoricBarRequest,
    ) -> Result<(), ProviderError> {
        if MockBehavior::is(&self.behavior.fail_historic) {
            return Err(ProviderError::RequestRejected {
                request_id: request.request_id.clone(),
                message: "no data".to_string(),
            });
        }

        self.historic_requests.lock().push(request.clone());
        Ok(())
    }
}

/// Factory that builds `MockProvider`s for any name and keeps them.
#[derive(Debug, Default)]
pub struct MockProviderFactory {
    behavior: Arc<MockBehavior>,
    created: Mutex<Vec<Arc<MockProvider>>>,
    refused: Mutex<Vec<ProviderName>>,
}

impl MockProviderFactory {
    /// Create a factory with default behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior shared by every adapter this factory builds.
    #[must_use]
    pub fn behavior(&self) -> &MockBehavior {
        &self.behavior
    }

    /// Refuse to build adapters for `provider`.
    pub fn refuse(&self, provider: impl Into<ProviderName>) {
        self.refused.lock().push(provider.into());
    }

    /// Number of adapters built.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Most recently built adapter for `provider`.
    #[must_use]
    pub fn latest(&self, provider: &str) -> Option<Arc<MockProvider>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|adapter| adapter.name == provider)
            .cloned()
    }
}

impl ProviderFactory for MockProviderFactory {
    fn supports(&self, provider: &str) -> bool {
        !self.refused.lock().iter().any(|name| name == provider)
    }

    fn create(
        &self,
        provider: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        if !self.supports(provider) {
            return Err(ProviderError::UnknownProvider {
                provider: provider.to_string(),
            });
        }

        let adapter = Arc::new(MockProvider::with_behavior(
            provider,
            sink,
            Arc::clone(&self.behavior),
        ));
        self.created.lock().push(Arc::clone(&adapter));
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::RecordingEventSink;

    #[tokio::test]
    async fn start_emits_logon() {
        let sink = Arc::new(RecordingEventSink::new());
        let adapter = MockProvider::new("MOCK", Arc::clone(&sink) as Arc<dyn EventSink>);

        adapter.start().await.unwrap();

        assert!(adapter.is_connected());
        assert_eq!(adapter.starts(), 1);
        assert_eq!(sink.drain()[0].event, ProviderEvent::Logon);
    }

    #[tokio::test]
    async fn shared_behavior_switches_failures() {
        let factory = MockProviderFactory::new();
        let adapter = factory
            .create("MOCK", Arc::new(RecordingEventSink::new()))
            .unwrap();

        factory.behavior().fail_subscribe.store(true, Ordering::SeqCst);
        let result = adapter.subscribe_tick_data(&Security::new("AAPL")).await;

        assert!(matches!(
            result,
            Err(ProviderError::SubscriptionRejected { .. })
        ));
        assert_eq!(factory.latest("MOCK").unwrap().subscribes(), 1);
    }

    #[test]
    fn refused_provider_is_unknown() {
        let factory = MockProviderFactory::new();
        factory.refuse("DOWN");
        assert!(!factory.supports("DOWN"));
        assert!(factory.supports("UP"));

        let result = factory.create("DOWN", Arc::new(RecordingEventSink::new()));

        assert!(matches!(result, Err(ProviderError::UnknownProvider { .. })));
        assert_eq!(factory.created_count(), 0);
    }
}
