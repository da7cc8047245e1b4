//! Provider Port (Driven Port)
//!
//! Uniform interface over one external market data session. Concrete
//! vendor protocols live behind this trait; the multiplexer only ever sees
//! these capabilities.

use std::sync::Arc;

use async_trait::async_trait;

use super::EventSink;
use crate::domain::market::{HistoricBarRequest, ProviderName, Security};

/// Provider adapter error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// No adapter is registered under this name.
    #[error("Unknown provider: {provider}")]
    UnknownProvider {
        /// The unknown provider name.
        provider: ProviderName,
    },

    /// The session could not be opened.
    #[error("Provider connection error: {message}")]
    ConnectionFailed {
        /// Error details.
        message: String,
    },

    /// The adapter is not started.
    #[error("Provider session is not started")]
    NotStarted,

    /// The provider refused a tick subscription.
    #[error("Subscription rejected for {symbol}: {message}")]
    SubscriptionRejected {
        /// Security symbol.
        symbol: String,
        /// Error details.
        message: String,
    },

    /// The provider refused a historic request.
    #[error("Historic request {request_id} rejected: {message}")]
    RequestRejected {
        /// Historic request ID.
        request_id: String,
        /// Error details.
        message: String,
    },
}

/// Port for one provider session.
///
/// Commands are fire-and-forget: a successful return means the command was
/// issued, and the outcome arrives later as a `ProviderEvent` on the sink
/// the adapter was created with.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name this adapter serves.
    fn provider(&self) -> &str;

    /// Open the session.
    async fn start(&self) -> Result<(), ProviderError>;

    /// Close the session.
    async fn stop(&self) -> Result<(), ProviderError>;

    /// Whether the session is logged on.
    fn is_connected(&self) -> bool;

    /// Start streaming ticks for a security.
    async fn subscribe_tick_data(&self, security: &Security) -> Result<(), ProviderError>;

    /// Stop streaming ticks for a security.
    async fn unsubscribe_tick_data(&self, security: &Security) -> Result<(), ProviderError>;

    /// Request historic bars; the response arrives as `HistoricBarData`.
    async fn historic_bar_data_request(
        &self,
        request: &HistoricBarRequest,
    ) -> Result<(), ProviderError>;
}

/// Port for constructing adapters on first login.
pub trait ProviderFactory: Send + Sync {
    /// Whether an adapter can be built for `provider`.
    fn supports(&self, provider: &str) -> bool;

    /// Build an adapter for `provider` that publishes into `sink`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UnknownProvider` if no adapter is available
    /// under that name.
    fn create(
        &self,
        provider: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError>;
}
