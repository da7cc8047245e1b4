//! Outbound Events
//!
//! Events the gateway delivers back to clients. Every event names the
//! recipient it was routed to; the transport decides how to reach it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::{AppId, Bar, HistoricRequestId, ProviderName, Security, StrategyId, Tick};

/// An event routed to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A tick for a subscribed security.
    Tick {
        /// Subscriber the tick is routed to.
        strategy_id: StrategyId,
        /// The tick.
        tick: Tick,
    },
    /// A completed live bar, stamped with its request ID.
    Bar {
        /// Subscriber the bar is routed to.
        strategy_id: StrategyId,
        /// The bar.
        bar: Bar,
    },
    /// The response to a historic request.
    HistoricBarData {
        /// Strategy that made the request.
        strategy_id: StrategyId,
        /// Request ID echoed from the request.
        request_id: HistoricRequestId,
        /// Bars returned by the provider.
        bars: Vec<Bar>,
    },
    /// The provider session is up for this app.
    LogonAck {
        /// App that logged in.
        app_id: AppId,
        /// Provider logged in to.
        provider: ProviderName,
    },
    /// The app's login was released.
    LogoutAck {
        /// App that logged out.
        app_id: AppId,
        /// Provider logged out of.
        provider: ProviderName,
    },
    /// A command or provider request failed.
    Rejection(Rejection),
}

impl OutboundEvent {
    /// Event kind as a static label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tick { .. } => "tick",
            Self::Bar { .. } => "bar",
            Self::HistoricBarData { .. } => "historic_bar_data",
            Self::LogonAck { .. } => "logon_ack",
            Self::LogoutAck { .. } => "logout_ack",
            Self::Rejection(_) => "rejection",
        }
    }
}

/// Who a rejection is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    /// A logged-in client process.
    App(AppId),
    /// An individual subscriber.
    Strategy(StrategyId),
}

/// A failure forwarded to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Recipient of the rejection.
    pub recipient: Recipient,
    /// Provider the failure relates to.
    pub provider: ProviderName,
    /// Correlation ID of the command that failed, if any.
    pub correlation_id: Option<Uuid>,
    /// Bar or historic request ID the failure relates to, if any.
    pub request_id: Option<String>,
    /// Security the failure relates to, if any.
    pub security: Option<Security>,
    /// Human-readable reason.
    pub reason: String,
}

impl Rejection {
    /// Create a rejection with no correlation, request or security.
    #[must_use]
    pub fn new(recipient: Recipient, provider: impl Into<ProviderName>, reason: impl Into<String>) -> Self {
        Self {
            recipient,
            provider: provider.into(),
            correlation_id: None,
            request_id: None,
            security: None,
            reason: reason.into(),
        }
    }

    /// Attach the correlation ID of the originating command.
    #[must_use]
    pub const fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Attach a request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Attach a security.
    #[must_use]
    pub fn with_security(mut self, security: Option<Security>) -> Self {
        self.security = security;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = OutboundEvent::LogonAck {
            app_id: "A1".to_string(),
            provider: "SIMULATED".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "logon_ack");
        assert_eq!(json["app_id"], "A1");
        assert_eq!(event.kind(), "logon_ack");
    }

    #[test]
    fn rejection_round_trips() {
        let correlation = Uuid::new_v4();
        let rejection = Rejection::new(Recipient::Strategy("S1".to_string()), "SIM", "no such symbol")
            .with_correlation(correlation)
            .with_security(Some(Security::new("ZZZZ")));
        let event = OutboundEvent::Rejection(rejection);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: OutboundEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, event);
        assert!(json.contains("\"type\":\"rejection\""));
        assert!(json.contains("\"kind\":\"strategy\""));
    }
}
