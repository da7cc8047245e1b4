//! Client Commands
//!
//! Inbound commands as they arrive over the transport. Each command names
//! the provider it targets; the envelope carries who sent it and a
//! correlation ID echoed on any rejection.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market::{
    AppId, BarFormat, BarPriceType, BarRequestId, BarSpecification, HistoricBarRequest,
    HistoricRequestId, ProviderName, Security, StrategyId,
};

/// A command from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayCommand {
    /// Hold the provider session open.
    Login {
        /// Target provider.
        provider: ProviderName,
    },
    /// Release one login.
    Logout {
        /// Target provider.
        provider: ProviderName,
    },
    /// Stream ticks for a security.
    Subscribe {
        /// Target provider.
        provider: ProviderName,
        /// Security to stream.
        security: Security,
    },
    /// Release one tick subscription.
    Unsubscribe {
        /// Target provider.
        provider: ProviderName,
        /// Security to release.
        security: Security,
    },
    /// Stream live bars for a security.
    BarSubscribe {
        /// Target provider.
        provider: ProviderName,
        /// Security to aggregate.
        security: Security,
        /// Client-chosen bar request ID.
        id: BarRequestId,
        /// Slicing policy.
        format: BarFormat,
        /// Tick side sampled.
        price_type: BarPriceType,
        /// Seconds, ticks or pips depending on `format`.
        length: u32,
        /// Price of one pip.
        #[serde(default)]
        pip_size: Decimal,
    },
    /// Release one live bar subscription.
    BarUnsubscribe {
        /// Target provider.
        provider: ProviderName,
        /// Security being aggregated.
        security: Security,
        /// Bar request ID used on subscribe.
        id: BarRequestId,
        /// Slicing policy.
        format: BarFormat,
        /// Tick side sampled.
        price_type: BarPriceType,
        /// Seconds, ticks or pips depending on `format`.
        length: u32,
        /// Price of one pip.
        #[serde(default)]
        pip_size: Decimal,
    },
    /// Pull historic bars.
    HistoricRequest {
        /// Target provider.
        provider: ProviderName,
        /// Security to fetch.
        security: Security,
        /// Client-chosen request ID.
        id: HistoricRequestId,
        /// Tick side the bars are built from.
        bar_type: BarPriceType,
        /// Range start.
        start: DateTime<Utc>,
        /// Range end.
        end: DateTime<Utc>,
        /// Bar interval in seconds.
        interval: u32,
    },
}

impl GatewayCommand {
    /// Provider the command targets.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Login { provider }
            | Self::Logout { provider }
            | Self::Subscribe { provider, .. }
            | Self::Unsubscribe { provider, .. }
            | Self::BarSubscribe { provider, .. }
            | Self::BarUnsubscribe { provider, .. }
            | Self::HistoricRequest { provider, .. } => provider,
        }
    }

    /// Command kind as a static label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Logout { .. } => "logout",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::BarSubscribe { .. } => "bar_subscribe",
            Self::BarUnsubscribe { .. } => "bar_unsubscribe",
            Self::HistoricRequest { .. } => "historic_request",
        }
    }

    /// Bar specification carried by a bar command.
    #[must_use]
    pub fn bar_specification(&self) -> Option<BarSpecification> {
        match self {
            Self::BarSubscribe {
                format,
                price_type,
                length,
                pip_size,
                ..
            }
            | Self::BarUnsubscribe {
                format,
                price_type,
                length,
                pip_size,
                ..
            } => Some(BarSpecification::new(*format, *price_type, *length, *pip_size)),
            _ => None,
        }
    }

    /// Historic request carried by a `HistoricRequest` command.
    #[must_use]
    pub fn historic_request(&self) -> Option<HistoricBarRequest> {
        match self {
            Self::HistoricRequest {
                security,
                id,
                bar_type,
                start,
                end,
                interval,
                ..
            } => Some(HistoricBarRequest {
                request_id: id.clone(),
                security: security.clone(),
                bar_type: *bar_type,
                start: *start,
                end: *end,
                interval: *interval,
            }),
            _ => None,
        }
    }
}

/// A command with its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Correlation ID echoed on rejections.
    #[serde(default = "Uuid::new_v4")]
    pub correlation_id: Uuid,
    /// Client process that sent the command.
    pub app_id: AppId,
    /// Subscriber the command acts for.
    pub strategy_id: StrategyId,
    /// The command.
    pub command: GatewayCommand,
}

impl CommandEnvelope {
    /// Wrap a command with a fresh correlation ID.
    #[must_use]
    pub fn new(
        app_id: impl Into<AppId>,
        strategy_id: impl Into<StrategyId>,
        command: GatewayCommand,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            app_id: app_id.into(),
            strategy_id: strategy_id.into(),
            command,
        }
    }
}
