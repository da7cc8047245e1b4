//! Market Data Types
//!
//! Core domain types for market data: securities, ticks, bars, and the bar
//! specifications that drive live aggregation. These types are
//! transport-agnostic and represent the canonical internal representation
//! shared by the multiplexer, the aggregators, and the provider adapters.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Name of an external market data provider (one physical session each).
pub type ProviderName = String;

/// Identifier of a client process that logged in to a provider.
pub type AppId = String;

/// Identifier of an individual subscriber, possibly finer-grained than `AppId`.
pub type StrategyId = String;

/// Client-chosen identifier of a live bar subscription.
pub type BarRequestId = String;

/// Client-chosen identifier of a historic bar request.
pub type HistoricRequestId = String;

// =============================================================================
// Security
// =============================================================================

/// A tradable instrument.
///
/// Two securities are the same key when their symbols match; ISIN and
/// security type are carried along for adapters that need them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    /// Ticker symbol.
    pub symbol: String,
    /// ISIN, when known.
    #[serde(default)]
    pub isin: String,
    /// Provider-specific security type (e.g. "STK", "FUT").
    #[serde(default)]
    pub security_type: String,
}

impl Security {
    /// Create a security from a symbol with empty ISIN and type.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            isin: String::new(),
            security_type: String::new(),
        }
    }

    /// Set the ISIN.
    #[must_use]
    pub fn with_isin(mut self, isin: impl Into<String>) -> Self {
        self.isin = isin.into();
        self
    }

    /// Set the security type.
    #[must_use]
    pub fn with_security_type(mut self, security_type: impl Into<String>) -> Self {
        self.security_type = security_type.into();
        self
    }
}

impl PartialEq for Security {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}

impl Eq for Security {}

impl Hash for Security {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
    }
}

impl std::fmt::Display for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.symbol)
    }
}

// =============================================================================
// Tick
// =============================================================================

/// A single market data update from a provider.
///
/// Quote ticks carry bid and/or ask; trade ticks carry `last` and
/// `last_size`. A provider may send both in one update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Provider that produced the tick.
    pub provider: ProviderName,
    /// Security the tick belongs to.
    pub security: Security,
    /// Provider timestamp.
    pub timestamp: DateTime<Utc>,
    /// Best bid price.
    pub bid: Option<Decimal>,
    /// Best bid size.
    pub bid_size: Decimal,
    /// Best ask price.
    pub ask: Option<Decimal>,
    /// Best ask size.
    pub ask_size: Decimal,
    /// Last trade price.
    pub last: Option<Decimal>,
    /// Last trade size.
    pub last_size: Decimal,
}

impl Tick {
    /// Create a trade tick.
    #[must_use]
    pub fn trade(
        provider: impl Into<ProviderName>,
        security: Security,
        price: Decimal,
        size: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: provider.into(),
            security,
            timestamp,
            bid: None,
            bid_size: Decimal::ZERO,
            ask: None,
            ask_size: Decimal::ZERO,
            last: Some(price),
            last_size: size,
        }
    }

    /// Create a quote tick.
    #[must_use]
    pub fn quote(
        provider: impl Into<ProviderName>,
        security: Security,
        bid: Decimal,
        ask: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: provider.into(),
            security,
            timestamp,
            bid: Some(bid),
            bid_size: Decimal::ZERO,
            ask: Some(ask),
            ask_size: Decimal::ZERO,
            last: None,
            last_size: Decimal::ZERO,
        }
    }

    /// Whether this tick reports a trade.
    #[must_use]
    pub const fn is_trade(&self) -> bool {
        self.last.is_some()
    }

    /// Traded size carried by this tick (zero for pure quotes).
    #[must_use]
    pub fn traded_volume(&self) -> Decimal {
        if self.is_trade() {
            self.last_size
        } else {
            Decimal::ZERO
        }
    }
}

// =============================================================================
// Bar Specification
// =============================================================================

/// Slicing policy for live bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarFormat {
    /// Fixed windows of `length` seconds aligned to the epoch.
    Time,
    /// A bar closes after exactly `length` ticks.
    EqualEngineered,
    /// A bar closes once price moves `length * pip_size` from the open.
    Displacement,
    /// A bar closes after `length` ticks or `length` seconds, whichever first.
    UnequalEngineered,
}

impl BarFormat {
    /// Get the format name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "TIME",
            Self::EqualEngineered => "EQUAL_ENGINEERED",
            Self::Displacement => "DISPLACEMENT",
            Self::UnequalEngineered => "UNEQUAL_ENGINEERED",
        }
    }
}

/// Which side of the tick feeds the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarPriceType {
    /// Trade price; quote-only ticks are ignored.
    Last,
    /// Best bid.
    Bid,
    /// Best ask.
    Ask,
    /// Midpoint of bid and ask.
    Mean,
}

impl BarPriceType {
    /// Extract this price type's sample from a tick, if the tick carries one.
    #[must_use]
    pub fn sample(&self, tick: &Tick) -> Option<Decimal> {
        match self {
            Self::Last => tick.last,
            Self::Bid => tick.bid,
            Self::Ask => tick.ask,
            Self::Mean => match (tick.bid, tick.ask) {
                (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
                _ => None,
            },
        }
    }

    /// Get the price type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Last => "LAST",
            Self::Bid => "BID",
            Self::Ask => "ASK",
            Self::Mean => "MEAN",
        }
    }
}

/// Parameters of a live bar stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarSpecification {
    /// Slicing policy.
    pub format: BarFormat,
    /// Tick side used as the bar sample.
    pub price_type: BarPriceType,
    /// Seconds, ticks, or pips depending on `format`.
    pub length: u32,
    /// Price of one pip; only meaningful for `Displacement`.
    pub pip_size: Decimal,
}

impl BarSpecification {
    /// Create a new bar specification.
    #[must_use]
    pub const fn new(
        format: BarFormat,
        price_type: BarPriceType,
        length: u32,
        pip_size: Decimal,
    ) -> Self {
        Self {
            format,
            price_type,
            length,
            pip_size,
        }
    }

    /// Check that the specification can drive an aggregator.
    ///
    /// # Errors
    ///
    /// Returns `SpecError` when `length` is zero, or when a displacement
    /// specification has a non-positive pip size.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.length == 0 {
            return Err(SpecError::ZeroLength);
        }
        if self.format == BarFormat::Displacement && self.pip_size <= Decimal::ZERO {
            return Err(SpecError::NonPositivePipSize(self.pip_size));
        }
        Ok(())
    }

    /// Price distance that closes a displacement bar.
    #[must_use]
    pub fn displacement_threshold(&self) -> Decimal {
        Decimal::from(self.length) * self.pip_size
    }
}

impl std::fmt::Display for BarSpecification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.format.as_str(),
            self.price_type.as_str(),
            self.length,
            self.pip_size
        )
    }
}

/// Invalid bar specification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    /// Length must be at least one.
    #[error("bar length must be greater than zero")]
    ZeroLength,
    /// Displacement bars need a positive pip size.
    #[error("displacement bars require a positive pip size, got {0}")]
    NonPositivePipSize(Decimal),
}

// =============================================================================
// Bar
// =============================================================================

/// An OHLCV aggregate over a slice of ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Opening price.
    pub open: Decimal,
    /// Highest price.
    pub high: Decimal,
    /// Lowest price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: Decimal,
    /// Security the bar describes.
    pub security: Security,
    /// Provider the underlying ticks came from.
    pub provider: ProviderName,
    /// Live bar or historic request the bar is delivered for.
    pub request_id: Option<String>,
    /// Close time of the slice.
    pub timestamp: DateTime<Utc>,
    /// True when no ticks arrived in the slice and the previous close was
    /// carried forward.
    pub is_bar_copied: bool,
}

impl Bar {
    /// Return a copy stamped with the given request ID.
    #[must_use]
    pub fn for_request(&self, request_id: &str) -> Self {
        Self {
            request_id: Some(request_id.to_string()),
            ..self.clone()
        }
    }
}

// =============================================================================
// Historic Requests
// =============================================================================

/// A request for historic bars from a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricBarRequest {
    /// Client-chosen request ID echoed in the response.
    pub request_id: HistoricRequestId,
    /// Security to fetch bars for.
    pub security: Security,
    /// Tick side the bars are built from.
    pub bar_type: BarPriceType,
    /// Start of the range (inclusive).
    pub start: DateTime<Utc>,
    /// End of the range (inclusive).
    pub end: DateTime<Utc>,
    /// Bar interval in seconds.
    pub interval: u32,
}

impl HistoricBarRequest {
    /// Check that the requested range is well formed.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the interval is zero or
    /// the range is inverted.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval == 0 {
            return Err("historic interval must be greater than zero".to_string());
        }
        if self.start > self.end {
            return Err(format!(
                "historic range start {} is after end {}",
                self.start, self.end
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    #[test]
    fn security_equality_uses_symbol_only() {
        let a = Security::new("AAPL").with_isin("US0378331005");
        let b = Security::new("AAPL").with_security_type("STK");

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&Security::new("MSFT")));
    }

    #[test]
    fn sample_by_price_type() {
        let quote = Tick::quote("SIM", Security::new("AAPL"), dec!(100.00), dec!(100.10), ts());
        let trade = Tick::trade("SIM", Security::new("AAPL"), dec!(100.05), dec!(25), ts());

        assert_eq!(BarPriceType::Bid.sample(&quote), Some(dec!(100.00)));
        assert_eq!(BarPriceType::Ask.sample(&quote), Some(dec!(100.10)));
        assert_eq!(BarPriceType::Mean.sample(&quote), Some(dec!(100.05)));
        assert_eq!(BarPriceType::Last.sample(&quote), None);

        assert_eq!(BarPriceType::Last.sample(&trade), Some(dec!(100.05)));
        assert_eq!(BarPriceType::Bid.sample(&trade), None);
        assert_eq!(BarPriceType::Mean.sample(&trade), None);
    }

    #[test]
    fn mean_requires_both_sides() {
        let mut tick = Tick::quote("SIM", Security::new("AAPL"), dec!(10), dec!(11), ts());
        tick.ask = None;
        assert_eq!(BarPriceType::Mean.sample(&tick), None);
    }

    #[test]
    fn traded_volume_ignores_quotes() {
        let quote = Tick::quote("SIM", Security::new("AAPL"), dec!(1), dec!(2), ts());
        let trade = Tick::trade("SIM", Security::new("AAPL"), dec!(1), dec!(300), ts());

        assert_eq!(quote.traded_volume(), Decimal::ZERO);
        assert_eq!(trade.traded_volume(), dec!(300));
    }

    #[test]
    fn spec_validation() {
        let ok = BarSpecification::new(BarFormat::Time, BarPriceType::Last, 60, Decimal::ZERO);
        assert!(ok.validate().is_ok());

        let zero = BarSpecification::new(BarFormat::Time, BarPriceType::Last, 0, Decimal::ZERO);
        assert_eq!(zero.validate(), Err(SpecError::ZeroLength));

        let no_pip =
            BarSpecification::new(BarFormat::Displacement, BarPriceType::Bid, 10, Decimal::ZERO);
        assert!(matches!(
            no_pip.validate(),
            Err(SpecError::NonPositivePipSize(_))
        ));
    }

    #[test]
    fn displacement_threshold_is_length_times_pip() {
        let spec =
            BarSpecification::new(BarFormat::Displacement, BarPriceType::Last, 5, dec!(0.0001));
        assert_eq!(spec.displacement_threshold(), dec!(0.0005));
    }

    #[test]
    fn bar_format_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&BarFormat::UnequalEngineered).unwrap(),
            "\"UNEQUAL_ENGINEERED\""
        );
        let parsed: BarPriceType = serde_json::from_str("\"MEAN\"").unwrap();
        assert_eq!(parsed, BarPriceType::Mean);
    }

    #[test]
    fn historic_request_validation() {
        let mut request = HistoricBarRequest {
            request_id: "5000".to_string(),
            security: Security::new("AAPL"),
            bar_type: BarPriceType::Last,
            start: ts(),
            end: ts() + chrono::Duration::hours(1),
            interval: 60,
        };
        assert!(request.validate().is_ok());

        request.interval = 0;
        assert!(request.validate().is_err());

        request.interval = 60;
        request.end = ts() - chrono::Duration::hours(1);
        assert!(request.validate().is_err());
    }
}
