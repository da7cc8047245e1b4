//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.
//! Unparseable values fall back to the default; zero capacities and
//! intervals are rejected.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Provider event ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Ticks buffered between adapters and dispatch before the oldest drop.
    pub tick_queue_capacity: usize,
    /// Clock period driving time-based bars.
    pub clock_interval: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            tick_queue_capacity: 65_536,
            clock_interval: Duration::from_millis(250),
        }
    }
}

/// Outbound channel settings.
#[derive(Debug, Clone)]
pub struct OutboundSettings {
    /// Capacity of the tick channel.
    pub ticks_capacity: usize,
    /// Capacity of the live bar channel.
    pub bars_capacity: usize,
    /// Capacity of the historic response channel.
    pub historic_capacity: usize,
    /// Capacity of the session event channel.
    pub session_capacity: usize,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            ticks_capacity: 50_000,
            bars_capacity: 10_000,
            historic_capacity: 1_000,
            session_capacity: 1_000,
        }
    }
}

/// Client transport settings.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Read commands from stdin and write events to stdout.
    pub stdio: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self { stdio: true }
    }
}

/// Simulated provider settings.
#[derive(Debug, Clone)]
pub struct SimulatedSettings {
    /// Period between generated ticks per security.
    pub tick_interval: Duration,
    /// Starting mid price of every security.
    pub initial_price: Decimal,
    /// Largest price move per tick.
    pub price_step: Decimal,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            initial_price: Decimal::ONE_HUNDRED,
            price_step: Decimal::new(5, 2),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Provider event ingestion settings.
    pub ingest: IngestSettings,
    /// Outbound channel settings.
    pub outbound: OutboundSettings,
    /// Client transport settings.
    pub transport: TransportSettings,
    /// Simulated provider settings.
    pub simulated: SimulatedSettings,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity or interval is set to zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a capacity or interval is set to zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            health_port: env.parse("GATEWAY_HEALTH_PORT", server_defaults.health_port),
        };

        let ingest_defaults = IngestSettings::default();
        let ingest = IngestSettings {
            tick_queue_capacity: env.positive(
                "GATEWAY_TICK_QUEUE_CAPACITY",
                ingest_defaults.tick_queue_capacity,
            )?,
            clock_interval: env.millis("GATEWAY_CLOCK_INTERVAL_MS", ingest_defaults.clock_interval)?,
        };

        let outbound_defaults = OutboundSettings::default();
        let outbound = OutboundSettings {
            ticks_capacity: env.positive("GATEWAY_TICKS_CAPACITY", outbound_defaults.ticks_capacity)?,
            bars_capacity: env.positive("GATEWAY_BARS_CAPACITY", outbound_defaults.bars_capacity)?,
            historic_capacity: env.positive(
                "GATEWAY_HISTORIC_CAPACITY",
                outbound_defaults.historic_capacity,
            )?,
            session_capacity: env.positive(
                "GATEWAY_SESSION_CAPACITY",
                outbound_defaults.session_capacity,
            )?,
        };

        let transport = TransportSettings {
            stdio: env.flag("GATEWAY_STDIO_TRANSPORT", TransportSettings::default().stdio),
        };

        let simulated_defaults = SimulatedSettings::default();
        let simulated = SimulatedSettings {
            tick_interval: env.millis(
                "GATEWAY_SIM_TICK_INTERVAL_MS",
                simulated_defaults.tick_interval,
            )?,
            initial_price: env.parse("GATEWAY_SIM_INITIAL_PRICE", simulated_defaults.initial_price),
            price_step: env.parse("GATEWAY_SIM_PRICE_STEP", simulated_defaults.price_step),
        };

        Ok(Self {
            server,
            ingest,
            outbound,
            transport,
            simulated,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be used.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn positive(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            }),
            value => Ok(value),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        match self.parse(key, default_ms) {
            0 => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: "0".to_string(),
            }),
            value => Ok(Duration::from_millis(value)),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        (self.lookup)(key).map_or(default, |v| {
            match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            }
        })
    }
}
