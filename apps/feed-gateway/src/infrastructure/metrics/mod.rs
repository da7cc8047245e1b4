//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Commands**: client commands handled, by kind and outcome
//! - **Ingest**: ticks and control events received, ticks dropped on overflow
//! - **Routing**: events delivered, unknown routing keys, rejections
//! - **Sessions**: active logins and subscriptions per provider
//! - **Latency**: dispatch processing time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "gateway_commands_total",
        "Client commands handled by kind and outcome"
    );
    describe_counter!(
        "gateway_provider_events_total",
        "Events received from provider adapters"
    );
    describe_counter!(
        "gateway_ticks_dropped_total",
        "Ticks dropped by the ingest queue on overflow"
    );
    describe_counter!(
        "gateway_events_routed_total",
        "Outbound events delivered to clients"
    );
    describe_counter!(
        "gateway_bars_emitted_total",
        "Live bars completed by aggregators"
    );
    describe_counter!(
        "gateway_unknown_routing_total",
        "Events or commands whose routing key was not registered"
    );
    describe_counter!(
        "gateway_adapter_errors_total",
        "Provider adapter call failures"
    );
    describe_counter!(
        "gateway_late_ticks_total",
        "Ticks dropped because their time window had already closed"
    );
    describe_counter!(
        "gateway_stale_events_total",
        "Events dropped because their adapter was replaced"
    );

    describe_gauge!(
        "gateway_active_logins",
        "Logins held per provider"
    );
    describe_gauge!(
        "gateway_active_subscriptions",
        "Securities with tick subscriptions per provider"
    );

    describe_histogram!(
        "gateway_dispatch_seconds",
        "Time to route one provider event"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a handled command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Applied.
    Applied,
    /// Rejected back to the client.
    Rejected,
    /// Dropped after logging.
    Dropped,
}

impl CommandOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Dropped => "dropped",
        }
    }
}

/// Record a handled client command.
pub fn record_command(kind: &'static str, outcome: CommandOutcome) {
    counter!(
        "gateway_commands_total",
        "command" => kind,
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record an event received from a provider adapter.
pub fn record_provider_event(provider: &str, kind: &'static str) {
    counter!(
        "gateway_provider_events_total",
        "provider" => provider.to_string(),
        "event" => kind
    )
    .increment(1);
}

/// Record ticks dropped by the ingest queue.
pub fn record_ticks_dropped(count: u64) {
    counter!("gateway_ticks_dropped_total").increment(count);
}

/// Record an outbound event delivered.
pub fn record_event_routed(kind: &'static str) {
    counter!(
        "gateway_events_routed_total",
        "event" => kind
    )
    .increment(1);
}

/// Record live bars completed by an aggregator.
pub fn record_bars_emitted(format: &'static str, count: u64) {
    counter!(
        "gateway_bars_emitted_total",
        "format" => format
    )
    .increment(count);
}

/// Record a routing key that was not registered.
pub fn record_unknown_routing(registry: &'static str) {
    counter!(
        "gateway_unknown_routing_total",
        "registry" => registry
    )
    .increment(1);
}

/// Record a failed provider adapter call.
pub fn record_adapter_error(provider: &str, operation: &'static str) {
    counter!(
        "gateway_adapter_errors_total",
        "provider" => provider.to_string(),
        "operation" => operation
    )
    .increment(1);
}

/// Record a tick dropped by an aggregator whose window already closed.
pub fn record_late_tick(provider: &str, format: &'static str) {
    counter!(
        "gateway_late_ticks_total",
        "provider" => provider.to_string(),
        "format" => format
    )
    .increment(1);
}

/// Record an event raised by an adapter that is no longer current.
pub fn record_stale_event(provider: &str, kind: &'static str) {
    counter!(
        "gateway_stale_events_total",
        "provider" => provider.to_string(),
        "event" => kind
    )
    .increment(1);
}

/// Update the login count for a provider.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_logins(provider: &str, count: usize) {
    gauge!(
        "gateway_active_logins",
        "provider" => provider.to_string()
    )
    .set(count as f64);
}

/// Update the subscribed security count for a provider.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(provider: &str, count: usize) {
    gauge!(
        "gateway_active_subscriptions",
        "provider" => provider.to_string()
    )
    .set(count as f64);
}

/// Record how long one provider event took to route.
pub fn record_dispatch_duration(kind: &'static str, duration: Duration) {
    histogram!(
        "gateway_dispatch_seconds",
        "event" => kind
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
