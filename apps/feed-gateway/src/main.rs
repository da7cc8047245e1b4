//! Feed Gateway Binary
//!
//! Starts the market data gateway with the built-in simulated provider and
//! the stdio transport.
//!
//! # Usage
//!
//! ```bash
//! echo '{"app_id":"A1","strategy_id":"S1","command":{"type":"Login","provider":"SIMULATED"}}' \
//!   | cargo run --bin feed-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `GATEWAY_TICK_QUEUE_CAPACITY`: Ticks buffered ahead of dispatch (default: 65536)
//! - `GATEWAY_CLOCK_INTERVAL_MS`: Bar clock period (default: 250)
//! - `GATEWAY_TICKS_CAPACITY`, `GATEWAY_BARS_CAPACITY`, `GATEWAY_HISTORIC_CAPACITY`,
//!   `GATEWAY_SESSION_CAPACITY`: Outbound channel capacities
//! - `GATEWAY_STDIO_TRANSPORT`: Attach the stdio transport (default: true)
//! - `GATEWAY_SIM_TICK_INTERVAL_MS`, `GATEWAY_SIM_INITIAL_PRICE`, `GATEWAY_SIM_PRICE_STEP`:
//!   Simulated provider
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: `feed_gateway=info`)

use std::sync::Arc;
use std::time::Duration;

use feed_gateway::infrastructure::broadcast::{OutboundConfig, OutboundHub};
use feed_gateway::infrastructure::health::{HealthServer, HealthServerState};
use feed_gateway::infrastructure::ingest::{ingest_channel, run_dispatch_loop};
use feed_gateway::infrastructure::providers::ProviderRegistry;
use feed_gateway::infrastructure::telemetry;
use feed_gateway::infrastructure::transport::StdioTransport;
use feed_gateway::{CommandRouter, Dispatcher, GatewayConfig, SessionMultiplexer, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for workers and adapters during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Feed Gateway");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, metrics disabled");
    }

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Provider events flow adapters -> ingest queue -> dispatcher
    let (ingest_queue, ingest_receiver) = ingest_channel(config.ingest.tick_queue_capacity);
    let ingest_stats = ingest_queue.stats();

    let outbound_hub = Arc::new(OutboundHub::new(OutboundConfig::from(
        config.outbound.clone(),
    )));

    let registry = ProviderRegistry::with_simulated(config.simulated.clone());
    tracing::info!(providers = ?registry.names(), "Provider registry ready");

    let multiplexer = SessionMultiplexer::new(
        Arc::new(registry),
        ingest_queue,
        Arc::clone(&outbound_hub) as _,
    );
    let dispatcher = Dispatcher::new(multiplexer.clone());
    let router = Arc::new(CommandRouter::new(
        multiplexer.clone(),
        shutdown_token.clone(),
    ));

    // Spawn dispatch loop
    let dispatch_task = tokio::spawn(run_dispatch_loop(
        ingest_receiver,
        dispatcher,
        config.ingest.clock_interval,
        shutdown_token.clone(),
    ));

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        multiplexer.clone(),
        ingest_stats,
        Arc::clone(&outbound_hub),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn stdio transport
    if config.transport.stdio {
        let transport = StdioTransport::new(
            Arc::clone(&router),
            &outbound_hub,
            shutdown_token.clone(),
        );
        tokio::spawn(transport.run());
    }

    tracing::info!("Feed gateway ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        router.shutdown().await;
        multiplexer.stop_all().await;
        let _ = dispatch_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting anyway"
        );
    }

    tracing::info!("Feed gateway stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        health_port = config.server.health_port,
        tick_queue_capacity = config.ingest.tick_queue_capacity,
        clock_ms = config.ingest.clock_interval.as_millis(),
        stdio = config.transport.stdio,
        "Configuration loaded"
    );
    tracing::debug!(
        ticks_capacity = config.outbound.ticks_capacity,
        bars_capacity = config.outbound.bars_capacity,
        historic_capacity = config.outbound.historic_capacity,
        session_capacity = config.outbound.session_capacity,
        sim_tick_ms = config.simulated.tick_interval.as_millis(),
        sim_initial_price = %config.simulated.initial_price,
        "Channel and simulator settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel every task.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
