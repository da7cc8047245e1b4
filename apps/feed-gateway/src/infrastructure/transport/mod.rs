//! Stdio Transport
//!
//! Reference wiring of the client transport: one JSON `CommandEnvelope` per
//! line on stdin, one JSON `OutboundEvent` per line on stdout. Logs go to
//! stderr so stdout carries only events.
//!
//! ```text
//! stdin  ──► read_commands ──► CommandRouter
//! stdout ◄── write_events  ◄── OutboundHub (ticks, bars, historic, session)
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::commands::CommandEnvelope;
use crate::application::services::CommandRouter;
use crate::domain::events::OutboundEvent;
use crate::infrastructure::broadcast::OutboundHub;
use crate::infrastructure::metrics::{self, CommandOutcome};

const TICKS: usize = 0;
const BARS: usize = 1;
const HISTORIC: usize = 2;
const SESSION: usize = 3;

// =============================================================================
// Stdio Transport
// =============================================================================

/// JSON-lines transport over the process's stdin and stdout.
pub struct StdioTransport {
    router: Arc<CommandRouter>,
    receivers: [broadcast::Receiver<OutboundEvent>; 4],
    cancel: CancellationToken,
}

impl StdioTransport {
    /// Attach to the hub now so no event published after this call is missed.
    #[must_use]
    pub fn new(router: Arc<CommandRouter>, hub: &OutboundHub, cancel: CancellationToken) -> Self {
        Self {
            router,
            receivers: hub.subscribe_all(),
            cancel,
        }
    }

    /// Pump both directions until cancelled.
    ///
    /// Stdin reaching EOF stops the command side only.
    pub async fn run(self) {
        info!("Stdio transport attached");
        let stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();

        let (read, written) = tokio::join!(
            read_commands(stdin, &self.router, &self.cancel),
            write_events(&mut stdout, self.receivers, &self.cancel),
        );

        match read {
            Ok(stats) => info!(
                accepted = stats.accepted,
                malformed = stats.malformed,
                "Stdin closed"
            ),
            Err(e) => warn!(error = %e, "Stdin read failed"),
        }
        match written {
            Ok(count) => info!(events = count, "Stdout writer stopped"),
            Err(e) => warn!(error = %e, "Stdout write failed"),
        }
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport").finish_non_exhaustive()
    }
}

// =============================================================================
// Commands In
// =============================================================================

/// Lines consumed by [`read_commands`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    /// Lines parsed and submitted.
    pub accepted: u64,
    /// Lines that were not a valid command.
    pub malformed: u64,
}

/// Parse one command line.
///
/// # Errors
///
/// Returns the JSON error for anything that is not a `CommandEnvelope`.
pub fn parse_command(line: &str) -> Result<CommandEnvelope, serde_json::Error> {
    serde_json::from_str(line)
}

/// Submit every command line from `reader` until EOF or cancellation.
///
/// Blank lines are skipped; malformed lines are logged and counted.
///
/// # Errors
///
/// Returns the underlying I/O error if reading fails.
pub async fn read_commands<R>(
    reader: R,
    router: &CommandRouter,
    cancel: &CancellationToken,
) -> std::io::Result<LineStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = LineStats::default();

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(envelope) => {
                debug!(
                    command = envelope.command.kind(),
                    provider = %envelope.command.provider(),
                    correlation_id = %envelope.correlation_id,
                    "Command received"
                );
                stats.accepted += 1;
                router.submit(envelope);
            }
            Err(e) => {
                warn!(error = %e, "Malformed command line dropped");
                metrics::record_command("malformed", CommandOutcome::Dropped);
                stats.malformed += 1;
            }
        }
    }

    Ok(stats)
}

// =============================================================================
// Events Out
// =============================================================================

/// Write every event from the hub receivers as JSON lines.
///
/// Session events are drained ahead of historic data, bars and ticks. A
/// lagging receiver logs how many events it lost and carries on. Returns
/// the number of lines written once cancelled or every channel is closed.
///
/// # Errors
///
/// Returns the underlying I/O error if writing fails.
pub async fn write_events<W>(
    writer: &mut W,
    receivers: [broadcast::Receiver<OutboundEvent>; 4],
    cancel: &CancellationToken,
) -> std::io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let [mut ticks, mut bars, mut historic, mut session] = receivers;
    let mut open = [true; 4];
    let mut written = 0;

    while open.iter().any(|o| *o) {
        let (channel, received) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = session.recv(), if open[SESSION] => (SESSION, r),
            r = historic.recv(), if open[HISTORIC] => (HISTORIC, r),
            r = bars.recv(), if open[BARS] => (BARS, r),
            r = ticks.recv(), if open[TICKS] => (TICKS, r),
        };

        match received {
            Ok(event) => {
                let mut line = serde_json::to_vec(&event)?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                writer.flush().await?;
                written += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(channel, skipped, "Outbound writer lagged, events lost");
            }
            Err(RecvError::Closed) => open[channel] = false,
        }
    }

    Ok(written)
}
