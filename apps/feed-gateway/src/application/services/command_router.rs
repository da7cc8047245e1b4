//! Command Router
//!
//! Serializes client commands per provider. Each provider gets a worker task
//! fed by an unbounded queue, so commands for one provider are applied in
//! arrival order while different providers run concurrently.
//!
//! Commands naming a provider the factory cannot build are handled on a
//! one-shot task and never get a worker. A worker exits once its provider
//! has no session and its queue is empty; the next command spawns a new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::SessionMultiplexer;
use crate::application::commands::CommandEnvelope;
use crate::domain::market::ProviderName;

type WorkerMap = Arc<Mutex<HashMap<ProviderName, Worker>>>;

#[derive(Debug)]
struct Worker {
    id: u64,
    sender: mpsc::UnboundedSender<CommandEnvelope>,
}

/// Routes commands to per-provider workers.
#[derive(Debug)]
pub struct CommandRouter {
    multiplexer: SessionMultiplexer,
    workers: WorkerMap,
    next_worker: AtomicU64,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl CommandRouter {
    /// Create a router; workers stop when `cancel` fires.
    #[must_use]
    pub fn new(multiplexer: SessionMultiplexer, cancel: CancellationToken) -> Self {
        Self {
            multiplexer,
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_worker: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    /// Queue a command for its provider's worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, envelope: CommandEnvelope) {
        if self.cancel.is_cancelled() || self.tracker.is_closed() {
            warn!(
                correlation_id = %envelope.correlation_id,
                "Command dropped, router is shutting down"
            );
            return;
        }

        let provider = envelope.command.provider().to_string();
        if !self.multiplexer.supports(&provider) {
            debug!(provider = %provider, "Unknown provider, handling without a worker");
            let multiplexer = self.multiplexer.clone();
            self.tracker.spawn(async move { multiplexer.handle(envelope).await });
            return;
        }

        let mut workers = self.workers.lock();

        let envelope = match workers.get(&provider) {
            Some(worker) => match worker.sender.send(envelope) {
                Ok(()) => return,
                Err(mpsc::error::SendError(envelope)) => envelope,
            },
            None => envelope,
        };

        let worker = self.spawn_worker(&provider);
        if let Err(mpsc::error::SendError(envelope)) = worker.sender.send(envelope) {
            warn!(
                provider = %provider,
                correlation_id = %envelope.correlation_id,
                "Command dropped, worker unavailable"
            );
        }
        workers.insert(provider, worker);
    }

    /// Number of live provider workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop accepting commands and wait for workers to drain their queues.
    pub async fn shutdown(&self) {
        self.workers.lock().clear();
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn spawn_worker(&self, provider: &str) -> Worker {
        let id = self.next_worker.fetch_add(1, Ordering::Relaxed);
        let (sender, rx) = mpsc::unbounded_channel();
        debug!(provider = %provider, worker = id, "Spawning command worker");
        self.tracker.spawn(run_worker(
            provider.to_string(),
            id,
            self.multiplexer.clone(),
            Arc::clone(&self.workers),
            rx,
            self.cancel.clone(),
        ));
        Worker { id, sender }
    }
}

async fn run_worker(
    provider: ProviderName,
    id: u64,
    multiplexer: SessionMultiplexer,
    workers: WorkerMap,
    mut rx: mpsc::UnboundedReceiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => multiplexer.handle(envelope).await,
                None => break,
            },
        }

        if multiplexer.session(&provider).is_none() && retire(&workers, &provider, id, &rx) {
            break;
        }
    }
    debug!(provider = %provider, worker = id, "Command worker stopped");
}

/// Remove the worker's entry if nothing is queued for it.
///
/// `submit` sends while holding the map lock, so an empty queue observed
/// under that lock stays empty once the entry is gone.
fn retire(
    workers: &WorkerMap,
    provider: &str,
    id: u64,
    rx: &mpsc::UnboundedReceiver<CommandEnvelope>,
) -> bool {
    let mut workers = workers.lock();
    if !rx.is_empty() {
        return false;
    }
    if workers.get(provider).is_some_and(|worker| worker.id == id) {
        workers.remove(provider);
    }
    true
}
