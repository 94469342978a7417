//! Usage checkpointer
//!
//! Fire-and-forget persistence of usage counters. Selections push the new
//! count onto a bounded channel; a single background worker drains it and
//! writes to the backend, so the backend only ever sees one writer.
//!
//! - `record()` never blocks and never fails
//! - updates queued for the same key coalesce to the highest count
//! - write failures are logged and dropped, never retried
//! - `shutdown()` drains whatever is queued, then closes the backend

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::UsagePersistence;
use crate::credentials::Credential;

/// Configuration for the checkpoint worker
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Channel buffer size for handling selection bursts
    pub channel_buffer: usize,
    /// Maximum number of distinct keys written per drain
    pub max_batch_size: usize,
    /// How long shutdown waits for the final flush
    pub shutdown_timeout: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            channel_buffer: 10_000,
            max_batch_size: 100,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// A counter value to persist
#[derive(Debug, Clone)]
struct CountUpdate {
    credential: Credential,
    count: u64,
}

/// Single-writer queue in front of a usage backend
pub struct UsageCheckpointer {
    backend: Arc<dyn UsagePersistence>,
    sender: mpsc::Sender<CountUpdate>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl UsageCheckpointer {
    /// Spawn the background worker for `backend`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(backend: Arc<dyn UsagePersistence>, config: CheckpointConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let shutdown_timeout = config.shutdown_timeout;

        let worker = tokio::spawn(Self::background_worker(
            backend.clone(),
            receiver,
            shutdown_rx,
            config,
        ));

        Self {
            backend,
            sender,
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
            shutdown_timeout,
        }
    }

    /// Spawn with default configuration
    pub fn with_defaults(backend: Arc<dyn UsagePersistence>) -> Self {
        Self::spawn(backend, CheckpointConfig::default())
    }

    /// The backend this checkpointer writes to
    pub fn backend(&self) -> &Arc<dyn UsagePersistence> {
        &self.backend
    }

    /// Queue a counter value - fire-and-forget
    ///
    /// If the channel is full or closed the update is dropped and logged.
    pub fn record(&self, credential: Credential, count: u64) {
        if let Err(e) = self.sender.try_send(CountUpdate { credential, count }) {
            match e {
                mpsc::error::TrySendError::Full(update) => {
                    warn!(
                        key = %update.credential,
                        count = update.count,
                        "Usage checkpoint channel full, dropping update"
                    );
                }
                mpsc::error::TrySendError::Closed(update) => {
                    error!(
                        key = %update.credential,
                        count = update.count,
                        "Usage checkpoint channel closed, dropping update"
                    );
                }
            }
        }
    }

    /// Flush queued updates and close the backend
    pub async fn shutdown(&self) {
        let signal = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(signal) = signal {
            let _ = signal.send(());
        }

        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            match tokio::time::timeout(self.shutdown_timeout, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Usage checkpoint worker panicked"),
                Err(_) => warn!("Timed out waiting for usage checkpoint worker to flush"),
            }
        }
    }

    /// Background worker that writes queued counts
    async fn background_worker(
        backend: Arc<dyn UsagePersistence>,
        mut receiver: mpsc::Receiver<CountUpdate>,
        mut shutdown: oneshot::Receiver<()>,
        config: CheckpointConfig,
    ) {
        info!(
            backend = backend.name(),
            batch_size = config.max_batch_size,
            "Starting usage checkpoint worker"
        );

        let mut pending: HashMap<Credential, u64> = HashMap::new();

        loop {
            tokio::select! {
                maybe_update = receiver.recv() => {
                    match maybe_update {
                        Some(update) => {
                            Self::absorb(&mut pending, update);
                            while pending.len() < config.max_batch_size {
                                match receiver.try_recv() {
                                    Ok(update) => Self::absorb(&mut pending, update),
                                    Err(_) => break,
                                }
                            }
                            Self::flush(backend.as_ref(), &mut pending).await;
                        }
                        None => break,
                    }
                }
                // Fires on an explicit shutdown and when the checkpointer is dropped
                _ = &mut shutdown => {
                    while let Ok(update) = receiver.try_recv() {
                        Self::absorb(&mut pending, update);
                    }
                    Self::flush(backend.as_ref(), &mut pending).await;
                    break;
                }
            }
        }

        backend.close().await;
        info!(backend = backend.name(), "Usage checkpoint worker stopped");
    }

    /// Merge an update into the pending set, keeping the highest count
    fn absorb(pending: &mut HashMap<Credential, u64>, update: CountUpdate) {
        let slot = pending.entry(update.credential).or_insert(0);
        *slot = (*slot).max(update.count);
    }

    /// Write every pending count, logging failures
    async fn flush(backend: &dyn UsagePersistence, pending: &mut HashMap<Credential, u64>) {
        for (credential, count) in pending.drain() {
            match backend.save_count(&credential, count).await {
                Ok(()) => debug!(key = %credential, count, "Usage count checkpointed"),
                Err(e) => warn!(
                    key = %credential,
                    count,
                    error = %e,
                    "Failed to checkpoint usage count"
                ),
            }
        }
    }
}
