//! Least-used credential selection
//!
//! Every request takes one credential through [`CredentialSelector::next`].
//! The key with the fewest recorded uses wins; ties are broken uniformly at
//! random. The selection and the counter increment happen under one lock, so
//! concurrent requests never observe the same pre-increment state.

use rand::Rng;
use tracing::{debug, info, warn};

use super::store::{Credential, CredentialStore, UsageStat};
use crate::error::AppResult;
use crate::persistence::UsageCheckpointer;
use crate::routes::metrics::record_credential_selection;

/// Hands out credentials and keeps their usage counters
pub struct CredentialSelector {
    store: CredentialStore,
    checkpointer: Option<UsageCheckpointer>,
}

impl CredentialSelector {
    /// Selector with process-local counters only
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            checkpointer: None,
        }
    }

    /// Selector that checkpoints every new count through `checkpointer`
    pub fn with_persistence(store: CredentialStore, checkpointer: UsageCheckpointer) -> Self {
        Self {
            store,
            checkpointer: Some(checkpointer),
        }
    }

    /// Select the next credential and record the use
    ///
    /// Fails with `NoCredentialsAvailable` when no key is loaded. The new
    /// count is queued for persistence without waiting on the backend.
    pub fn next(&self) -> AppResult<Credential> {
        let (credential, count) = self
            .store
            .checkout(|candidates| rand::rng().random_range(0..candidates))?;

        debug!(key = %credential, count, "Selected upstream API key");
        record_credential_selection();

        if let Some(checkpointer) = &self.checkpointer {
            checkpointer.record(credential.clone(), count);
        }

        Ok(credential)
    }

    /// Load stored counters from the persistence backend
    ///
    /// Called once before serving. Backend failures are logged and leave
    /// the counters at zero. Returns how many counters were restored.
    pub async fn restore(&self) -> usize {
        let Some(checkpointer) = &self.checkpointer else {
            return 0;
        };
        if self.store.count() == 0 {
            return 0;
        }

        let backend = checkpointer.backend();
        match backend.load_counts(self.store.credentials()).await {
            Ok(counts) => {
                let restored = self.store.restore(&counts);
                info!(
                    backend = backend.name(),
                    restored,
                    total_usage = self.store.total_usage(),
                    "Restored usage counts"
                );
                restored
            }
            Err(e) => {
                warn!(
                    backend = backend.name(),
                    error = %e,
                    "Failed to load stored usage counts, starting from zero"
                );
                0
            }
        }
    }

    /// Usage snapshot, most used first
    pub fn stats(&self) -> Vec<UsageStat> {
        self.store.stats()
    }

    /// Number of loaded credentials
    pub fn count(&self) -> usize {
        self.store.count()
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Whether usage counts are checkpointed to a backend
    pub fn is_persistent(&self) -> bool {
        self.checkpointer.is_some()
    }

    /// Flush pending checkpoints and release the backend
    pub async fn shutdown(&self) {
        if let Some(checkpointer) = &self.checkpointer {
            checkpointer.shutdown().await;
        }
    }
}
