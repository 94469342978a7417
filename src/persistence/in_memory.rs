//! In-memory usage store
//!
//! Same contract as the Redis store, kept in a `HashMap`. Used by tests and
//! anywhere a process-local backend is enough. Writes can be switched to
//! fail to exercise the best-effort paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::UsagePersistence;
use crate::credentials::Credential;
use crate::error::{AppError, AppResult};

/// In-memory usage store
#[derive(Default)]
pub struct InMemoryUsageStore {
    counts: RwLock<HashMap<String, u64>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryUsageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with `(key, count)` pairs
    pub fn with_counts<'a>(entries: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        let store = Self::new();
        {
            let mut counts = store.counts.write().unwrap_or_else(|e| e.into_inner());
            for (key, count) in entries {
                counts.insert(key.to_string(), count);
            }
        }
        store
    }

    /// Stored count for a raw key
    pub fn get(&self, key: &str) -> Option<u64> {
        self.counts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsagePersistence for InMemoryUsageStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_counts(&self, credentials: &[Credential]) -> AppResult<HashMap<Credential, u64>> {
        let counts = self.counts.read().unwrap_or_else(|e| e.into_inner());
        Ok(credentials
            .iter()
            .filter_map(|c| counts.get(c.as_str()).map(|count| (c.clone(), *count)))
            .collect())
    }

    async fn save_count(&self, credential: &Credential, count: u64) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "in-memory usage store is rejecting writes"
            )));
        }

        self.counts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(credential.as_str().to_string(), count);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}
