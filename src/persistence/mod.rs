//! Usage persistence
//!
//! Durable checkpointing of per-key usage counters so rotation stays even
//! across restarts. The in-memory counters remain the source of truth while
//! the process runs; backends only receive best-effort copies.

pub mod checkpoint;
pub mod in_memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::credentials::Credential;
use crate::error::AppResult;

pub use self::checkpoint::{CheckpointConfig, UsageCheckpointer};
pub use self::in_memory::InMemoryUsageStore;
pub use self::redis::RedisUsageStore;

/// Backing store for usage counters
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait UsagePersistence: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Stored counts for the given credentials
    ///
    /// Credentials without a stored value are absent from the result.
    async fn load_counts(&self, credentials: &[Credential]) -> AppResult<HashMap<Credential, u64>>;

    /// Store the current count for one credential
    async fn save_count(&self, credential: &Credential, count: u64) -> AppResult<()>;

    /// Connectivity check used by health endpoints
    async fn ping(&self) -> AppResult<()>;

    /// Release the backend at shutdown
    async fn close(&self) {}
}
