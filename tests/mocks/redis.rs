//! Redis test helpers
//!
//! Tests run against a real Redis when one is reachable and skip otherwise.
//! Every `TestRedis` gets its own hash key so parallel tests never share
//! usage counts.

use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default Redis URL for testing
pub const TEST_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Prefix for test hash keys
pub const TEST_KEY_PREFIX: &str = "gateway:test:";

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Test Redis wrapper with a unique usage hash and cleanup
pub struct TestRedis {
    conn: redis::aio::ConnectionManager,
    hash_key: String,
}

impl TestRedis {
    /// Try to connect; `None` when Redis is unavailable
    pub async fn connect() -> Option<Self> {
        let client = redis::Client::open(TEST_REDIS_URL).ok()?;
        let conn = client.get_connection_manager().await.ok()?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let hash_key = format!("{}{}_{}:usage", TEST_KEY_PREFIX, timestamp, counter);

        Some(Self { conn, hash_key })
    }

    pub fn url(&self) -> &'static str {
        TEST_REDIS_URL
    }

    /// Hash key the gateway should be configured with
    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }

    /// Seed a usage count for `credential`
    pub async fn seed(&self, credential: &str, count: u64) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.hset(&self.hash_key, credential, count).await
    }

    /// Read back every stored count
    pub async fn counts(&self) -> redis::RedisResult<HashMap<String, u64>> {
        let mut conn = self.conn.clone();
        conn.hgetall(&self.hash_key).await
    }

    /// Remove the usage hash
    pub async fn cleanup(&self) -> redis::RedisResult<()> {
        let mut conn = self.conn.clone();
        conn.del(&self.hash_key).await
    }
}

/// Macro to skip a test if Redis is not available
#[macro_export]
macro_rules! skip_if_no_redis {
    () => {
        match $crate::mocks::redis::TestRedis::connect().await {
            Some(r) => r,
            None => {
                eprintln!(
                    "Skipping test: Redis not available at {}",
                    $crate::mocks::redis::TEST_REDIS_URL
                );
                return;
            }
        }
    };
}
