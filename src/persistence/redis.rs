//! Redis usage store
//!
//! Keeps every counter as a field of a single hash:
//! `HSET gemini:keyUsageCount <api-key> <count>`.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{info, warn};

use super::UsagePersistence;
use crate::credentials::Credential;
use crate::error::AppResult;

/// Redis-backed usage store
pub struct RedisUsageStore {
    conn: redis::aio::ConnectionManager,
    hash_key: String,
}

impl RedisUsageStore {
    /// Wrap an existing connection
    pub fn new(conn: redis::aio::ConnectionManager, hash_key: impl Into<String>) -> Self {
        Self {
            conn,
            hash_key: hash_key.into(),
        }
    }

    /// Connect to Redis at `url`
    pub async fn connect(url: &str, hash_key: impl Into<String>) -> AppResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        info!("Connected to Redis usage store");
        Ok(Self::new(conn, hash_key))
    }

    /// Hash holding the counters
    pub fn hash_key(&self) -> &str {
        &self.hash_key
    }
}

#[async_trait]
impl UsagePersistence for RedisUsageStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn load_counts(&self, credentials: &[Credential]) -> AppResult<HashMap<Credential, u64>> {
        if credentials.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(&self.hash_key).await?;
        if !exists {
            warn!(hash_key = %self.hash_key, "No stored usage counts found in Redis");
            return Ok(HashMap::new());
        }

        let fields: Vec<&str> = credentials.iter().map(Credential::as_str).collect();
        let values = redis::cmd("HMGET")
            .arg(&self.hash_key)
            .arg(&fields)
            .query_async::<_, Vec<Option<String>>>(&mut conn)
            .await?;

        Ok(parse_counts(credentials, values))
    }

    async fn save_count(&self, credential: &Credential, count: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&self.hash_key, credential.as_str(), count).await?;
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        info!(hash_key = %self.hash_key, "Closing Redis usage store");
    }
}

/// Pair HMGET results with the credentials they were requested for
fn parse_counts(credentials: &[Credential], values: Vec<Option<String>>) -> HashMap<Credential, u64> {
    credentials
        .iter()
        .zip(values)
        .filter_map(|(credential, value)| {
            let raw = value?;
            match raw.trim().parse::<u64>() {
                Ok(count) => Some((credential.clone(), count)),
                Err(_) => {
                    warn!(key = %credential, value = %raw, "Ignoring unparsable stored usage count");
                    None
                }
            }
        })
        .collect()
}
