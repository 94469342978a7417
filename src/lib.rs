//! Gemini Gateway - API key rotating reverse proxy for the Gemini API
//!
//! This library provides the core functionality for the gateway server.
//! It authenticates clients with a shared secret, rotates upstream API keys
//! least-used first, and relays JSON and SSE responses without buffering.

pub mod config;
pub mod credentials;
pub mod error;
pub mod middleware;
pub mod persistence;
pub mod proxy;
pub mod routes;
pub mod streaming;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use tracing::{info, warn};

pub use crate::config::Config;
pub use crate::credentials::{CredentialSelector, CredentialStore};
pub use crate::persistence::{RedisUsageStore, UsageCheckpointer, UsagePersistence};
pub use crate::proxy::{RequestForwarder, StreamRelay};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    /// Upstream key rotation, with optional usage checkpointing
    pub selector: CredentialSelector,
    pub forwarder: RequestForwarder,
    pub relay: StreamRelay,
    /// Usage backend, if one is configured and reachable
    pub persistence: Option<Arc<dyn UsagePersistence>>,
}

impl AppState {
    /// Create a new application state
    ///
    /// Connects to Redis when `REDIS_URL` is set. A connection failure is
    /// fatal only with `REDIS_REQUIRED=true`; otherwise the gateway runs
    /// with in-memory counters.
    pub async fn new(config: Config) -> Result<Self> {
        let persistence: Option<Arc<dyn UsagePersistence>> = match &config.redis_url {
            Some(url) => match RedisUsageStore::connect(url, config.usage_hash_key.clone()).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) if config.redis_required => {
                    bail!("Redis is required but unreachable: {}", e);
                }
                Err(e) => {
                    warn!(error = %e, "Redis unreachable, usage counts will not persist");
                    None
                }
            },
            None => {
                info!("REDIS_URL not set, usage counts are kept in memory only");
                None
            }
        };

        Self::assemble(config, persistence).await
    }

    /// Build the state around an already connected usage backend
    ///
    /// Stored usage counts are restored before this returns, so no request
    /// can be served with unseeded counters.
    pub async fn assemble(
        config: Config,
        persistence: Option<Arc<dyn UsagePersistence>>,
    ) -> Result<Self> {
        let store = CredentialStore::load(&config.api_keys);

        let selector = match &persistence {
            Some(backend) => CredentialSelector::with_persistence(
                store,
                UsageCheckpointer::with_defaults(backend.clone()),
            ),
            None => CredentialSelector::new(store),
        };
        selector.restore().await;

        let forwarder = RequestForwarder::new(&config);
        let relay = StreamRelay::new(&config)?;

        Ok(Self {
            config,
            start_time: Instant::now(),
            selector,
            forwarder,
            relay,
            persistence,
        })
    }

    /// Flush pending usage checkpoints and release the backend
    pub async fn shutdown(&self) {
        self.selector.shutdown().await;
    }
}
