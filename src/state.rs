//! Application state module
//!
//! Contains the shared state used across all gateway connections. Everything
//! a connection needs is constructed here and passed in explicitly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::info;

use crate::auth::{AccountStore, InMemoryAccountStore};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::net::session::SessionManager;
use crate::resolver::{AttemptTracker, KeyCache, KeyResolver, SlowResolverPool};

/// Application state shared across all connections
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Session manager for tracking connected clients
    pub session_manager: SessionManager,
    /// Learned keys shared by all connections
    pub key_cache: Arc<KeyCache>,
    /// Per-identity breaker state
    pub tracker: Arc<AttemptTracker>,
    pub resolver: Arc<KeyResolver>,
    /// Bounded pool for slow-path searches
    pub pool: SlowResolverPool,
    /// Account backend
    pub store: Arc<dyn AccountStore>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
    pub started_at: Instant,
}

impl AppState {
    /// Create state backed by an in-memory account store
    pub fn new(config: GatewayConfig, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        let store = Arc::new(InMemoryAccountStore::new(config.dev_mode));
        if config.dev_mode {
            info!("Account store running in DEVELOPMENT mode - all logins accepted");
        }
        Self::with_store(config, store, shutdown_tx)
    }

    /// Create state with an explicit account store
    pub fn with_store(
        config: GatewayConfig,
        store: Arc<dyn AccountStore>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self> {
        let static_keys = config
            .resolver
            .parsed_static_keys()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let key_cache = Arc::new(match &config.resolver.learned_keys_path {
            Some(path) => KeyCache::with_persistence(path),
            None => KeyCache::new(),
        });
        let tracker = Arc::new(AttemptTracker::new(config.resolver.breaker_settings()));
        let resolver = Arc::new(KeyResolver::new(
            key_cache.clone(),
            tracker.clone(),
            static_keys,
            config.resolver.max_candidates,
        ));
        let pool = SlowResolverPool::new(resolver.clone(), config.resolver.max_concurrent_searches);

        info!(
            store = store.name(),
            static_keys = config.resolver.static_keys.len(),
            learned_keys = key_cache.len(),
            max_concurrent_searches = pool.max_concurrent(),
            "Application state initialized"
        );

        Ok(Self {
            config,
            session_manager: SessionManager::new(),
            key_cache,
            tracker,
            resolver,
            pool,
            store,
            shutdown_tx,
            started_at: Instant::now(),
        })
    }

    pub fn fast_deadline(&self) -> Duration {
        self.config.resolver.fast_deadline()
    }

    pub fn slow_deadline(&self) -> Duration {
        self.config.resolver.slow_deadline()
    }

    pub fn store_timeout(&self) -> Duration {
        self.config.database.query_timeout()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stop the slow-path pool and wait up to `grace` for running jobs
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.pool.shutdown(grace).await
    }
}
