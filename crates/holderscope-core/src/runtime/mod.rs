//! Runtime initialization and lifecycle management.
//!
//! Provides a unified assembly point for all core components, suitable for
//! the HTTP server binary and for embedded use (integration tests drive the
//! populator through the same builder). Construction is synchronous;
//! [`HolderscopeRuntime::start`] performs the async startup work (stale
//! in-flight state reconciliation).
//!
//! # Example
//!
//! ```no_run
//! use holderscope_core::{config::AppConfig, runtime::HolderscopeRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = HolderscopeRuntime::builder().with_config(config).build()?;
//!     runtime.start().await;
//!
//!     let populator = runtime.populator();
//!     // ... set up HTTP routes ...
//!
//!     runtime.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    cache::CacheStore,
    chain::{NodeClient, NodeClientConfig},
    config::{AppConfig, ConfigError, ContractRegistry},
    indexer::IndexerClient,
    metrics::MetricsCollector,
    populator::Populator,
};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cache store construction failed.
    #[error("cache initialization failed: {0}")]
    Cache(String),

    /// An upstream client could not be constructed.
    #[error("client initialization failed: {0}")]
    Client(String),
}

/// Builder for constructing a [`HolderscopeRuntime`].
pub struct HolderscopeRuntimeBuilder {
    config: Option<AppConfig>,
    reconcile_on_start: bool,
}

impl HolderscopeRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, reconcile_on_start: true }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Disables the startup pass that converts persisted in-flight progress
    /// records into error states. Tests that stage such records use this.
    #[must_use]
    pub fn skip_reconciliation(mut self) -> Self {
        self.reconcile_on_start = false;
        self
    }

    /// Assembles all components.
    ///
    /// # Errors
    ///
    /// Returns a [`RuntimeError`] when the configuration is invalid or a
    /// component fails to construct.
    pub fn build(self) -> Result<HolderscopeRuntime, RuntimeError> {
        let config = match self.config {
            Some(config) => config,
            None => AppConfig::load()?,
        };
        config.validate()?;

        let registry = Arc::new(config.registry()?);
        debug!(contracts = registry.len(), "contract registry validated");

        let store = Arc::new(
            CacheStore::new(&config.cache).map_err(|e| RuntimeError::Cache(e.to_string()))?,
        );

        let indexer = Arc::new(
            IndexerClient::new(
                config.indexer.base_url.clone(),
                Duration::from_secs(config.indexer.timeout_seconds),
            )
            .map_err(|e| RuntimeError::Client(e.to_string()))?,
        );

        let node = Arc::new(
            NodeClient::with_config(NodeClientConfig {
                rpc_url: config.node.rpc_url.clone(),
                concurrent_limit: config.node.batch_concurrency.max(1) * 8,
                request_timeout: Duration::from_secs(config.node.timeout_seconds),
            })
            .map_err(|e| RuntimeError::Client(e.to_string()))?,
        );

        let metrics = Arc::new(MetricsCollector::new());

        let populator = Arc::new(Populator::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            indexer,
            node,
            Arc::clone(&metrics),
            &config,
        ));

        let (shutdown_tx, _) = broadcast::channel(16);

        info!(
            environment = %config.environment,
            contracts = registry.len(),
            remote_cache = config.cache.remote.enabled,
            "runtime assembled"
        );

        Ok(HolderscopeRuntime {
            config,
            registry,
            store,
            populator,
            metrics,
            shutdown_tx,
            reconcile_on_start: self.reconcile_on_start,
        })
    }
}

impl Default for HolderscopeRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fully assembled service runtime.
pub struct HolderscopeRuntime {
    config: AppConfig,
    registry: Arc<ContractRegistry>,
    store: Arc<CacheStore>,
    populator: Arc<Populator>,
    metrics: Arc<MetricsCollector>,
    shutdown_tx: broadcast::Sender<()>,
    reconcile_on_start: bool,
}

impl HolderscopeRuntime {
    #[must_use]
    pub fn builder() -> HolderscopeRuntimeBuilder {
        HolderscopeRuntimeBuilder::new()
    }

    /// Async startup work: reconciles stale in-flight progress records left
    /// by a previous process.
    pub async fn start(&self) {
        if self.reconcile_on_start {
            self.populator.reconcile_stale_runs().await;
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> Arc<ContractRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn store(&self) -> Arc<CacheStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn populator(&self) -> Arc<Populator> {
        Arc::clone(&self.populator)
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Subscribes to the shutdown broadcast.
    #[must_use]
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Triggers shutdown for all subscribers.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Blocks until ctrl-c, then broadcasts shutdown.
    pub async fn wait_for_shutdown(&self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        self.shutdown();
    }
}
