// src/lib.rs
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod handler;
pub mod invoker;
pub mod metrics;
pub mod observer;
pub mod provision;
pub mod server;
pub mod store;

#[cfg(test)]
mod testing;

/// Wires a hit counter from configuration and serves it over HTTP
pub struct HitCounterService {
    config: config::ServiceConfig,
}

impl HitCounterService {
    /// Create a new service with the provided configuration
    pub fn new(config: config::ServiceConfig) -> Self {
        HitCounterService { config }
    }

    /// Create a new service by loading configuration from a file
    pub fn from_file(config_path: &str) -> Result<Self> {
        let config = config::ServiceConfig::load_from_file(config_path)?;
        Ok(HitCounterService::new(config))
    }

    pub fn config(&self) -> &config::ServiceConfig {
        &self.config
    }

    /// Validate the configuration and provision the handler and its store.
    pub async fn provision(&self) -> Result<Provisioned> {
        self.config.validate()?;

        let invoker = Arc::new(HttpInvoker::new(&self.config.invoker));
        let stores = store_factory(&self.config.store)?;

        let provisioned = Provisioner::new(invoker, stores)
            .with_store_name(self.config.store.name.clone())
            .provision(&self.config.hit_counter)
            .await?;

        Ok(provisioned)
    }

    /// Provision and serve until Ctrl+C
    pub async fn start(&self) -> Result<()> {
        self.start_with_shutdown(shutdown_signal()).await
    }

    pub async fn start_with_shutdown<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.listen_socket_addr()?;
        let provisioned = self.provision().await?;

        metrics::init_metrics(&self.config.metrics)?;

        server::run_server(provisioned.handler, addr, shutdown)
            .await
            .context("HTTP server error")
    }
}

fn store_factory(config: &config::StoreConfig) -> Result<Arc<dyn StoreFactory>> {
    match config.backend {
        config::StoreBackend::Memory => Ok(Arc::new(store::MemoryStoreFactory)),
        #[cfg(feature = "redis")]
        config::StoreBackend::Redis => {
            let url = config
                .url
                .clone()
                .context("store.url is required for the redis backend")?;
            Ok(Arc::new(store::RedisStoreFactory::new(url)))
        }
        #[cfg(not(feature = "redis"))]
        config::StoreBackend::Redis => {
            anyhow::bail!("the redis store backend requires the `redis` feature")
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

// Re-export types for easier usage
pub use config::{DownstreamTarget, HandlerConfig, ServiceConfig};
pub use error::{HitCounterError, InvocationFailure, StoreFailure};
pub use handler::HitCounterHandler;
pub use invoker::{DownstreamInvoker, HttpInvoker};
pub use observer::{NoopObserver, RequestObserver, TracingObserver};
pub use provision::{InvokeGrant, Provisioned, Provisioner, StoreGrant, StoreRef};
pub use store::{CounterRecord, CounterStore, MemoryCounterStore, StoreFactory, StoreSpec};
