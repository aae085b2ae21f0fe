// src/provision.rs - One-time validation and wiring of a hit counter
use crate::config::{DownstreamTarget, HandlerConfig};
use crate::error::{InvocationFailure, Result, StoreFailure};
use crate::handler::HitCounterHandler;
use crate::invoker::DownstreamInvoker;
use crate::observer::{RequestObserver, TracingObserver};
use crate::store::{CounterRecord, CounterStore, MemoryStoreFactory, StoreFactory, StoreSpec};
use bytes::Bytes;
use std::sync::Arc;

/// Read/write access to one counter store.
#[derive(Clone)]
pub struct StoreGrant {
    store: Arc<dyn CounterStore>,
}

impl StoreGrant {
    pub(crate) fn read_write(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub async fn increment(&self, key: &str) -> std::result::Result<u64, StoreFailure> {
        self.store.increment(key).await
    }

    pub async fn get(&self, key: &str) -> std::result::Result<Option<u64>, StoreFailure> {
        self.store.get(key).await
    }
}

/// Permission to invoke exactly one downstream target.
#[derive(Clone)]
pub struct InvokeGrant {
    target: DownstreamTarget,
    invoker: Arc<dyn DownstreamInvoker>,
}

impl InvokeGrant {
    pub(crate) fn new(target: DownstreamTarget, invoker: Arc<dyn DownstreamInvoker>) -> Self {
        Self { target, invoker }
    }

    pub fn target(&self) -> &DownstreamTarget {
        &self.target
    }

    pub async fn invoke(&self, payload: Bytes) -> std::result::Result<Bytes, InvocationFailure> {
        self.invoker.invoke(&self.target, payload).await
    }
}

/// Read-only view of a provisioned store.
#[derive(Clone)]
pub struct StoreRef {
    spec: StoreSpec,
    store: Arc<dyn CounterStore>,
}

impl StoreRef {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn read_capacity(&self) -> u32 {
        self.spec.read_capacity
    }

    pub async fn get(&self, key: &str) -> std::result::Result<Option<u64>, StoreFailure> {
        self.store.get(key).await
    }

    pub async fn records(&self) -> std::result::Result<Vec<CounterRecord>, StoreFailure> {
        self.store.records().await
    }
}

/// Result of a successful provisioning step.
pub struct Provisioned {
    pub handler: Arc<HitCounterHandler>,
    pub store: StoreRef,
}

/// Validates handler configurations and wires handlers to fresh stores.
pub struct Provisioner {
    invoker: Arc<dyn DownstreamInvoker>,
    stores: Arc<dyn StoreFactory>,
    observer: Arc<dyn RequestObserver>,
    store_name: String,
}

impl Provisioner {
    pub fn new(invoker: Arc<dyn DownstreamInvoker>, stores: Arc<dyn StoreFactory>) -> Self {
        Self {
            invoker,
            stores,
            observer: Arc::new(TracingObserver),
            store_name: "hits".to_string(),
        }
    }

    /// Provisioner that creates in-memory stores.
    pub fn in_memory(invoker: Arc<dyn DownstreamInvoker>) -> Self {
        Self::new(invoker, Arc::new(MemoryStoreFactory))
    }

    pub fn with_observer(mut self, observer: Arc<dyn RequestObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_store_name<S: Into<String>>(mut self, name: S) -> Self {
        self.store_name = name.into();
        self
    }

    /// Validate `config`, create an empty store and hand back a handler holding
    /// write access to that store and invoke access to the configured target.
    ///
    /// Nothing is returned or retained unless every step succeeds.
    pub async fn provision(&self, config: &HandlerConfig) -> Result<Provisioned> {
        let read_capacity = config.read_capacity()?;

        let spec = StoreSpec {
            name: self.store_name.clone(),
            read_capacity,
        };
        let store = self.stores.create(&spec).await?;

        let store_grant = StoreGrant::read_write(store.clone());
        let invoke_grant = InvokeGrant::new(config.downstream_target.clone(), self.invoker.clone());
        let handler = HitCounterHandler::new(store_grant, invoke_grant, self.observer.clone());

        tracing::info!(
            "Provisioned hit counter: store '{}' (read capacity {}) -> downstream '{}'",
            spec.name,
            spec.read_capacity,
            config.downstream_target.name
        );

        Ok(Provisioned {
            handler: Arc::new(handler),
            store: StoreRef { spec, store },
        })
    }
}
