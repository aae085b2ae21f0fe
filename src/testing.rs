// src/testing.rs - Test doubles for the store and invoker seams
use crate::config::DownstreamTarget;
use crate::error::{HitCounterError, InvocationFailure, Result, StoreFailure};
use crate::handler::HitCounterHandler;
use crate::invoker::DownstreamInvoker;
use crate::observer::{NoopObserver, RequestObserver};
use crate::provision::{InvokeGrant, StoreGrant};
use crate::store::{CounterRecord, CounterStore, MemoryCounterStore, StoreFactory, StoreSpec};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn handler_with(
    store: Arc<dyn CounterStore>,
    invoker: Arc<dyn DownstreamInvoker>,
) -> HitCounterHandler {
    HitCounterHandler::new(
        StoreGrant::read_write(store),
        InvokeGrant::new(DownstreamTarget::new("downstream", "local"), invoker),
        Arc::new(NoopObserver),
    )
}

/// Returns the payload it was given.
#[derive(Default)]
pub struct EchoInvoker {
    calls: AtomicUsize,
}

impl EchoInvoker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownstreamInvoker for EchoInvoker {
    async fn invoke(
        &self,
        _target: &DownstreamTarget,
        payload: Bytes,
    ) -> std::result::Result<Bytes, InvocationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(payload)
    }
}

/// Returns the same bytes for every call.
pub struct StaticInvoker {
    response: Bytes,
}

impl StaticInvoker {
    pub fn new(response: Bytes) -> Self {
        Self { response }
    }

    pub fn json(value: &Value) -> Self {
        Self::new(Bytes::from(value.to_string()))
    }
}

#[async_trait]
impl DownstreamInvoker for StaticInvoker {
    async fn invoke(
        &self,
        _target: &DownstreamTarget,
        _payload: Bytes,
    ) -> std::result::Result<Bytes, InvocationFailure> {
        Ok(self.response.clone())
    }
}

/// Fails every call with the configured failure.
pub struct FailingInvoker {
    failure: InvocationFailure,
    calls: AtomicUsize,
}

impl FailingInvoker {
    pub fn new(failure: InvocationFailure) -> Self {
        Self {
            failure,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownstreamInvoker for FailingInvoker {
    async fn invoke(
        &self,
        _target: &DownstreamTarget,
        _payload: Bytes,
    ) -> std::result::Result<Bytes, InvocationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone())
    }
}

/// Store whose every operation fails.
pub struct FailingStore {
    failure: StoreFailure,
    calls: AtomicUsize,
}

impl FailingStore {
    pub fn new(failure: StoreFailure) -> Self {
        Self {
            failure,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn increment(&self, _key: &str) -> std::result::Result<u64, StoreFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone())
    }

    async fn get(&self, _key: &str) -> std::result::Result<Option<u64>, StoreFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone())
    }

    async fn records(&self) -> std::result::Result<Vec<CounterRecord>, StoreFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.failure.clone())
    }
}

/// In-memory factory that counts how many stores it created.
#[derive(Default)]
pub struct CountingStoreFactory {
    created: AtomicUsize,
}

impl CountingStoreFactory {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreFactory for CountingStoreFactory {
    async fn create(&self, spec: &StoreSpec) -> Result<Arc<dyn CounterStore>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryCounterStore::new(spec.name.clone())))
    }
}

pub struct FailingStoreFactory;

#[async_trait]
impl StoreFactory for FailingStoreFactory {
    async fn create(&self, _spec: &StoreSpec) -> Result<Arc<dyn CounterStore>> {
        Err(HitCounterError::Provisioning {
            stage: "creating the counter store".to_string(),
            reason: "backend unreachable".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    requests: AtomicUsize,
    responses: Mutex<Vec<String>>,
    completions: Mutex<Vec<bool>>,
}

impl RecordingObserver {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> Vec<String> {
        self.responses.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<bool> {
        self.completions.lock().unwrap().clone()
    }
}

impl RequestObserver for RecordingObserver {
    fn on_request(&self, _envelope: &Value) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_response(&self, path: &str, _raw: &[u8]) {
        self.responses.lock().unwrap().push(path.to_string());
    }

    fn on_complete(&self, _elapsed: Duration, succeeded: bool) {
        self.completions.lock().unwrap().push(succeeded);
    }
}
