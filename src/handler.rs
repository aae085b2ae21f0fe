// src/handler.rs - Count-then-forward request handling
use crate::error::{HitCounterError, InvocationFailure, Result};
use crate::observer::RequestObserver;
use crate::provision::{InvokeGrant, StoreGrant};
use bytes::Bytes;
use metrics::{counter, histogram};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Field of the inbound envelope holding the routing key.
pub const ROUTING_KEY_FIELD: &str = "path";

/// Records a hit for every request, then forwards it downstream.
///
/// Built only by provisioning, which hands it the store and invoke grants.
/// Holds no mutable state, so one instance serves any number of concurrent
/// requests.
pub struct HitCounterHandler {
    store: StoreGrant,
    downstream: InvokeGrant,
    observer: Arc<dyn RequestObserver>,
}

impl HitCounterHandler {
    pub(crate) fn new(
        store: StoreGrant,
        downstream: InvokeGrant,
        observer: Arc<dyn RequestObserver>,
    ) -> Self {
        Self {
            store,
            downstream,
            observer,
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn downstream_name(&self) -> &str {
        &self.downstream.target().name
    }

    /// Count the request under its `path`, forward the unmodified envelope
    /// and return the downstream payload as-is.
    ///
    /// A failed increment stops the request before the downstream is called.
    /// A failed downstream call leaves the increment in place.
    pub async fn handle(&self, envelope: &Value) -> Result<Value> {
        let start = Instant::now();
        self.observer.on_request(envelope);

        let result = self.count_and_forward(envelope).await;

        let elapsed = start.elapsed();
        let outcome = if result.is_ok() { "success" } else { "error" };
        histogram!("hit_counter.request.duration", elapsed.as_secs_f64(), "outcome" => outcome);
        self.observer.on_complete(elapsed, result.is_ok());

        result
    }

    async fn count_and_forward(&self, envelope: &Value) -> Result<Value> {
        let path = routing_key(envelope)?;

        let hits = self.store.increment(path).await.map_err(|source| {
            counter!("hit_counter.increment.failure", 1);
            HitCounterError::CounterWrite {
                key: path.to_string(),
                source,
            }
        })?;
        counter!("hit_counter.requests", 1);
        tracing::debug!(path, hits, "hit recorded");

        let payload = serde_json::to_vec(envelope)
            .map(Bytes::from)
            .map_err(|e| self.downstream_error(InvocationFailure::InvalidPayload {
                message: format!("failed to encode request: {}", e),
            }))?;

        let raw = self
            .downstream
            .invoke(payload)
            .await
            .map_err(|source| self.downstream_error(source))?;
        self.observer.on_response(path, &raw);

        let response = serde_json::from_slice(&raw).map_err(|e| {
            self.downstream_error(InvocationFailure::InvalidPayload {
                message: e.to_string(),
            })
        })?;

        Ok(response)
    }

    fn downstream_error(&self, source: InvocationFailure) -> HitCounterError {
        counter!("hit_counter.downstream.failure", 1);
        HitCounterError::DownstreamInvocation {
            target: self.downstream.target().name.clone(),
            source,
        }
    }
}

fn routing_key(envelope: &Value) -> Result<&str> {
    match envelope.get(ROUTING_KEY_FIELD) {
        Some(Value::String(path)) if !path.is_empty() => Ok(path),
        Some(Value::String(_)) => Err(HitCounterError::malformed("`path` is empty")),
        Some(_) => Err(HitCounterError::malformed("`path` must be a string")),
        None => Err(HitCounterError::malformed("missing `path`")),
    }
}
