use crate::config::{DownstreamTarget, InvokerConfig};
use crate::error::InvocationFailure;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use reqwest::Client;
use std::time::Duration;

/// Synchronous call into a downstream compute unit.
#[async_trait]
pub trait DownstreamInvoker: Send + Sync {
    async fn invoke(
        &self,
        target: &DownstreamTarget,
        payload: Bytes,
    ) -> Result<Bytes, InvocationFailure>;
}

/// Invokes targets by POSTing the payload as JSON to their endpoint.
pub struct HttpInvoker {
    backend_cache: DashMap<String, Client>,
    default_timeout_ms: u64,
    retry_count: u32,
}

impl HttpInvoker {
    pub fn new(config: &InvokerConfig) -> Self {
        Self {
            backend_cache: DashMap::new(),
            default_timeout_ms: config.timeout_ms,
            retry_count: config.retry_count,
        }
    }

    fn client_for(&self, target: &DownstreamTarget) -> Result<Client, InvocationFailure> {
        if let Some(client) = self.backend_cache.get(&target.endpoint) {
            return Ok(client.value().clone());
        }

        let client = Client::builder()
            .build()
            .map_err(|e| InvocationFailure::Transport {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(self
            .backend_cache
            .entry(target.endpoint.clone())
            .or_insert(client)
            .value()
            .clone())
    }
}

#[async_trait]
impl DownstreamInvoker for HttpInvoker {
    async fn invoke(
        &self,
        target: &DownstreamTarget,
        payload: Bytes,
    ) -> Result<Bytes, InvocationFailure> {
        let client = self.client_for(target)?;
        let timeout_ms = target.timeout_ms.unwrap_or(self.default_timeout_ms);

        let mut last_failure = None;
        for attempt in 0..=self.retry_count {
            let result = client
                .post(&target.endpoint)
                .timeout(Duration::from_millis(timeout_ms))
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone())
                .send()
                .await;

            let failure = match result {
                Ok(resp) if resp.status().is_success() => {
                    counter!("hit_counter.invoke.attempt.success", 1);
                    return resp.bytes().await.map_err(|e| InvocationFailure::Transport {
                        message: format!("failed to read response body: {}", e),
                    });
                }
                Ok(resp) => {
                    // A downstream that answered is not retried.
                    counter!("hit_counter.invoke.attempt.status", 1);
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(InvocationFailure::Status { status, body });
                }
                Err(e) if e.is_connect() => {
                    // Never reached the downstream, so another attempt cannot double-invoke it.
                    counter!("hit_counter.invoke.attempt.failure", 1);
                    InvocationFailure::Transport {
                        message: e.to_string(),
                    }
                }
                Err(e) if e.is_timeout() => {
                    counter!("hit_counter.invoke.attempt.timeout", 1);
                    return Err(InvocationFailure::Timeout { timeout_ms });
                }
                Err(e) => {
                    counter!("hit_counter.invoke.attempt.failure", 1);
                    return Err(InvocationFailure::Transport {
                        message: e.to_string(),
                    });
                }
            };

            tracing::warn!(
                "Invoking '{}' failed (attempt {}): {}",
                target.name,
                attempt + 1,
                failure
            );
            last_failure = Some(failure);
        }

        Err(last_failure.unwrap_or_else(|| InvocationFailure::Transport {
            message: "no attempt was made".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use warp::Filter;

    async fn spawn_downstream() -> Downstream {
        let echo = warp::path("echo")
            .and(warp::post())
            .and(warp::body::bytes())
            .map(|body: Bytes| body.to_vec());

        let broken = warp::path("broken").and(warp::post()).map(|| {
            warp::reply::with_status("boom", warp::http::StatusCode::INTERNAL_SERVER_ERROR)
        });

        let slow_hits = Arc::new(AtomicUsize::new(0));
        let counted = slow_hits.clone();
        let slow = warp::path("slow").and(warp::post()).and_then(move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, warp::Rejection>("late")
            }
        });

        let (addr, server) = warp::serve(echo.or(broken).or(slow)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        Downstream { addr, slow_hits }
    }

    struct Downstream {
        addr: SocketAddr,
        slow_hits: Arc<AtomicUsize>,
    }

    fn target(addr: SocketAddr, path: &str) -> DownstreamTarget {
        DownstreamTarget::new("test", format!("http://{}/{}", addr, path))
    }

    #[tokio::test]
    async fn test_invoke_returns_raw_body() {
        let addr = spawn_downstream().await.addr;
        let invoker = HttpInvoker::new(&InvokerConfig::default());

        let payload = Bytes::from_static(br#"{"path":"/x","body":"abc"}"#);
        let response = invoker
            .invoke(&target(addr, "echo"), payload.clone())
            .await
            .unwrap();

        assert_eq!(response, payload);
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_failure() {
        let addr = spawn_downstream().await.addr;
        let invoker = HttpInvoker::new(&InvokerConfig::default());

        let err = invoker
            .invoke(&target(addr, "broken"), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            InvocationFailure::Status {
                status: 500,
                body: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_target_timeout_overrides_default() {
        let addr = spawn_downstream().await.addr;
        let invoker = HttpInvoker::new(&InvokerConfig {
            timeout_ms: 10_000,
            retry_count: 1,
        });

        let err = invoker
            .invoke(&target(addr, "slow").with_timeout_ms(50), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert_eq!(err, InvocationFailure::Timeout { timeout_ms: 50 });
    }

    #[tokio::test]
    async fn test_timed_out_request_is_not_sent_again() {
        let downstream = spawn_downstream().await;
        let invoker = HttpInvoker::new(&InvokerConfig {
            timeout_ms: 50,
            retry_count: 1,
        });

        let err = invoker
            .invoke(&target(downstream.addr, "slow"), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert_eq!(err, InvocationFailure::Timeout { timeout_ms: 50 });
        // Give a second attempt time to arrive if one was made.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(downstream.slow_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_fails_after_retries() {
        let invoker = HttpInvoker::new(&InvokerConfig {
            timeout_ms: 1000,
            retry_count: 2,
        });
        let target = DownstreamTarget::new("gone", "http://127.0.0.1:1/");

        let err = invoker
            .invoke(&target, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert!(matches!(err, InvocationFailure::Transport { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_a_transport_failure() {
        let invoker = HttpInvoker::new(&InvokerConfig::default());
        let target = DownstreamTarget::new("gone", "http://127.0.0.1:1/");

        let err = invoker
            .invoke(&target, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert!(matches!(err, InvocationFailure::Transport { .. }));
    }
}
