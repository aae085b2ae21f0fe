//! Diagnostic hooks around each handled request.

use serde_json::Value;
use std::time::Duration;

/// Sees each inbound envelope and each raw downstream response.
///
/// Hooks return nothing, so they cannot change how a request is handled.
pub trait RequestObserver: Send + Sync {
    fn on_request(&self, _envelope: &Value) {}

    fn on_response(&self, _path: &str, _raw: &[u8]) {}

    /// Called once per request, whether it succeeded or not.
    fn on_complete(&self, _elapsed: Duration, _succeeded: bool) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {}

/// Logs request and response bodies at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn on_request(&self, envelope: &Value) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let pretty = serde_json::to_string_pretty(envelope).unwrap_or_default();
            tracing::debug!("request: {}", pretty);
        }
    }

    fn on_response(&self, path: &str, raw: &[u8]) {
        tracing::debug!(path, "downstream response: {}", String::from_utf8_lossy(raw));
    }

    fn on_complete(&self, elapsed: Duration, succeeded: bool) {
        tracing::debug!(succeeded, "request finished in {:?}", elapsed);
    }
}
