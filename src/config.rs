// src/config.rs
use crate::error::{HitCounterError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::ops::Range;
use std::path::Path;

/// Read capacity used when a configuration does not carry a hint.
pub const DEFAULT_CAPACITY_HINT: u32 = 5;

/// Accepted values for `capacity_hint`.
pub const CAPACITY_HINT_RANGE: Range<i64> = 5..20;

/// Reference to the compute unit hits are forwarded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamTarget {
    pub name: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl DownstreamTarget {
    pub fn new<N: Into<String>, E: Into<String>>(name: N, endpoint: E) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Everything provisioning needs to wire a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub downstream_target: DownstreamTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_hint: Option<i64>,
}

impl HandlerConfig {
    pub fn new(downstream_target: DownstreamTarget) -> Self {
        Self {
            downstream_target,
            capacity_hint: None,
        }
    }

    pub fn with_capacity_hint(mut self, capacity_hint: i64) -> Self {
        self.capacity_hint = Some(capacity_hint);
        self
    }

    /// Validate the hint and return the read capacity the store is provisioned with.
    pub fn read_capacity(&self) -> Result<u32> {
        match self.capacity_hint {
            None => Ok(DEFAULT_CAPACITY_HINT),
            Some(hint) if CAPACITY_HINT_RANGE.contains(&hint) => Ok(hint as u32),
            Some(hint) => Err(HitCounterError::configuration(format!(
                "capacity_hint must be at least {} and less than {}, got {}",
                CAPACITY_HINT_RANGE.start, CAPACITY_HINT_RANGE.end, hint
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_name")]
    pub name: String,
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_store_name(),
            backend: StoreBackend::Memory,
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_metrics_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Top-level configuration of the hit counter service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub hit_counter: HandlerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub invoker: InvokerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    pub fn new(hit_counter: HandlerConfig) -> Self {
        Self {
            listen_addr: default_listen_addr(),
            hit_counter,
            store: StoreConfig::default(),
            invoker: InvokerConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        let config = Self::parse(&content, extension)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Parse configuration text; `format` is a file extension and defaults to YAML.
    pub fn parse(content: &str, format: &str) -> anyhow::Result<Self> {
        let config: ServiceConfig = match format {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => serde_yaml::from_str(content)?,
        };
        Ok(config)
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        parse_addr("listen_addr", &self.listen_addr)
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_socket_addr()?;
        self.hit_counter.read_capacity()?;

        if self.metrics.enabled {
            parse_addr("metrics.listen_addr", &self.metrics.listen_addr)?;
        }

        if self.store.name.is_empty() {
            return Err(HitCounterError::configuration("store.name cannot be empty"));
        }

        if self.store.backend == StoreBackend::Redis {
            if self.store.url.as_deref().map_or(true, str::is_empty) {
                return Err(HitCounterError::configuration(
                    "store.url is required for the redis backend",
                ));
            }
            if !cfg!(feature = "redis") {
                return Err(HitCounterError::configuration(
                    "the redis backend requires the `redis` feature",
                ));
            }
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(HitCounterError::configuration(format!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value.parse().map_err(|e| {
        HitCounterError::configuration(format!("invalid {} '{}': {}", field, value, e))
    })
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_name() -> String {
    "hits".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
