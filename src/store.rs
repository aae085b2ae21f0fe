//! Counter store contract and its backends.
//!
//! A store maps a routing path to the number of hits recorded for it. The only
//! mutation is an atomic increment by one; records appear on their first
//! increment and are never removed here.

use crate::error::{HitCounterError, Result, StoreFailure};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One counted routing path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub key: String,
    pub count: u64,
}

/// Parameters a store is provisioned with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSpec {
    pub name: String,
    pub read_capacity: u32,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Name the store was provisioned under.
    fn name(&self) -> &str;

    /// Add one to the counter for `key` and return the new count.
    ///
    /// Unseen keys start at zero. Concurrent increments of the same key must
    /// never be lost.
    async fn increment(&self, key: &str) -> std::result::Result<u64, StoreFailure>;

    async fn get(&self, key: &str) -> std::result::Result<Option<u64>, StoreFailure>;

    /// All records, ordered by key.
    async fn records(&self) -> std::result::Result<Vec<CounterRecord>, StoreFailure>;
}

/// Creates fresh stores at provisioning time.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn create(&self, spec: &StoreSpec) -> Result<Arc<dyn CounterStore>>;
}

/// Process-local store backed by a sharded map.
#[derive(Debug)]
pub struct MemoryCounterStore {
    name: String,
    counters: DashMap<String, u64>,
}

impl MemoryCounterStore {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            counters: DashMap::new(),
        }
    }

    pub fn with_capacity<S: Into<String>>(name: S, capacity: usize) -> Self {
        Self {
            name: name.into(),
            counters: DashMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn increment(&self, key: &str) -> std::result::Result<u64, StoreFailure> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut count = self.counters.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn get(&self, key: &str) -> std::result::Result<Option<u64>, StoreFailure> {
        Ok(self.counters.get(key).map(|count| *count))
    }

    async fn records(&self) -> std::result::Result<Vec<CounterRecord>, StoreFailure> {
        let mut records: Vec<_> = self
            .counters
            .iter()
            .map(|entry| CounterRecord {
                key: entry.key().clone(),
                count: *entry.value(),
            })
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }
}

/// Builds an empty [`MemoryCounterStore`] sized by the read capacity.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStoreFactory;

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    async fn create(&self, spec: &StoreSpec) -> Result<Arc<dyn CounterStore>> {
        if spec.name.is_empty() {
            return Err(HitCounterError::Provisioning {
                stage: "creating the counter store".to_string(),
                reason: "store name cannot be empty".to_string(),
            });
        }

        Ok(Arc::new(MemoryCounterStore::with_capacity(
            spec.name.clone(),
            spec.read_capacity as usize,
        )))
    }
}

#[cfg(feature = "redis")]
pub use self::redis_backend::{RedisCounterStore, RedisStoreFactory};

#[cfg(feature = "redis")]
mod redis_backend {
    use super::{CounterRecord, CounterStore, StoreFactory, StoreSpec};
    use crate::error::{HitCounterError, Result, StoreFailure};
    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;
    use redis::AsyncCommands;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Counters kept in a Redis hash named after the store, one field per path.
    pub struct RedisCounterStore {
        name: String,
        conn: MultiplexedConnection,
    }

    impl RedisCounterStore {
        pub fn new(name: String, conn: MultiplexedConnection) -> Self {
            Self { name, conn }
        }
    }

    pub(super) fn store_failure(err: redis::RedisError) -> StoreFailure {
        // ACL rejections arrive as a NOPERM reply rather than an auth failure.
        let denied = err.kind() == redis::ErrorKind::AuthenticationFailed
            || err.code() == Some("NOPERM");

        if denied {
            StoreFailure::PermissionDenied {
                message: err.to_string(),
            }
        } else {
            StoreFailure::Unavailable {
                message: err.to_string(),
            }
        }
    }

    #[async_trait]
    impl CounterStore for RedisCounterStore {
        fn name(&self) -> &str {
            &self.name
        }

        async fn increment(&self, key: &str) -> std::result::Result<u64, StoreFailure> {
            let mut conn = self.conn.clone();
            conn.hincr(&self.name, key, 1u64).await.map_err(store_failure)
        }

        async fn get(&self, key: &str) -> std::result::Result<Option<u64>, StoreFailure> {
            let mut conn = self.conn.clone();
            conn.hget(&self.name, key).await.map_err(store_failure)
        }

        async fn records(&self) -> std::result::Result<Vec<CounterRecord>, StoreFailure> {
            let mut conn = self.conn.clone();
            let all: HashMap<String, u64> =
                conn.hgetall(&self.name).await.map_err(store_failure)?;
            let mut records: Vec<_> = all
                .into_iter()
                .map(|(key, count)| CounterRecord { key, count })
                .collect();
            records.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(records)
        }
    }

    /// Connects to Redis and hands out hash-backed stores.
    pub struct RedisStoreFactory {
        url: String,
    }

    impl RedisStoreFactory {
        pub fn new<S: Into<String>>(url: S) -> Self {
            Self { url: url.into() }
        }
    }

    #[async_trait]
    impl StoreFactory for RedisStoreFactory {
        async fn create(&self, spec: &StoreSpec) -> Result<Arc<dyn CounterStore>> {
            let provisioning = |reason: String| HitCounterError::Provisioning {
                stage: "connecting to redis".to_string(),
                reason,
            };

            let client = redis::Client::open(self.url.as_str())
                .map_err(|e| provisioning(e.to_string()))?;
            let mut conn = client
                .get_multiplexed_tokio_connection()
                .await
                .map_err(|e| provisioning(e.to_string()))?;

            let existing: u64 = conn
                .hlen(&spec.name)
                .await
                .map_err(|e| provisioning(e.to_string()))?;
            if existing > 0 {
                tracing::warn!(
                    "Counter store '{}' already holds {} records; counting continues from them",
                    spec.name,
                    existing
                );
            }

            tracing::info!("Counter store '{}' backed by redis at {}", spec.name, self.url);
            Ok(Arc::new(RedisCounterStore::new(spec.name.clone(), conn)))
        }
    }
}
