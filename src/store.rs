//! Read-only access to pool and credential configuration records.
//!
//! The pool manager does not own durable state. Pool and credential records
//! live in an external relational store; this module abstracts that store
//! behind the [`ConfigStore`] trait, consulted at pool-initialization time
//! and on explicit refresh.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`] - in-memory maps, used by tests and demos and as the
//!   integration seam for the real persistence layer
//! - [`CachedStore`] - decorator that memoizes lookups in a `moka` future
//!   cache with a TTL, so repeated pool initializations do not hammer the
//!   backing store

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// Configuration record for one session pool.
///
/// Immutable snapshot: the registry reads it once when a pool is first
/// used. Changing a record requires cleaning up or closing the pool so the
/// next acquire re-initializes from the store.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PoolConfig {
    /// Pool identifier, unique within the store.
    pub id: String,

    /// Credential record used for every session in this pool.
    pub credential_id: String,

    /// Hard cap on live sessions (checked out + idle + in-flight creations).
    pub max_connections: u32,

    /// Warm floor: idle-timeout eviction keeps up to this many idle
    /// sessions per host.
    pub min_idle: u32,

    /// Upper bound on idle sessions per host; surplus is closed.
    pub max_idle: u32,

    /// Maximum time a session may sit unused before eviction (seconds).
    pub idle_timeout_secs: u64,

    /// Budget for a single connection attempt (seconds).
    pub connection_timeout_secs: u64,

    /// Maximum total age of a session regardless of usage (seconds).
    pub max_lifetime_secs: u64,
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

/// Credential record referenced by [`PoolConfig::credential_id`].
///
/// Handed to the session factory at creation time; never stored inside a
/// pooled session. Sessions carry only the SHA-256 fingerprint of the
/// secret so stale idle sessions can be detected after a rotation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Credential {
    pub id: String,
    pub username: String,
    pub secret: String,
}

impl Credential {
    /// SHA-256 fingerprint of the secret material.
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.finalize().into()
    }
}

/// Read-only view of the external configuration store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Looks up the pool configuration record for `pool_id`.
    async fn pool_config(&self, pool_id: &str) -> Option<PoolConfig>;

    /// Looks up the credential record for `credential_id`.
    async fn credential(&self, credential_id: &str) -> Option<Credential>;
}

/// In-memory [`ConfigStore`] backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    pools: RwLock<HashMap<String, PoolConfig>>,
    credentials: RwLock<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_pool(&self, config: PoolConfig) {
        self.pools.write().await.insert(config.id.clone(), config);
    }

    pub async fn insert_credential(&self, credential: Credential) {
        self.credentials
            .write()
            .await
            .insert(credential.id.clone(), credential);
    }

    pub async fn remove_pool(&self, pool_id: &str) {
        self.pools.write().await.remove(pool_id);
    }

    pub async fn remove_credential(&self, credential_id: &str) {
        self.credentials.write().await.remove(credential_id);
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn pool_config(&self, pool_id: &str) -> Option<PoolConfig> {
        self.pools.read().await.get(pool_id).cloned()
    }

    async fn credential(&self, credential_id: &str) -> Option<Credential> {
        self.credentials.read().await.get(credential_id).cloned()
    }
}

/// Caching decorator around another [`ConfigStore`].
///
/// Lookups are memoized for `ttl`; [`CachedStore::refresh`] drops all
/// cached records so the next lookup goes back to the inner store.
pub struct CachedStore<S> {
    inner: S,
    pools: Cache<String, PoolConfig>,
    credentials: Cache<String, Credential>,
}

impl<S: ConfigStore> CachedStore<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        let pools = Cache::builder().max_capacity(1024).time_to_live(ttl).build();
        let credentials = Cache::builder().max_capacity(1024).time_to_live(ttl).build();
        Self {
            inner,
            pools,
            credentials,
        }
    }

    /// Drops every cached record. Call after editing the backing store.
    pub fn refresh(&self) {
        self.pools.invalidate_all();
        self.credentials.invalidate_all();
    }
}

#[async_trait]
impl<S: ConfigStore> ConfigStore for CachedStore<S> {
    async fn pool_config(&self, pool_id: &str) -> Option<PoolConfig> {
        self.pools
            .optionally_get_with(pool_id.to_string(), async {
                self.inner.pool_config(pool_id).await
            })
            .await
    }

    async fn credential(&self, credential_id: &str) -> Option<Credential> {
        self.credentials
            .optionally_get_with(credential_id.to_string(), async {
                self.inner.credential(credential_id).await
            })
            .await
    }
}
