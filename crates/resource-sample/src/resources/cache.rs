//! Key/value cache resource.
//!
//! Entries expire after their TTL and are dropped lazily, on the next read of the
//! key or on [`CacheClient::purge_expired`]. There is no capacity bound.

use crate::config::CacheConfig;
use crate::resources::memory_host;
use async_trait::async_trait;
use resource_framework::{Resource, ResourceError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

const NAME: &str = "cache";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Handle to a connected cache.
#[derive(Debug)]
pub struct CacheClient {
    entries: Mutex<HashMap<String, Entry>>,
    default_ttl: Duration,
}

impl CacheClient {
    fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
            debug!(key, "Cache entry expired");
        }
        None
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        let entry = Entry {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.into(), entry);
    }

    /// Returns whether the key was present.
    pub async fn delete(&self, key: &str) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        match self.get(key).await {
            Some(raw) => serde_json::from_str(&raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw).await;
        Ok(())
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// The cache resource. A fresh, empty [`CacheClient`] is created on each connect.
pub struct Cache {
    config: CacheConfig,
    client: RwLock<Option<Arc<CacheClient>>>,
}

impl Cache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    fn poisoned() -> ResourceError {
        ResourceError::Failed {
            resource: NAME.to_string(),
            reason: "connection state poisoned".into(),
        }
    }

    pub fn client(&self) -> Result<Arc<CacheClient>, ResourceError> {
        self.client
            .read()
            .map_err(|_| Self::poisoned())?
            .clone()
            .ok_or_else(|| ResourceError::NotConnected(NAME.to_string()))
    }
}

#[async_trait]
impl Resource for Cache {
    #[instrument(name = "cache.connect", skip(self), fields(url = %self.config.url))]
    async fn connect(&self) -> Result<(), ResourceError> {
        let host = memory_host(NAME, &self.config.url)?;
        info!(host, ttl_ms = self.config.default_ttl.as_millis() as u64, "Connecting to cache");
        {
            let mut slot = self.client.write().map_err(|_| Self::poisoned())?;
            *slot = Some(Arc::new(CacheClient::new(self.config.default_ttl)));
        }
        self.ping().await?;
        info!("Successfully connected to cache");
        Ok(())
    }

    async fn close(&self) -> Result<(), ResourceError> {
        let client = self.client.write().map_err(|_| Self::poisoned())?.take();
        if client.is_some() {
            info!("Cache connection closed");
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), ResourceError> {
        let client = self.client()?;
        match tokio::time::timeout(self.config.ping_timeout, client.len()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(ResourceError::Timeout {
                resource: NAME.to_string(),
                after: self.config.ping_timeout,
            }),
        }
    }

    fn name(&self) -> &str {
        NAME
    }
}
