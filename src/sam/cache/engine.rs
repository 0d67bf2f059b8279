//! Cache engine: backend selection and lifecycle.
//!
//! The engine picks Redis when a connection URL is configured
//! (`SAM_REDIS_URL`) and the in-memory backend otherwise, initializes the
//! backend lazily behind a lock on first use, and delegates the common
//! operations so callers never touch backend types directly.

use log::info;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::memory::MemoryCacheBackend;
use super::redis::RedisCacheBackend;
use super::{CacheBackend, CacheError, CacheStats, ValueFactory};

const DEFAULT_MEMORY_MAX_SIZE: usize = 10_000;
const DEFAULT_REDIS_TTL_SECS: u64 = 3_600;
const DEFAULT_KEY_PREFIX: &str = "sam:";

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Central cache engine that manages backend lifecycle.
pub struct CacheEngine {
    redis_url: Option<String>,
    backend: Mutex<Option<Arc<dyn CacheBackend>>>,
}

impl CacheEngine {
    /// Create an engine with an explicit Redis URL (`None` → in-memory).
    pub fn new(redis_url: Option<String>) -> Self {
        Self {
            redis_url,
            backend: Mutex::new(None),
        }
    }

    /// Create an engine from the environment (`SAM_REDIS_URL`).
    pub fn from_env() -> Self {
        Self::new(std::env::var("SAM_REDIS_URL").ok())
    }

    /// Which backend this engine selects.
    pub fn backend_type(&self) -> &'static str {
        if self.redis_url.is_some() {
            "redis"
        } else {
            "memory"
        }
    }

    /// Get the backend, initializing it on first use.
    pub async fn backend(&self) -> Result<Arc<dyn CacheBackend>, CacheError> {
        let mut guard = self.backend.lock().await;
        if let Some(backend) = guard.as_ref() {
            return Ok(Arc::clone(backend));
        }

        let backend: Arc<dyn CacheBackend> = match &self.redis_url {
            Some(redis_url) => {
                let prefix = std::env::var("SAM_CACHE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string());
                let default_ttl = Duration::from_secs(env_u64(
                    "SAM_CACHE_DEFAULT_TTL",
                    DEFAULT_REDIS_TTL_SECS,
                ));
                Arc::new(RedisCacheBackend::new(redis_url.clone(), prefix, default_ttl))
            }
            None => {
                let max_size = env_usize("SAM_CACHE_MAX_SIZE", DEFAULT_MEMORY_MAX_SIZE);
                Arc::new(MemoryCacheBackend::new(max_size))
            }
        };

        backend.initialize().await?;
        info!("Cache engine initialized: {}", self.backend_type());
        *guard = Some(Arc::clone(&backend));
        Ok(backend)
    }

    /// Close the backend, if it was ever initialized.
    pub async fn close(&self) -> Result<(), CacheError> {
        let mut guard = self.backend.lock().await;
        if let Some(backend) = guard.take() {
            backend.close().await?;
        }
        Ok(())
    }

    // Delegates for the common operations.

    /// Fetch a value from the selected backend.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.backend().await?.get(key).await
    }

    /// Store a value in the selected backend.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.backend().await?.set(key, value, ttl).await
    }

    /// Delete a key from the selected backend.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.backend().await?.delete(key).await
    }

    /// Atomic counter increment on the selected backend.
    pub async fn increment(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        self.backend().await?.increment(key, amount).await
    }

    /// Get-or-compute on the selected backend.
    pub async fn get_or_set(
        &self,
        key: &str,
        factory: ValueFactory<'_>,
        ttl: Option<Duration>,
    ) -> Result<Value, CacheError> {
        self.backend().await?.get_or_set(key, factory, ttl).await
    }

    /// Clear entries matching a glob pattern (or everything).
    pub async fn clear(&self, pattern: Option<&str>) -> Result<u64, CacheError> {
        self.backend().await?.clear(pattern).await
    }

    /// Statistics from the selected backend.
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.backend().await?.stats().await)
    }
}
