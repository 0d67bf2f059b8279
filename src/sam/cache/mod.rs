//! Pluggable cache layer.
//!
//! A [`CacheBackend`] is a small key/value contract with TTL, atomic
//! increment, glob-pattern clearing, and a get-or-set primitive. Two
//! backends ship in-tree:
//!
//! - [`MemoryCacheBackend`](memory::MemoryCacheBackend) — bounded LRU with
//!   lazy and background TTL enforcement, for single-process deployments
//!   and tests.
//! - [`RedisCacheBackend`](redis::RedisCacheBackend) — prefix-namespaced,
//!   JSON-encoded values over a multiplexed connection, for distributed
//!   deployments.
//!
//! The [`CacheEngine`](engine::CacheEngine) selects a backend from the
//! environment (`SAM_REDIS_URL` present → Redis, else memory) and
//! initializes it lazily on first use.
//!
//! Values travel as `serde_json::Value` so both backends can store the same
//! shapes the tool layer produces.

pub mod engine;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Cache statistics in the shape health endpoints expose.
///
/// `connection_info` is always scrubbed of credentials before it gets
/// here.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: i64,
    /// `-1` when the backend has no fixed bound (Redis).
    pub max_size: i64,
    pub backend_type: &'static str,
    pub connection_info: String,
}

/// Failures surfaced by cache backends.
#[derive(Debug)]
pub enum CacheError {
    /// The backend was used before [`CacheBackend::initialize`].
    NotInitialized,
    /// Transport or server-side failure.
    Backend(String),
    /// A stored value could not be encoded or decoded.
    Serialization(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::NotInitialized => write!(f, "Cache backend not initialized"),
            CacheError::Backend(msg) => write!(f, "Cache backend error: {}", msg),
            CacheError::Serialization(msg) => write!(f, "Cache serialization error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

/// Boxed async factory used by [`CacheBackend::get_or_set`]. Only polled
/// when the key is missing.
pub type ValueFactory<'a> =
    Pin<Box<dyn Future<Output = Result<Value, CacheError>> + Send + 'a>>;

/// Build a [`ValueFactory`] from any future producing a value.
pub fn factory<'a, F>(fut: F) -> ValueFactory<'a>
where
    F: Future<Output = Result<Value, CacheError>> + Send + 'a,
{
    Box::pin(fut)
}

/// Backend-agnostic cache contract.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Connect / start background maintenance.
    async fn initialize(&self) -> Result<(), CacheError>;

    /// Disconnect and stop background maintenance.
    async fn close(&self) -> Result<(), CacheError>;

    /// Fetch a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value. `ttl: None` means no expiry on the memory backend
    /// and the configured default TTL on Redis.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Whether the key exists and has not expired.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove entries matching a glob pattern (`*`/`?` wildcards), or all
    /// entries when `pattern` is `None`. Returns the number removed.
    async fn clear(&self, pattern: Option<&str>) -> Result<u64, CacheError>;

    /// Atomically add `amount` to a counter key, creating it at `amount`.
    /// Returns the new value.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, CacheError>;

    /// Fetch a value, or compute and store it on a miss. Concurrent
    /// callers for the same missing key on one backend instance observe a
    /// single factory invocation (memory) or a best-effort equivalent
    /// (Redis).
    async fn get_or_set(
        &self,
        key: &str,
        factory: ValueFactory<'_>,
        ttl: Option<Duration>,
    ) -> Result<Value, CacheError>;

    /// Current statistics.
    async fn stats(&self) -> CacheStats;
}
