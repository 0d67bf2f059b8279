//! Argument-hashed cache for tool results.
//!
//! Tool results are keyed by a stable hash of the tool name and its
//! canonicalized JSON arguments, so semantically equal calls hit the same
//! entry regardless of argument key order. Mutating tools stay out of the
//! cache entirely — cacheability is an opt-in flag on the
//! [`ToolSpec`](crate::tool_registry::ToolSpec) — and a tool's entries can
//! be invalidated as a group after a write elsewhere invalidates its
//! reads.

use log::info;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::memory::MemoryCacheBackend;
use crate::cache::{CacheBackend, CacheError, CacheStats};

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_MAX_SIZE: usize = 1_000;
const DEFAULT_KEY_PREFIX: &str = "sam:";

/// Serialize a JSON value with stable key ordering at every level.
///
/// `serde_json`'s default object representation keeps keys sorted, so the
/// plain serialization is already canonical; this function exists to make
/// that contract explicit at call sites and in tests.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// High-level cache for tool results with automatic key generation.
pub struct ToolResultCache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
    default_ttl: Duration,
    enabled: bool,
}

impl ToolResultCache {
    /// Create a cache over the given backend.
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        let enabled = std::env::var("SAM_CACHE_ENABLED")
            .map(|v| v == "1")
            .unwrap_or(true);
        let default_ttl = std::env::var("SAM_CACHE_DEFAULT_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL);
        let prefix = std::env::var("SAM_CACHE_KEY_PREFIX")
            .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string());

        if enabled {
            info!("Tool result cache enabled");
        } else {
            info!("Tool result cache disabled");
        }

        Self {
            backend,
            prefix,
            default_ttl,
            enabled,
        }
    }

    /// Create a cache over a fresh bounded in-memory backend.
    pub fn in_memory() -> Self {
        let max_size = std::env::var("SAM_CACHE_MAX_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_SIZE);
        Self::new(Arc::new(MemoryCacheBackend::new(max_size)))
    }

    /// Start backend maintenance (the in-memory TTL sweep, or the Redis
    /// connection).
    pub async fn initialize(&self) -> Result<(), CacheError> {
        self.backend.initialize().await
    }

    /// Generate the cache key for a tool call:
    /// `<prefix>tool:<name>:<sha256(name + canonical_json(args))[..16]>`.
    pub fn generate_key(&self, tool_name: &str, args: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tool_name.as_bytes());
        hasher.update(canonical_json(args).as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            hex.push_str(&format!("{:02x}", byte));
        }
        format!("{}tool:{}:{}", self.prefix, tool_name, hex)
    }

    /// Fetch a cached result for this exact call, if present.
    pub async fn get_tool_result(
        &self,
        tool_name: &str,
        args: &Value,
    ) -> Result<Option<Value>, CacheError> {
        if !self.enabled {
            return Ok(None);
        }
        self.backend.get(&self.generate_key(tool_name, args)).await
    }

    /// Cache a successful result for this call.
    pub async fn set_tool_result(
        &self,
        tool_name: &str,
        args: &Value,
        result: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let key = self.generate_key(tool_name, args);
        self.backend
            .set(&key, result, Some(ttl.unwrap_or(self.default_ttl)))
            .await
    }

    /// Drop every cached result for one tool; returns how many entries
    /// were removed.
    pub async fn invalidate_tool(&self, tool_name: &str) -> Result<u64, CacheError> {
        if !self.enabled {
            return Ok(0);
        }
        let pattern = format!("{}tool:{}:*", self.prefix, tool_name);
        let removed = self.backend.clear(Some(&pattern)).await?;
        info!(
            "Invalidated {} cached results for tool '{}'",
            removed, tool_name
        );
        Ok(removed)
    }

    /// Drop every cached tool result.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        if !self.enabled {
            return Ok(0);
        }
        self.backend.clear(Some(&format!("{}tool:*", self.prefix))).await
    }

    /// Backend statistics.
    pub async fn stats(&self) -> CacheStats {
        self.backend.stats().await
    }

    /// Whether caching is active for this process.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Stop backend maintenance.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        self.backend.close().await?;
        info!("Tool result cache shutdown completed");
        Ok(())
    }
}
