//! In-memory cache backend for single-process deployments and tests.

use async_trait::async_trait;
use log::{debug, error, info};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{CacheBackend, CacheError, CacheStats, ValueFactory};

/// How often the background sweep removes expired entries.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Single cache entry with optional expiration.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    /// `None` means no expiry.
    expires_at: Option<Instant>,
    /// Monotone access counter used for LRU ordering.
    last_access_tick: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Instant::now() > at,
            None => false,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl MemoryState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Fetch a live entry, advancing its access tick. Expired entries are
    /// removed on the way.
    fn get_live(&mut self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(),
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        let tick = self.next_tick();
        self.entries.get_mut(key).map(|entry| {
            entry.last_access_tick = tick;
            entry.value.clone()
        })
    }

    /// Evict the entry not accessed longest. Called only when inserting a
    /// new key into a full cache.
    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access_tick)
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            debug!("Cache EVICT (LRU): {}", key);
            self.entries.remove(&key);
        }
    }

    fn insert(&mut self, key: &str, value: Value, ttl: Option<Duration>, max_size: usize) {
        if !self.entries.contains_key(key) && self.entries.len() >= max_size {
            self.evict_lru();
        }
        let tick = self.next_tick();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
                last_access_tick: tick,
            },
        );
    }

    fn remove_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        expired.len()
    }
}

/// Bounded LRU cache with TTL support.
///
/// All operations serialize under one lock; entries are microseconds of
/// work, so contention stays negligible. TTLs are enforced lazily on
/// access and eagerly by a background sweep started in
/// [`initialize`](CacheBackend::initialize).
pub struct MemoryCacheBackend {
    max_size: usize,
    state: Arc<Mutex<MemoryState>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryCacheBackend {
    /// Create a backend bounded at `max_size` entries.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            state: Arc::new(Mutex::new(MemoryState::default())),
            cleanup_task: Mutex::new(None),
        }
    }

    /// Remove all expired entries now; returns how many were dropped.
    /// The background sweep calls this on its interval.
    pub async fn cleanup_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let removed = state.remove_expired();
        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn initialize(&self) -> Result<(), CacheError> {
        info!("Initializing in-memory cache (max_size: {})", self.max_size);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                let mut state = state.lock().await;
                let removed = state.remove_expired();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        });
        let mut task = self.cleanup_task.lock().await;
        if let Some(old) = task.replace(handle) {
            error!("In-memory cache initialized twice; stopping stale sweep");
            old.abort();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        if let Some(handle) = self.cleanup_task.lock().await.take() {
            handle.abort();
        }
        let mut state = self.state.lock().await;
        state.entries.clear();
        info!("In-memory cache closed");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut state = self.state.lock().await;
        match state.get_live(key) {
            Some(value) => {
                state.hits += 1;
                Ok(Some(value))
            }
            None => {
                state.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        state.insert(key, value, ttl, self.max_size);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut state = self.state.lock().await;
        Ok(state.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut state = self.state.lock().await;
        match state.entries.get(key) {
            None => Ok(false),
            Some(entry) if entry.is_expired() => {
                state.entries.remove(key);
                Ok(false)
            }
            Some(_) => Ok(true),
        }
    }

    async fn clear(&self, pattern: Option<&str>) -> Result<u64, CacheError> {
        let mut state = self.state.lock().await;
        match pattern {
            None => {
                let count = state.entries.len() as u64;
                state.entries.clear();
                Ok(count)
            }
            Some(pattern) => {
                let matcher = glob::Pattern::new(pattern)
                    .map_err(|e| CacheError::Backend(format!("bad pattern '{}': {}", pattern, e)))?;
                let keys: Vec<String> = state
                    .entries
                    .keys()
                    .filter(|k| matcher.matches(k))
                    .cloned()
                    .collect();
                for key in &keys {
                    state.entries.remove(key);
                }
                Ok(keys.len() as u64)
            }
        }
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        let mut state = self.state.lock().await;
        let current = match state.entries.get(key) {
            Some(entry) if !entry.is_expired() => entry.value.as_i64().unwrap_or(0),
            _ => 0,
        };
        let new_value = current + amount;
        // Counters never expire unless explicitly re-set with a TTL.
        state.insert(key, Value::from(new_value), None, self.max_size);
        Ok(new_value)
    }

    async fn get_or_set(
        &self,
        key: &str,
        factory: ValueFactory<'_>,
        ttl: Option<Duration>,
    ) -> Result<Value, CacheError> {
        // The lock is held across the factory so concurrent callers for the
        // same missing key invoke it exactly once.
        let mut state = self.state.lock().await;
        if let Some(value) = state.get_live(key) {
            state.hits += 1;
            return Ok(value);
        }
        state.misses += 1;
        let value = factory.await?;
        state.insert(key, value.clone(), ttl, self.max_size);
        Ok(value)
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            size: state.entries.len() as i64,
            max_size: self.max_size as i64,
            backend_type: "memory",
            connection_info: "in-process".to_string(),
        }
    }
}
