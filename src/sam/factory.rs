//! Agent Factory
//!
//! Builds and caches one [`SamAgent`] per caller identity so multi-tenant
//! hosts get isolated agents while single-tenant flows keep the previous
//! one-agent-per-process behaviour. The cache key comes from
//! [`RequestContext::cache_key`].
//!
//! Lookup uses double-checked locking: the hot path takes only the shared
//! read lock; the slow path re-checks under the write lock before
//! building, so concurrent first callers for one identity build exactly
//! one agent.

use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::agent::{AgentError, SamAgent};
use crate::context::RequestContext;

/// Builds a fully wired agent for a caller identity. Hosts implement this
/// to pick the provider, system prompt, and per-context overrides.
#[async_trait]
pub trait AgentBuilder: Send + Sync {
    /// Build an agent for this context.
    async fn build(&self, ctx: &RequestContext) -> Result<Arc<SamAgent>, AgentError>;
}

/// Per-context agent cache.
pub struct AgentFactory {
    builder: Arc<dyn AgentBuilder>,
    agents: RwLock<HashMap<String, Arc<SamAgent>>>,
}

impl AgentFactory {
    /// Create a factory over the given builder.
    pub fn new(builder: Arc<dyn AgentBuilder>) -> Self {
        Self {
            builder,
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cached agent for this context, building it on first use.
    pub async fn get_agent(&self, ctx: &RequestContext) -> Result<Arc<SamAgent>, AgentError> {
        let cache_key = ctx.cache_key().to_string();

        {
            let agents = self.agents.read().await;
            if let Some(agent) = agents.get(&cache_key) {
                return Ok(Arc::clone(agent));
            }
        }

        let mut agents = self.agents.write().await;
        // Re-check inside the lock to avoid duplicate builds.
        if let Some(agent) = agents.get(&cache_key) {
            return Ok(Arc::clone(agent));
        }
        let agent = self.builder.build(ctx).await?;
        agents.insert(cache_key, Arc::clone(&agent));
        Ok(agent)
    }

    /// Number of cached agents.
    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    /// Whether any agents are cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Dispose the cached agent for this context (or the default one).
    /// Close errors are swallowed so teardown always completes.
    pub async fn clear(&self, ctx: &RequestContext) {
        let cache_key = ctx.cache_key().to_string();
        let agent = {
            let mut agents = self.agents.write().await;
            agents.remove(&cache_key)
        };
        if let Some(agent) = agent {
            if let Err(e) = agent.close().await {
                debug!("Failed to close cached agent '{}': {}", cache_key, e);
            }
        }
    }

    /// Dispose every cached agent. One stuck agent cannot block teardown
    /// of the others.
    pub async fn clear_all(&self) {
        let drained: Vec<(String, Arc<SamAgent>)> = {
            let mut agents = self.agents.write().await;
            agents.drain().collect()
        };
        for (cache_key, agent) in drained {
            if let Err(e) = agent.close().await {
                debug!("Failed to close cached agent '{}': {}", cache_key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::db::engine::DatabaseEngine;
    use crate::event_bus::EventBus;
    use crate::memory::MemoryStore;
    use crate::provider::{ChatResponse, LLMProvider, Message, ProviderError, ToolDefinition};
    use crate::tool_cache::ToolResultCache;
    use crate::tool_registry::ToolRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullProvider;

    #[async_trait]
    impl LLMProvider for NullProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse::default())
        }

        fn model_name(&self) -> &str {
            "null"
        }
    }

    struct CountingBuilder {
        dir: tempfile::TempDir,
        builds: AtomicUsize,
    }

    #[async_trait]
    impl AgentBuilder for CountingBuilder {
        async fn build(&self, _ctx: &RequestContext) -> Result<Arc<SamAgent>, AgentError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            let url = format!(
                "sqlite:///{}",
                self.dir.path().join("f.db").to_string_lossy()
            );
            let bus = EventBus::new();
            let cache = Arc::new(ToolResultCache::in_memory());
            let registry = Arc::new(ToolRegistry::new(bus.clone(), cache));
            let memory = Arc::new(MemoryStore::new(Arc::new(DatabaseEngine::new(url))));
            let breaker = Arc::new(CircuitBreaker::new(
                "factory-test",
                CircuitBreakerConfig::default(),
            ));
            Ok(Arc::new(SamAgent::new(
                Arc::new(NullProvider),
                registry,
                memory,
                bus,
                breaker,
            )))
        }
    }

    fn factory() -> (Arc<AgentFactory>, Arc<CountingBuilder>) {
        let builder = Arc::new(CountingBuilder {
            dir: tempfile::tempdir().expect("tempdir"),
            builds: AtomicUsize::new(0),
        });
        (
            Arc::new(AgentFactory::new(builder.clone() as Arc<dyn AgentBuilder>)),
            builder,
        )
    }

    #[tokio::test]
    async fn test_same_context_reuses_agent() {
        let (factory, builder) = factory();
        let ctx = RequestContext::new("alice");

        let a = factory.get_agent(&ctx).await.unwrap();
        let b = factory.get_agent(&ctx).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_contexts_get_distinct_agents() {
        let (factory, builder) = factory();
        let a = factory.get_agent(&RequestContext::new("alice")).await.unwrap();
        let b = factory.get_agent(&RequestContext::new("bob")).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
        assert_eq!(factory.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_callers_build_once() {
        let (factory, builder) = factory();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let factory = Arc::clone(&factory);
            handles.push(tokio::spawn(async move {
                factory.get_agent(&RequestContext::new("alice")).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_and_clear_all() {
        let (factory, builder) = factory();
        let ctx = RequestContext::new("alice");
        let _ = factory.get_agent(&ctx).await.unwrap();
        factory.clear(&ctx).await;
        assert!(factory.is_empty().await);

        let _ = factory.get_agent(&ctx).await.unwrap();
        let _ = factory.get_agent(&RequestContext::new("bob")).await.unwrap();
        factory.clear_all().await;
        assert!(factory.is_empty().await);
        assert_eq!(builder.builds.load(Ordering::SeqCst), 3);
    }
}
