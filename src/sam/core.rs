//! Core root.
//!
//! One [`Core`] owns every process-wide collaborator — event bus, database
//! engine, cache engine, tool-result cache, tool registry, and session
//! memory — and is passed by reference instead of living in true globals.
//! Tests build isolated `Core`s; embedding hosts build one at startup,
//! hand it to the [`AgentFactory`](crate::factory::AgentFactory), and call
//! [`Core::close`] on shutdown.

use async_trait::async_trait;
use log::{debug, info};
use std::error::Error;
use std::sync::Arc;

use crate::agent::{AgentError, SamAgent};
use crate::cache::engine::CacheEngine;
use crate::circuit_breaker::{get_circuit_breaker, CircuitBreakerConfig};
use crate::context::RequestContext;
use crate::db::engine::DatabaseEngine;
use crate::event_bus::EventBus;
use crate::factory::AgentBuilder;
use crate::memory::MemoryStore;
use crate::plugin_policy::PluginPolicy;
use crate::plugins::{load_plugins, EntryPoint};
use crate::provider::LLMProvider;
use crate::tool_cache::ToolResultCache;
use crate::tool_registry::ToolRegistry;

/// Process-wide collaborators, built once and shared by reference.
pub struct Core {
    bus: EventBus,
    db: Arc<DatabaseEngine>,
    cache: Arc<CacheEngine>,
    tool_cache: Arc<ToolResultCache>,
    registry: Arc<ToolRegistry>,
    memory: Arc<MemoryStore>,
}

impl Core {
    /// Build the core from the environment: database from
    /// `SAM_DATABASE_URL`, cache from `SAM_REDIS_URL`, memory migrations
    /// applied, tool cache sweeping.
    pub async fn from_env() -> Result<Arc<Core>, Box<dyn Error + Send + Sync>> {
        Self::build(DatabaseEngine::from_env(), CacheEngine::from_env()).await
    }

    /// Build the core over explicit engines (used by tests).
    pub async fn build(
        db: DatabaseEngine,
        cache: CacheEngine,
    ) -> Result<Arc<Core>, Box<dyn Error + Send + Sync>> {
        let bus = EventBus::new();
        let db = Arc::new(db);
        let cache = Arc::new(cache);

        let tool_cache = Arc::new(ToolResultCache::in_memory());
        tool_cache.initialize().await?;

        let registry = Arc::new(ToolRegistry::new(bus.clone(), Arc::clone(&tool_cache)));

        let memory = Arc::new(MemoryStore::new(Arc::clone(&db)));
        memory.initialize().await?;

        info!("Core initialized");
        Ok(Arc::new(Core {
            bus,
            db,
            cache,
            tool_cache,
            registry,
            memory,
        }))
    }

    /// Run plugin discovery against this core's registry, using the
    /// policy from the environment. Returns the number of plugins loaded.
    pub fn load_plugins(&self, entry_points: &[EntryPoint]) -> usize {
        let policy = PluginPolicy::from_env();
        load_plugins(&self.registry, entry_points, &policy)
    }

    /// The process event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The shared database engine.
    pub fn db(&self) -> &Arc<DatabaseEngine> {
        &self.db
    }

    /// The shared cache engine.
    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    /// The tool-result cache.
    pub fn tool_cache(&self) -> &Arc<ToolResultCache> {
        &self.tool_cache
    }

    /// The shared tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The shared session memory store.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Tear everything down in reverse order. Per-component failures are
    /// logged and swallowed so one stuck backend cannot block shutdown.
    pub async fn close(&self) {
        if let Err(e) = self.tool_cache.shutdown().await {
            debug!("Tool cache shutdown failed: {}", e);
        }
        if let Err(e) = self.cache.close().await {
            debug!("Cache engine close failed: {}", e);
        }
        if let Err(e) = self.db.close().await {
            debug!("Database engine close failed: {}", e);
        }
        info!("Core closed");
    }
}

/// Default [`AgentBuilder`] wiring agents to a shared [`Core`] and one
/// provider.
pub struct CoreAgentBuilder {
    core: Arc<Core>,
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    max_iterations: u32,
    breaker_config: CircuitBreakerConfig,
}

impl CoreAgentBuilder {
    /// Builder over a core and the host-selected provider.
    pub fn new(core: Arc<Core>, provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            core,
            provider,
            system_prompt: String::new(),
            max_iterations: crate::agent::DEFAULT_MAX_ITERATIONS,
            breaker_config: CircuitBreakerConfig::default(),
        }
    }

    /// System prompt for fresh sessions (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Iteration budget (builder pattern).
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Breaker tunables for the provider wrapper (builder pattern).
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }
}

#[async_trait]
impl AgentBuilder for CoreAgentBuilder {
    async fn build(&self, ctx: &RequestContext) -> Result<Arc<SamAgent>, AgentError> {
        // One breaker per provider model, shared by all agents hitting it.
        let breaker_name = format!("llm:{}", self.provider.model_name());
        let breaker = get_circuit_breaker(&breaker_name, self.breaker_config.clone());

        debug!("Building agent for '{}'", ctx.cache_key());
        Ok(Arc::new(
            SamAgent::new(
                Arc::clone(&self.provider),
                Arc::clone(self.core.registry()),
                Arc::clone(self.core.memory()),
                self.core.bus().clone(),
                breaker,
            )
            .with_system_prompt(self.system_prompt.clone())
            .with_max_iterations(self.max_iterations),
        ))
    }
}
