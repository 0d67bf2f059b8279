//! Shared fixtures for integration tests: a scripted mock provider, an
//! event recorder, and a fully wired agent over a temp SQLite database.
#![allow(dead_code)]

use async_trait::async_trait;
use sam::agent::SamAgent;
use sam::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use sam::context::RequestContext;
use sam::db::engine::DatabaseEngine;
use sam::event_bus::{EventBus, EventHandler, HandlerError};
use sam::memory::MemoryStore;
use sam::provider::{ChatResponse, LLMProvider, Message, ProviderError, ToolDefinition, Usage};
use sam::tool_cache::ToolResultCache;
use sam::tool_registry::{Tool, ToolError, ToolRegistry, ToolSpec};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted provider: each `chat` call pops the next response. Records
/// how many tool definitions accompanied each call.
pub struct MockProvider {
    script: Mutex<Vec<Result<ChatResponse, ProviderError>>>,
    pub calls: AtomicUsize,
    pub tools_seen: Mutex<Vec<usize>>,
}

impl MockProvider {
    pub fn new(script: Vec<Result<ChatResponse, ProviderError>>) -> Arc<Self> {
        let mut script = script;
        script.reverse(); // pop() yields in original order
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
            tools_seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LLMProvider for MockProvider {
    async fn chat(
        &self,
        _messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tools_seen.lock().unwrap().push(tools.len());
        self.script
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(ProviderError::Api("script exhausted".into())))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Convenience: a plain text response with usage.
pub fn text_response(content: &str) -> Result<ChatResponse, ProviderError> {
    Ok(ChatResponse {
        content: content.to_string(),
        tool_calls: Vec::new(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    })
}

/// Bus subscriber that records every event it sees.
pub struct Recorder {
    pub events: Mutex<Vec<(String, Value)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn payloads_for(&self, event: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_event(&self, event: &str, payload: &Value) -> Result<(), HandlerError> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), payload.clone()));
        Ok(())
    }
}

/// A tool that echoes its arguments, optionally after a delay, optionally
/// failing.
pub struct EchoTool {
    pub name: String,
    pub delay: Duration,
    pub fail: bool,
    pub invocations: AtomicUsize,
}

impl EchoTool {
    pub fn named(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            fail: false,
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay,
            fail: false,
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            fail: true,
            invocations: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name.clone(), "Echo the arguments back")
    }

    async fn invoke(&self, args: Value, _ctx: &RequestContext) -> Result<Value, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(ToolError::ExecutionFailed("echo exploded".into()));
        }
        Ok(args)
    }
}

/// Fully wired agent over a temp SQLite file. Keep the `TempDir` alive
/// for the duration of the test.
pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub bus: EventBus,
    pub registry: Arc<ToolRegistry>,
    pub memory: Arc<MemoryStore>,
    pub agent: Arc<SamAgent>,
}

pub async fn harness(provider: Arc<dyn LLMProvider>) -> Harness {
    harness_with_config(provider, CircuitBreakerConfig::default(), 10).await
}

pub async fn harness_with_config(
    provider: Arc<dyn LLMProvider>,
    breaker_config: CircuitBreakerConfig,
    max_iterations: u32,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite:///{}", dir.path().join("t.db").to_string_lossy());
    let db = Arc::new(DatabaseEngine::new(url));
    let memory = Arc::new(MemoryStore::new(db));
    memory.initialize().await.expect("migrations");

    let bus = EventBus::new();
    let registry = Arc::new(ToolRegistry::new(
        bus.clone(),
        Arc::new(ToolResultCache::in_memory()),
    ));
    let breaker = Arc::new(CircuitBreaker::new("test-provider", breaker_config));

    let agent = Arc::new(
        SamAgent::new(
            provider,
            Arc::clone(&registry),
            Arc::clone(&memory),
            bus.clone(),
            breaker,
        )
        .with_system_prompt("You are SAM.")
        .with_max_iterations(max_iterations),
    );

    Harness {
        _dir: dir,
        bus,
        registry,
        memory,
        agent,
    }
}
