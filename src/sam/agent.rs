//! Agent Orchestrator
//!
//! [`SamAgent`] drives the iterative reason-act loop against an
//! [`LLMProvider`]: read session history, call the model, dispatch any
//! requested tools, feed the observations back, and repeat until the model
//! answers in plain text or the iteration budget runs out. Lifecycle
//! events are published on the [`EventBus`] at every step so UIs and
//! metrics can follow along in real time.
//!
//! # Event flow (one run)
//!
//! ```text
//! agent.status{start}
//!   └─ agent.status{thinking, iteration: 1}
//!   └─ llm.usage
//!   └─ (if tool calls requested)
//!       ├─ agent.status{tool_call, name} per call
//!       ├─ tool.called / tool.succeeded / tool.failed per call
//!       └─ agent.status{tool_done}
//!   └─ (loop continues; after the budget: agent.status{fallback} + one
//!      final call without tool schemas)
//! agent.message
//! agent.status{finish}
//! ```
//!
//! # Concurrency and cancellation
//!
//! A run is one cooperative task. Tool fan-out is the only point of
//! concurrency inside a run: calls execute concurrently, but their
//! tool-role messages are appended in the model's declaration order so the
//! provider can pair ids deterministically. Cancellation is cooperative —
//! dropping the run future cancels the in-flight provider call and any
//! outstanding tool calls, and memory is only written on clean completion
//! of the terminating iteration.

use futures_util::future::join_all;
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::context::RequestContext;
use crate::event_bus::{
    names, AgentDeltaPayload, AgentMessagePayload, AgentStatusPayload, AgentStatusState, EventBus,
    LlmUsagePayload,
};
use crate::memory::MemoryStore;
use crate::provider::{ChatResponse, LLMProvider, Message, ProviderError, Role, ToolDefinition};
use crate::tool_registry::ToolRegistry;

/// Default bound on reason-act iterations per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Monotone per-agent counters, exposed on `agent.message` events and
/// health endpoints.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SessionStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub turns: u64,
}

/// Fatal run errors. Tool failures and iteration exhaustion are handled
/// inside the loop and never surface here.
#[derive(Debug, Clone)]
pub enum AgentError {
    /// The provider breaker rejected the call before issuing it.
    CircuitOpen(String),
    /// The provider call exceeded its deadline.
    ProviderTimeout(String),
    /// The provider failed after retries were exhausted.
    Provider(String),
    /// Session memory could not be read or written.
    Memory(String),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::CircuitOpen(name) => write!(f, "Circuit breaker '{}' is open", name),
            AgentError::ProviderTimeout(msg) => write!(f, "Provider timeout: {}", msg),
            AgentError::Provider(msg) => write!(f, "Provider error: {}", msg),
            AgentError::Memory(msg) => write!(f, "Memory error: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

/// Rough token estimate for a message list (one token per four
/// characters), used for the `context_length` field of `llm.usage`.
fn estimate_context_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| (m.content.len() / 4).max(1))
        .sum()
}

/// An LLM-powered agent bound to one provider, tool registry, and memory
/// store. One instance serves one caller identity; the
/// [`AgentFactory`](crate::factory::AgentFactory) caches instances per
/// [`RequestContext::cache_key`].
pub struct SamAgent {
    system_prompt: String,
    max_iterations: u32,
    provider: Arc<dyn LLMProvider>,
    registry: Arc<ToolRegistry>,
    memory: Arc<MemoryStore>,
    bus: EventBus,
    breaker: Arc<CircuitBreaker>,
    session_stats: Mutex<SessionStats>,
}

impl SamAgent {
    /// Assemble an agent from its collaborators.
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        registry: Arc<ToolRegistry>,
        memory: Arc<MemoryStore>,
        bus: EventBus,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            system_prompt: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            provider,
            registry,
            memory,
            bus,
            breaker,
            session_stats: Mutex::new(SessionStats::default()),
        }
    }

    /// Set the system prompt prepended to fresh sessions (builder
    /// pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Override the iteration budget (builder pattern).
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Snapshot the agent's cumulative token counters.
    pub async fn session_stats(&self) -> SessionStats {
        *self.session_stats.lock().await
    }

    /// The tool registry this agent dispatches through.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The memory store backing this agent's sessions.
    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    /// Release per-agent resources. Shared engines are owned by
    /// [`Core`](crate::core::Core) and stay untouched.
    pub async fn close(&self) -> Result<(), AgentError> {
        debug!("Agent closed");
        Ok(())
    }

    /// Run one prompt against a session and return the assistant text.
    ///
    /// `publish_final_event=false` suppresses the terminal `agent.message`
    /// event — the streaming web adapter sets this because it publishes
    /// its own after simulating delta streaming.
    pub async fn run(
        &self,
        prompt: &str,
        session_id: &str,
        ctx: &RequestContext,
        publish_final_event: bool,
    ) -> Result<String, AgentError> {
        // Tool dispatch and events key off the run's session id, whatever
        // the caller put in the context.
        let ctx = if ctx.session_id.as_deref() == Some(session_id) {
            ctx.clone()
        } else {
            let mut ctx = ctx.clone();
            ctx.session_id = Some(session_id.to_string());
            ctx
        };
        let user_id = ctx.user_id.clone();

        self.publish_status(session_id, &user_id, AgentStatusState::Start, None, None, None)
            .await;

        match self
            .run_inner(prompt, session_id, &ctx, publish_final_event)
            .await
        {
            Ok(text) => {
                self.publish_status(
                    session_id,
                    &user_id,
                    AgentStatusState::Finish,
                    None,
                    None,
                    None,
                )
                .await;
                Ok(text)
            }
            Err(e) => {
                self.publish_status(
                    session_id,
                    &user_id,
                    AgentStatusState::Finish,
                    Some(e.to_string()),
                    None,
                    None,
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        prompt: &str,
        session_id: &str,
        ctx: &RequestContext,
        publish_final_event: bool,
    ) -> Result<String, AgentError> {
        let user_id = ctx.user_id.clone();

        let mut history = self
            .memory
            .load_messages(session_id)
            .await
            .map_err(|e| AgentError::Memory(e.to_string()))?;

        // New messages accumulate here and hit memory only on clean
        // completion, so a cancelled run leaves no partial state.
        let mut new_messages: Vec<Message> = Vec::new();

        if history.is_empty() && !self.system_prompt.is_empty() {
            let system = Message::new(Role::System, self.system_prompt.clone());
            history.push(system.clone());
            new_messages.push(system);
        }
        let user_message = Message::new(Role::User, prompt);
        history.push(user_message.clone());
        new_messages.push(user_message);

        let mut final_text: Option<String> = None;

        for iteration in 1..=self.max_iterations {
            self.publish_status(
                session_id,
                &user_id,
                AgentStatusState::Thinking,
                None,
                Some(iteration),
                None,
            )
            .await;

            let tools = self.registry.tool_definitions();
            let response = self
                .chat_via_breaker(&history, &tools, session_id, &user_id)
                .await?;

            if response.tool_calls.is_empty() {
                final_text = Some(response.content);
                break;
            }

            let tool_calls = response.tool_calls.clone();
            let assistant =
                Message::assistant_with_tool_calls(response.content, response.tool_calls);
            history.push(assistant.clone());
            new_messages.push(assistant);

            for call in &tool_calls {
                self.publish_status(
                    session_id,
                    &user_id,
                    AgentStatusState::ToolCall,
                    None,
                    Some(iteration),
                    Some(call.name.clone()),
                )
                .await;
            }

            // Fan out concurrently; join_all preserves declaration order
            // in its results, so history stays deterministic even when a
            // later call finishes first.
            let dispatches = tool_calls.iter().map(|call| {
                let registry = Arc::clone(&self.registry);
                async move {
                    registry
                        .call(&call.name, call.arguments.clone(), ctx, &call.id)
                        .await
                }
            });
            let results = join_all(dispatches).await;

            for (call, result) in tool_calls.iter().zip(results) {
                let content = match result {
                    Ok(value) => value.to_string(),
                    // A failing tool does not fail the loop: the error
                    // becomes an observation the model can react to.
                    Err(e) => {
                        warn!("Tool '{}' failed: {}", call.name, e);
                        serde_json::json!({ "error": e.to_string() }).to_string()
                    }
                };
                let message = Message::tool_result(call.id.clone(), content);
                history.push(message.clone());
                new_messages.push(message);
            }

            self.publish_status(
                session_id,
                &user_id,
                AgentStatusState::ToolDone,
                None,
                Some(iteration),
                None,
            )
            .await;
        }

        let final_text = match final_text {
            Some(text) => text,
            None => {
                // Iteration budget exhausted: one last call with tool
                // schemas disabled forces a textual answer.
                self.publish_status(
                    session_id,
                    &user_id,
                    AgentStatusState::Fallback,
                    Some("max iterations reached".to_string()),
                    Some(self.max_iterations),
                    None,
                )
                .await;
                let response = self
                    .chat_via_breaker(&history, &[], session_id, &user_id)
                    .await?;
                response.content
            }
        };

        new_messages.push(Message::new(Role::Assistant, final_text.clone()));
        self.memory
            .append_messages(session_id, &new_messages)
            .await
            .map_err(|e| AgentError::Memory(e.to_string()))?;

        let usage_snapshot = {
            let mut stats = self.session_stats.lock().await;
            stats.turns += 1;
            *stats
        };

        if publish_final_event {
            let payload = AgentMessagePayload {
                session_id: session_id.to_string(),
                user_id: user_id.clone(),
                content: final_text.clone(),
                usage: serde_json::to_value(usage_snapshot).unwrap_or(Value::Null),
            };
            self.bus
                .publish(names::AGENT_MESSAGE, to_value(&payload))
                .await;
        }

        Ok(final_text)
    }

    /// One provider round-trip wrapped in the circuit breaker, with usage
    /// accounting and the `llm.usage` event.
    async fn chat_via_breaker(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
        session_id: &str,
        user_id: &str,
    ) -> Result<ChatResponse, AgentError> {
        let response = self
            .breaker
            .call(self.provider.chat(history, tools))
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open(name) => AgentError::CircuitOpen(name),
                CircuitBreakerError::Timeout(name) => AgentError::ProviderTimeout(name),
                CircuitBreakerError::Inner(ProviderError::Timeout(msg)) => {
                    AgentError::ProviderTimeout(msg)
                }
                CircuitBreakerError::Inner(ProviderError::Api(msg)) => AgentError::Provider(msg),
            })?;

        let usage = response.usage.unwrap_or_default();
        {
            let mut stats = self.session_stats.lock().await;
            stats.prompt_tokens += usage.prompt_tokens;
            stats.completion_tokens += usage.completion_tokens;
            stats.total_tokens += usage.total_tokens;
        }

        let payload = LlmUsagePayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            usage: serde_json::to_value(usage).unwrap_or(Value::Null),
            context_length: estimate_context_tokens(history),
        };
        self.bus.publish(names::LLM_USAGE, to_value(&payload)).await;

        Ok(response)
    }

    async fn publish_status(
        &self,
        session_id: &str,
        user_id: &str,
        state: AgentStatusState,
        message: Option<String>,
        iteration: Option<u32>,
        name: Option<String>,
    ) {
        let payload = AgentStatusPayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            state,
            message,
            iteration,
            name,
        };
        self.bus.publish(names::AGENT_STATUS, to_value(&payload)).await;
    }

    /// Publish a partial content chunk for this session. Used by the
    /// streaming web adapter.
    pub(crate) async fn publish_delta(&self, session_id: &str, user_id: &str, content: &str) {
        let payload = AgentDeltaPayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
        };
        self.bus.publish(names::AGENT_DELTA, to_value(&payload)).await;
    }

    /// Publish the terminal message event for this session. Used by the
    /// streaming web adapter after simulated delta streaming.
    pub(crate) async fn publish_message(&self, session_id: &str, user_id: &str, content: &str) {
        let usage = self.session_stats().await;
        let payload = AgentMessagePayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            usage: serde_json::to_value(usage).unwrap_or(Value::Null),
        };
        self.bus.publish(names::AGENT_MESSAGE, to_value(&payload)).await;
    }

    /// The bus this agent publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
