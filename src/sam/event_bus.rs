//! Event Bus
//!
//! A minimal async pub/sub bus for agent/tool lifecycle hooks. The
//! orchestrator, tool registry, and web adapter publish typed payloads on
//! a small set of well-known event names; UIs and metrics collectors
//! subscribe with an [`EventHandler`].
//!
//! # Delivery semantics
//!
//! - [`publish`](EventBus::publish) delivers to a **snapshot** of the
//!   subscriber list taken at publish time. Handlers subscribed during an
//!   in-flight publish do not receive that event, and handlers removed
//!   during a publish do not break iteration.
//! - Handlers for a single publish run in subscription order. Events from
//!   one agent run are published from one cooperative task, so they reach
//!   subscribers in causal order.
//! - Each handler is isolated: an `Err` from one handler is logged at
//!   `warn` and does not stop the remaining handlers, and `publish` itself
//!   never fails to its caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sam::event_bus::{names, EventBus, EventHandler, HandlerError};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_event(&self, event: &str, payload: &serde_json::Value) -> Result<(), HandlerError> {
//!         println!("{event}: {payload}");
//!         Ok(())
//!     }
//! }
//!
//! # async {
//! let bus = EventBus::new();
//! let printer: Arc<dyn EventHandler> = Arc::new(Printer);
//! bus.subscribe(names::AGENT_STATUS, Arc::clone(&printer)).await;
//! bus.publish(names::AGENT_STATUS, serde_json::json!({"state": "start"})).await;
//! bus.unsubscribe(names::AGENT_STATUS, &printer).await;
//! # };
//! ```

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Boxed error returned by subscribers; logged, never propagated.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Callback invoked for every published event a subscriber registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Returning `Err` only produces a warning log.
    async fn on_event(&self, event: &str, payload: &Value) -> Result<(), HandlerError>;
}

/// Keyed subscriber registry: event name → ordered handler list.
///
/// Cheap to clone (`Arc` internals); a process typically owns exactly one,
/// inside [`Core`](crate::core::Core).
#[derive(Clone, Default)]
pub struct EventBus {
    subs: Arc<Mutex<HashMap<String, Vec<Arc<dyn EventHandler>>>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, appended after existing subscribers.
    pub async fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) {
        let mut subs = self.subs.lock().await;
        subs.entry(event.to_string()).or_default().push(handler);
    }

    /// Remove a previously subscribed handler if present.
    ///
    /// Removes **all** registrations of the same handler (`Arc` identity).
    /// Safe to call multiple times; a handler that was never registered is
    /// ignored.
    pub async fn unsubscribe(&self, event: &str, handler: &Arc<dyn EventHandler>) {
        let mut subs = self.subs.lock().await;
        if let Some(handlers) = subs.get_mut(event) {
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
            if handlers.is_empty() {
                subs.remove(event);
            }
        }
    }

    /// Deliver `payload` to every handler subscribed to `event`.
    ///
    /// Iterates a snapshot of the subscriber list, so concurrent
    /// subscribe/unsubscribe calls cannot disturb an in-flight publish.
    pub async fn publish(&self, event: &str, payload: Value) {
        let snapshot: Vec<Arc<dyn EventHandler>> = {
            let subs = self.subs.lock().await;
            subs.get(event).cloned().unwrap_or_default()
        };

        for handler in snapshot {
            if let Err(e) = handler.on_event(event, &payload).await {
                warn!("Event handler error for {}: {}", event, e);
            }
        }
    }

    /// Number of handlers currently subscribed to `event`.
    pub async fn subscriber_count(&self, event: &str) -> usize {
        let subs = self.subs.lock().await;
        subs.get(event).map(Vec::len).unwrap_or(0)
    }
}

/// Canonical event names published by the core.
pub mod names {
    /// Run lifecycle transitions: start, thinking, tool_call, fallback,
    /// tool_done, finish.
    pub const AGENT_STATUS: &str = "agent.status";
    /// Token accounting after each LLM round-trip.
    pub const LLM_USAGE: &str = "llm.usage";
    /// A tool dispatch is about to run (or was served from cache).
    pub const TOOL_CALLED: &str = "tool.called";
    /// A tool dispatch produced a result.
    pub const TOOL_SUCCEEDED: &str = "tool.succeeded";
    /// A tool dispatch failed; the run continues.
    pub const TOOL_FAILED: &str = "tool.failed";
    /// Partial token chunk during streaming.
    pub const AGENT_DELTA: &str = "agent.delta";
    /// Final assistant message for a run.
    pub const AGENT_MESSAGE: &str = "agent.message";

    /// The full set, in the order the web adapter subscribes to them.
    pub const ALL: [&str; 7] = [
        TOOL_CALLED,
        TOOL_SUCCEEDED,
        TOOL_FAILED,
        LLM_USAGE,
        AGENT_STATUS,
        AGENT_DELTA,
        AGENT_MESSAGE,
    ];
}

/// Lifecycle states carried by [`AgentStatusPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatusState {
    Start,
    Thinking,
    ToolCall,
    Fallback,
    ToolDone,
    Finish,
}

/// Payload for [`names::AGENT_STATUS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusPayload {
    pub session_id: String,
    pub user_id: String,
    pub state: AgentStatusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Payload for [`names::LLM_USAGE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmUsagePayload {
    pub session_id: String,
    pub user_id: String,
    pub usage: Value,
    pub context_length: usize,
}

/// Payload for [`names::TOOL_CALLED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCalledPayload {
    pub session_id: String,
    pub user_id: String,
    pub name: String,
    pub args: Value,
    pub tool_call_id: String,
}

/// Payload for [`names::TOOL_SUCCEEDED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultPayload {
    pub session_id: String,
    pub user_id: String,
    pub name: String,
    pub args: Value,
    pub result: Value,
    pub tool_call_id: String,
}

/// Payload for [`names::TOOL_FAILED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailedPayload {
    pub session_id: String,
    pub user_id: String,
    pub name: String,
    pub args: Value,
    pub error: String,
    pub tool_call_id: String,
}

/// Payload for [`names::AGENT_DELTA`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDeltaPayload {
    pub session_id: String,
    pub user_id: String,
    pub content: String,
}

/// Payload for [`names::AGENT_MESSAGE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessagePayload {
    pub session_id: String,
    pub user_id: String,
    pub content: String,
    pub usage: Value,
}
