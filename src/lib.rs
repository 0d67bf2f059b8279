// src/lib.rs

// Import the top-level `sam` module.
pub mod sam;

// Re-export every subsystem at the crate root so callers (and the rest of
// the crate) can use `sam::db::...` instead of `sam::sam::db::...`.
pub use sam::{
    agent, api, cache, circuit_breaker, commands, config_validator, context, core, db, event_bus,
    factory, memory, plugin_policy, plugins, provider, tool_cache, tool_registry, web_session,
};

// Re-exporting key items for easier external access.
pub use sam::agent::{AgentError, SamAgent, SessionStats};
pub use sam::context::RequestContext;
pub use sam::core::Core;
pub use sam::event_bus::EventBus;
pub use sam::factory::AgentFactory;
pub use sam::provider::{ChatResponse, LLMProvider, Message, Role, ToolCall, Usage};
pub use sam::tool_registry::{Tool, ToolError, ToolRegistry, ToolSpec};
