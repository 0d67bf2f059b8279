//! Tool Registry
//!
//! The registry owns every tool an agent can dispatch: registration by
//! name, schema export for the LLM provider, and dispatch with result
//! caching and lifecycle events.
//!
//! ```text
//! Agent ──▶ ToolRegistry ──▶ ToolResultCache (hit? skip handler)
//!                │
//!                └──▶ Tool::invoke ──▶ tool.succeeded / tool.failed
//! ```
//!
//! Dispatch publishes [`tool.called`](crate::event_bus::names::TOOL_CALLED)
//! before running a handler and
//! [`tool.succeeded`](crate::event_bus::names::TOOL_SUCCEEDED) /
//! [`tool.failed`](crate::event_bus::names::TOOL_FAILED) after, including
//! on cache hits (where the handler is skipped entirely). An unknown tool
//! name returns [`ToolError::NotFound`] with no events and no side
//! effects.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sam::context::RequestContext;
//! use sam::tool_registry::{Tool, ToolError, ToolSpec};
//! use serde_json::{json, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn spec(&self) -> ToolSpec {
//!         ToolSpec::new("echo", "Echo the arguments back")
//!             .with_schema(json!({"type": "object"}))
//!             .cacheable()
//!     }
//!
//!     async fn invoke(&self, args: Value, _ctx: &RequestContext) -> Result<Value, ToolError> {
//!         Ok(args)
//!     }
//! }
//! ```

use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::context::RequestContext;
use crate::event_bus::{
    names, EventBus, ToolCalledPayload, ToolFailedPayload, ToolResultPayload,
};
use crate::provider::ToolDefinition;
use crate::tool_cache::ToolResultCache;

/// Error types for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// Tool handler completed with an application-level failure.
    ExecutionFailed(String),
    /// The provided JSON arguments failed validation or deserialization.
    InvalidParameters(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
        }
    }
}

impl std::error::Error for ToolError {}

/// Identity, documentation, and dispatch metadata for one tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Unique name within the registry.
    pub name: String,
    /// Human-readable description surfaced to the LLM.
    pub description: String,
    /// JSON Schema for the accepted arguments; exposed verbatim to the
    /// provider.
    pub input_schema: Value,
    /// Whether successful results may be served from the result cache.
    /// Defaults to `false`: tools with side effects (transfers, writes)
    /// must never be cached, so read-only tools opt in explicitly.
    pub cacheable: bool,
}

impl ToolSpec {
    /// Create a spec with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            cacheable: false,
        }
    }

    /// Replace the argument schema (builder pattern).
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Mark results of this tool as cacheable (builder pattern).
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Convert to the provider-facing definition.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// A named, schema-described operation the LLM can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static metadata for this tool.
    fn spec(&self) -> ToolSpec;

    /// Execute with the model-supplied arguments.
    async fn invoke(&self, args: Value, ctx: &RequestContext) -> Result<Value, ToolError>;
}

struct Registered {
    spec: ToolSpec,
    tool: Arc<dyn Tool>,
}

/// Registry of tools available to agents.
///
/// Shared process-wide; registration takes `&self` so plugins and runtime
/// code can add tools without exclusive ownership.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Registered>>,
    bus: EventBus,
    cache: Arc<ToolResultCache>,
}

impl ToolRegistry {
    /// Create a registry publishing on `bus` and caching through `cache`.
    pub fn new(bus: EventBus, cache: Arc<ToolResultCache>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            bus,
            cache,
        }
    }

    /// Add or replace a tool by name. Re-registering an existing name
    /// replaces the previous tool and logs a warning.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let spec = tool.spec();
        let name = spec.name.clone();
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if tools
            .insert(name.clone(), Registered { spec, tool })
            .is_some()
        {
            warn!("Tool '{}' re-registered; replacing previous handler", name);
        }
    }

    /// Snapshot of every registered spec.
    pub fn list_specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut specs: Vec<ToolSpec> = tools.values().map(|r| r.spec.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Provider-facing schemas for every registered tool.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.list_specs()
            .iter()
            .map(ToolSpec::to_tool_definition)
            .collect()
    }

    /// Whether a tool with this name is registered.
    pub fn has_tool(&self, name: &str) -> bool {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The result cache this registry consults.
    pub fn cache(&self) -> &Arc<ToolResultCache> {
        &self.cache
    }

    /// Dispatch a named tool.
    ///
    /// Publishes `tool.called` before the handler runs and
    /// `tool.succeeded`/`tool.failed` after. For cacheable tools a cache
    /// hit skips the handler but still publishes both events so
    /// subscribers see a complete call. Results are cached only on
    /// success, and only for tools that opted in.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        ctx: &RequestContext,
        tool_call_id: &str,
    ) -> Result<Value, ToolError> {
        let (spec, tool) = {
            let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
            match tools.get(name) {
                Some(r) => (r.spec.clone(), Arc::clone(&r.tool)),
                None => return Err(ToolError::NotFound(name.to_string())),
            }
        };

        let session_id = ctx.session_id.clone().unwrap_or_else(|| "default".to_string());
        let user_id = ctx.user_id.clone();

        if spec.cacheable {
            if let Ok(Some(cached)) = self.cache.get_tool_result(name, &args).await {
                self.publish_called(&session_id, &user_id, name, &args, tool_call_id)
                    .await;
                self.publish_succeeded(&session_id, &user_id, name, &args, &cached, tool_call_id)
                    .await;
                return Ok(cached);
            }
        }

        self.publish_called(&session_id, &user_id, name, &args, tool_call_id)
            .await;

        match tool.invoke(args.clone(), ctx).await {
            Ok(result) => {
                if spec.cacheable {
                    if let Err(e) = self
                        .cache
                        .set_tool_result(name, &args, result.clone(), None)
                        .await
                    {
                        warn!("Failed to cache result for tool '{}': {}", name, e);
                    }
                }
                self.publish_succeeded(&session_id, &user_id, name, &args, &result, tool_call_id)
                    .await;
                Ok(result)
            }
            Err(e) => {
                let payload = ToolFailedPayload {
                    session_id,
                    user_id,
                    name: name.to_string(),
                    args,
                    error: e.to_string(),
                    tool_call_id: tool_call_id.to_string(),
                };
                self.bus
                    .publish(names::TOOL_FAILED, to_value(&payload))
                    .await;
                Err(e)
            }
        }
    }

    async fn publish_called(
        &self,
        session_id: &str,
        user_id: &str,
        name: &str,
        args: &Value,
        tool_call_id: &str,
    ) {
        let payload = ToolCalledPayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            args: args.clone(),
            tool_call_id: tool_call_id.to_string(),
        };
        self.bus.publish(names::TOOL_CALLED, to_value(&payload)).await;
    }

    async fn publish_succeeded(
        &self,
        session_id: &str,
        user_id: &str,
        name: &str,
        args: &Value,
        result: &Value,
        tool_call_id: &str,
    ) {
        let payload = ToolResultPayload {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            args: args.clone(),
            result: result.clone(),
            tool_call_id: tool_call_id.to_string(),
        };
        self.bus
            .publish(names::TOOL_SUCCEEDED, to_value(&payload))
            .await;
    }
}

fn to_value<T: serde::Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler;

    #[async_trait]
    impl Tool for Doubler {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("double", "Double a number").cacheable()
        }

        async fn invoke(&self, args: Value, _ctx: &RequestContext) -> Result<Value, ToolError> {
            let n = args
                .get("n")
                .and_then(Value::as_i64)
                .ok_or_else(|| ToolError::InvalidParameters("n required".into()))?;
            Ok(json!(n * 2))
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(EventBus::new(), Arc::new(ToolResultCache::in_memory()))
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let reg = registry();
        let err = reg
            .call("nope", json!({}), &RequestContext::default(), "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let reg = registry();
        reg.register(Arc::new(Doubler));
        assert!(reg.has_tool("double"));

        let result = reg
            .call("double", json!({"n": 4}), &RequestContext::default(), "c1")
            .await
            .unwrap();
        assert_eq!(result, json!(8));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        struct Stub;

        #[async_trait]
        impl Tool for Stub {
            fn spec(&self) -> ToolSpec {
                ToolSpec::new("double", "Stubbed")
            }
            async fn invoke(&self, _args: Value, _ctx: &RequestContext) -> Result<Value, ToolError> {
                Ok(json!("stub"))
            }
        }

        let reg = registry();
        reg.register(Arc::new(Doubler));
        reg.register(Arc::new(Stub));

        let specs = reg.list_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].description, "Stubbed");
    }

    #[tokio::test]
    async fn test_invalid_parameters_surface() {
        let reg = registry();
        reg.register(Arc::new(Doubler));
        let err = reg
            .call("double", json!({}), &RequestContext::default(), "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
