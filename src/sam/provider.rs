//! Shared primitives for provider-agnostic LLM access.
//!
//! The orchestrator interacts with language models exclusively through the
//! [`LLMProvider`] trait. The trait abstracts over concrete vendor wire
//! formats (OpenAI, Anthropic, xAI, local OpenAI-compatible servers) while
//! the supporting structs describe chat messages, tool calls, and token
//! accounting. Concrete providers live outside this crate; hosts select one
//! via `LLM_PROVIDER` and hand it to the
//! [`AgentBuilder`](crate::factory::AgentBuilder).
//!
//! # Message shape
//!
//! A session history is an ordered list of [`Message`]s. Assistant turns
//! may carry [`ToolCall`]s (and then an empty `content` is legal); tool
//! turns echo the originating call id in `tool_call_id` so the provider can
//! pair requests and replies deterministically.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Primes or constrains assistant behaviour.
    System,
    /// End-user request.
    User,
    /// Model output; may request tool calls.
    Assistant,
    /// Result of a tool call, correlated via `tool_call_id`.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{}", s)
    }
}

impl Role {
    /// Parse a stored role string back into a [`Role`].
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A single tool invocation requested by the model.
///
/// The provider-assigned `id` is echoed back on the corresponding
/// tool-role [`Message`] so results can be paired with requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching a registered [`ToolSpec`](crate::tool_registry::ToolSpec).
    pub name: String,
    /// JSON arguments supplied by the model.
    pub arguments: Value,
}

/// One record of session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// May be empty on assistant turns that only carry tool calls.
    pub content: String,
    /// Tool calls requested by an assistant turn. Empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Originating call id on tool turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Build a plain message with no tool bookkeeping.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Build an assistant turn carrying tool calls.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Build a tool-result turn for the given call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Prompt/completion token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Provider-agnostic tool schema handed to the model with a chat request.
///
/// Derived from [`ToolSpec`](crate::tool_registry::ToolSpec); the
/// `input_schema` is forwarded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing accepted arguments.
    pub input_schema: Value,
}

/// One completed chat round-trip.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Assistant text; may be empty when tool calls are present.
    pub content: String,
    /// Tool calls the model wants executed, in declaration order.
    pub tool_calls: Vec<ToolCall>,
    /// Token accounting, when the provider reports it.
    pub usage: Option<Usage>,
}

/// Failures surfaced by a provider implementation.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// The request exceeded the provider's deadline.
    Timeout(String),
    /// Any other API-level failure (auth, rate limit, malformed reply).
    Api(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Timeout(msg) => write!(f, "Provider timeout: {}", msg),
            ProviderError::Api(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Trait-driven abstraction over a concrete LLM vendor.
///
/// Implementations translate the uniform request into the vendor wire
/// format and back. They must be thread-safe (`Send + Sync`) so a single
/// client can be shared between agents. Conversation bookkeeping is
/// deliberately excluded; that belongs to the
/// [`MemoryStore`](crate::memory::MemoryStore) and the orchestrator.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Send the full message list (and tool schemas) and return one
    /// completed round-trip. An empty `tools` slice disables native tool
    /// calling for this request — the orchestrator's fallback iteration
    /// relies on that.
    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, ProviderError>;

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;
}
