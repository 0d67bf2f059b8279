//! Request Context
//!
//! A [`RequestContext`] describes the caller of an agent run. All fields are
//! optional so single-tenant flows can keep using the implicit `"default"`
//! user without passing any data, while hosted applications populate user
//! identifiers, wallet handles, or configuration overrides and still share
//! the same agent-building code.
//!
//! The context is an immutable value: it is constructed once at the edge
//! (HTTP handler, CLI prompt, embedded UI) and passed by reference down the
//! call stack. The [`AgentFactory`](crate::factory::AgentFactory) keys its
//! per-caller agent cache on [`RequestContext::cache_key`].
//!
//! # Example
//!
//! ```rust
//! use sam::context::RequestContext;
//!
//! let ctx = RequestContext::new("alice")
//!     .with_session_id("sess-20250101-0900")
//!     .with_metadata("region", "eu-west-1");
//!
//! assert_eq!(ctx.cache_key(), "alice");
//! ```

use std::collections::HashMap;

/// Lightweight, immutable description of the caller of an agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    /// Stable caller identity. Defaults to `"default"`.
    pub user_id: String,
    /// Optional conversation the caller wants to resume.
    pub session_id: Option<String>,
    /// Optional handle into the caller's secure wallet storage.
    pub wallet_key_id: Option<String>,
    /// Arbitrary host-supplied metadata (e.g. region, plan tier).
    pub metadata: HashMap<String, String>,
    /// Per-caller configuration overrides applied at agent build time.
    pub config_overrides: HashMap<String, String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            session_id: None,
            wallet_key_id: None,
            metadata: HashMap::new(),
            config_overrides: HashMap::new(),
        }
    }
}

impl RequestContext {
    /// Create a context for the given user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Attach a session id (builder pattern).
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a wallet key handle (builder pattern).
    pub fn with_wallet_key_id(mut self, wallet_key_id: impl Into<String>) -> Self {
        self.wallet_key_id = Some(wallet_key_id.into());
        self
    }

    /// Add a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a configuration override (builder pattern).
    pub fn with_config_override(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config_overrides.insert(key.into(), value.into());
        self
    }

    /// Return a stable key for caching agents built for this context.
    ///
    /// Currently the user id alone; an empty user id falls back to
    /// `"default"` so a misconstructed context never collides with a
    /// missing one.
    pub fn cache_key(&self) -> &str {
        if self.user_id.is_empty() {
            "default"
        } else {
            &self.user_id
        }
    }
}
