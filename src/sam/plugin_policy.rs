//! Plugin trust policy.
//!
//! Plugins are native libraries loaded at runtime, which makes them
//! arbitrary code. The policy keeps that power behind three gates:
//!
//! 1. **Disabled by default.** Unless `SAM_ENABLE_PLUGINS=true`, no
//!    candidate library is ever opened.
//! 2. **Digest pinning.** Candidates are resolved to a file and hashed
//!    (SHA-256 of the file bytes) *before* any code from them runs. A rule
//!    carrying a `sha256` must match the observed digest byte-for-byte,
//!    compared in constant time.
//! 3. **Allowlisting.** Candidates without a matching rule are refused,
//!    unless `SAM_PLUGIN_ALLOW_UNVERIFIED=true` explicitly opts into
//!    warn-and-proceed behaviour.
//!
//! The allowlist is a JSON document with independent `modules` and
//! `entry_points` maps (see [`AllowlistDocument`]); updates go through a
//! write-to-temp-then-rename so readers never observe a torn file.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

const DEFAULT_ALLOWLIST_PATH: &str = ".sam/plugin_allowlist.json";

/// Trust record for a plugin module.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginRule {
    /// Module identifier (the library path as configured).
    pub module: String,
    /// Pinned digest; `None` pins nothing (presence in the list is still
    /// required).
    pub sha256: Option<String>,
    /// Free-form operator note.
    pub label: Option<String>,
}

/// Resolved module metadata used for trust decisions.
#[derive(Debug, Clone)]
pub struct ModuleMetadata {
    /// The candidate identifier as configured.
    pub name: String,
    /// Resolved library file, when it exists.
    pub origin: Option<PathBuf>,
    /// SHA-256 of the library bytes, when readable.
    pub sha256: Option<String>,
}

/// On-disk allowlist shape.
///
/// ```json
/// {
///   "modules": { "<module>": { "sha256": "<hex>", "label": "<str>" } },
///   "entry_points": { "<ep>": { "module": "<module>", "sha256": "<hex>" } }
/// }
/// ```
///
/// A bare string entry is shorthand for `{"sha256": "<hex>"}`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AllowlistDocument {
    #[serde(default)]
    pub modules: serde_json::Map<String, Value>,
    #[serde(default)]
    pub entry_points: serde_json::Map<String, Value>,
}

/// Normalize one allowlist entry into a [`PluginRule`].
fn rule_from_value(identifier: &str, value: &Value) -> Option<PluginRule> {
    match value {
        Value::String(sha256) => Some(PluginRule {
            module: identifier.to_string(),
            sha256: Some(sha256.clone()),
            label: None,
        }),
        Value::Object(obj) => {
            let module = obj
                .get("module")
                .and_then(Value::as_str)
                .unwrap_or(identifier)
                .to_string();
            Some(PluginRule {
                module,
                sha256: obj.get("sha256").and_then(Value::as_str).map(String::from),
                label: obj.get("label").and_then(Value::as_str).map(String::from),
            })
        }
        _ => {
            warn!("Invalid plugin allowlist entry for {}: {}", identifier, value);
            None
        }
    }
}

/// Read the allowlist document; a missing or unreadable file is treated as
/// empty (and logged).
pub fn load_allowlist_document(path: &Path) -> AllowlistDocument {
    if !path.exists() {
        debug!("Plugin allowlist file {:?} missing; treating as empty", path);
        return AllowlistDocument::default();
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to parse plugin allowlist {:?}: {}", path, e);
                AllowlistDocument::default()
            }
        },
        Err(e) => {
            warn!("Failed to read plugin allowlist {:?}: {}", path, e);
            AllowlistDocument::default()
        }
    }
}

/// Atomically rewrite the allowlist: write `<path>.tmp`, then rename over
/// the original.
pub fn write_allowlist_document(
    path: &Path,
    doc: &AllowlistDocument,
) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let payload = serde_json::to_string_pretty(doc)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
    std::fs::write(&tmp_path, payload)?;
    std::fs::rename(&tmp_path, path)
}

/// Constant-time hex digest comparison.
fn digests_match(observed: &str, pinned: &str) -> bool {
    observed.as_bytes().ct_eq(pinned.as_bytes()).into()
}

/// Plugin trust policy as loaded from configuration and environment.
pub struct PluginPolicy {
    /// Master switch; nothing loads while false.
    pub enabled: bool,
    /// Warn-and-proceed for unlisted or mismapped candidates.
    pub allow_unverified: bool,
    /// Where the allowlist lives (for logs and the trust command).
    pub allowlist_path: PathBuf,
    module_rules: HashMap<String, PluginRule>,
    entry_point_rules: HashMap<String, PluginRule>,
}

impl PluginPolicy {
    /// Construct a policy from explicit parts (used by tests).
    pub fn new(
        enabled: bool,
        allow_unverified: bool,
        allowlist_path: PathBuf,
    ) -> Self {
        let doc = load_allowlist_document(&allowlist_path);
        let mut module_rules = HashMap::new();
        for (name, value) in &doc.modules {
            if let Some(rule) = rule_from_value(name, value) {
                module_rules.insert(name.clone(), rule);
            }
        }
        let mut entry_point_rules = HashMap::new();
        for (name, value) in &doc.entry_points {
            if let Some(rule) = rule_from_value(name, value) {
                entry_point_rules.insert(name.clone(), rule);
            }
        }
        Self {
            enabled,
            allow_unverified,
            allowlist_path,
            module_rules,
            entry_point_rules,
        }
    }

    /// Construct a policy from environment variables and the allowlist
    /// file (`SAM_ENABLE_PLUGINS`, `SAM_PLUGIN_ALLOW_UNVERIFIED`,
    /// `SAM_PLUGIN_ALLOWLIST_FILE`).
    pub fn from_env() -> Self {
        let enabled = env_flag("SAM_ENABLE_PLUGINS");
        let allow_unverified = env_flag("SAM_PLUGIN_ALLOW_UNVERIFIED");
        let allowlist_path = std::env::var("SAM_PLUGIN_ALLOWLIST_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_ALLOWLIST_PATH));
        Self::new(enabled, allow_unverified, allowlist_path)
    }

    /// Inspect a candidate library without loading it: locate the file and
    /// compute the SHA-256 of its bytes.
    pub fn resolve_metadata(&self, module: &str) -> ModuleMetadata {
        let path = PathBuf::from(module);
        if !path.exists() {
            warn!("Module '{}' not found when resolving plugin metadata", module);
            return ModuleMetadata {
                name: module.to_string(),
                origin: None,
                sha256: None,
            };
        }

        let sha256 = match std::fs::read(&path) {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let digest = hasher.finalize();
                let mut hex = String::with_capacity(64);
                for byte in digest {
                    hex.push_str(&format!("{:02x}", byte));
                }
                Some(hex)
            }
            Err(e) => {
                debug!("Failed to read {:?} for digest: {}", path, e);
                None
            }
        };

        ModuleMetadata {
            name: module.to_string(),
            origin: Some(path),
            sha256,
        }
    }

    /// Determine whether the resolved candidate satisfies policy rules.
    pub fn permits(&self, metadata: &ModuleMetadata, entry_point: Option<&str>) -> bool {
        let mut rule = None;

        if let Some(ep) = entry_point {
            rule = self.entry_point_rules.get(ep);
            if let Some(r) = rule {
                if r.module != metadata.name {
                    warn!(
                        "Entry point '{}' is mapped to module '{}' in allowlist but resolves to '{}'",
                        ep, r.module, metadata.name
                    );
                    if !self.allow_unverified {
                        return false;
                    }
                }
            }
        }

        if rule.is_none() {
            rule = self.module_rules.get(&metadata.name);
        }

        let origin = metadata
            .origin
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "unknown origin".to_string());

        let rule = match rule {
            Some(rule) => rule,
            None => {
                if self.allow_unverified {
                    warn!(
                        "Allowing unverified plugin '{}' ({}); update {:?} to pin its digest.",
                        entry_point.unwrap_or(&metadata.name),
                        origin,
                        self.allowlist_path
                    );
                    return true;
                }
                warn!(
                    "Blocked plugin '{}' ({}) - not present in allowlist {:?}",
                    entry_point.unwrap_or(&metadata.name),
                    origin,
                    self.allowlist_path
                );
                return false;
            }
        };

        if let Some(pinned) = &rule.sha256 {
            let observed = match &metadata.sha256 {
                Some(observed) => observed,
                None => {
                    error!(
                        "Cannot verify plugin '{}'; no digest available but allowlist requires sha256.",
                        metadata.name
                    );
                    return false;
                }
            };
            if !digests_match(observed, pinned) {
                error!(
                    "Plugin digest mismatch for '{}'. Expected {}, got {}. Update {:?} if upgrade intentional.",
                    metadata.name, pinned, observed, self.allowlist_path
                );
                return false;
            }
        }

        info!(
            "Verified plugin '{}' ({}) with digest {}",
            entry_point.unwrap_or(&metadata.name),
            origin,
            metadata.sha256.as_deref().unwrap_or("unavailable")
        );
        true
    }

    /// Rule pinned for a module, if any.
    pub fn module_rule(&self, module: &str) -> Option<&PluginRule> {
        self.module_rules.get(module)
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
