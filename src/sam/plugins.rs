//! Plugin loader.
//!
//! Discovers tool plugins from two independent channels and loads each
//! candidate only after it clears the
//! [`PluginPolicy`](crate::plugin_policy::PluginPolicy):
//!
//! 1. A host-supplied **entry-point table** — named [`EntryPoint`]s the
//!    embedding application registers at startup.
//! 2. The **`SAM_PLUGINS`** environment variable — a comma-separated list
//!    of library paths.
//!
//! Candidates are digest-verified before any of their code runs; only on
//! acceptance is the library opened. A loaded library exports one of:
//!
//! - `sam_plugin_register(&ToolRegistry)` — registers its own tools, or
//! - `sam_plugin_tools() -> Vec<Arc<dyn Tool>>` — returns tools for the
//!   loader to register.
//!
//! A rejected or broken plugin never aborts the process; it is logged and
//! skipped. Accepted libraries are intentionally leaked: their tools stay
//! callable for the life of the process, so the code must never be
//! unmapped.

use libloading::Library;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::plugin_policy::PluginPolicy;
use crate::tool_registry::{Tool, ToolRegistry};

/// A named plugin candidate supplied by the host at startup.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    /// Stable name used for allowlist `entry_points` lookups.
    pub name: String,
    /// Library the entry point resolves to.
    pub library: PathBuf,
}

impl EntryPoint {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, library: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            library: library.into(),
        }
    }
}

type RegisterFn = unsafe fn(&ToolRegistry);
type ToolsFn = unsafe fn() -> Vec<Arc<dyn Tool>>;

/// Open an accepted library and invoke its registration export.
///
/// Tries `sam_plugin_register` first, then `sam_plugin_tools`. Returns
/// whether any registration happened.
fn load_and_register(registry: &ToolRegistry, module: &str) -> bool {
    // SAFETY: the candidate passed digest verification against the trust
    // allowlist; loading it is exactly the operator-approved action. The
    // library is leaked below so its code stays mapped for the lifetime of
    // the registered tools.
    let library = match unsafe { Library::new(module) } {
        Ok(library) => library,
        Err(e) => {
            warn!("Failed loading plugin library {}: {}", module, e);
            return false;
        }
    };

    let registered = unsafe {
        if let Ok(register) = library.get::<RegisterFn>(b"sam_plugin_register\0") {
            register(registry);
            true
        } else if let Ok(tools) = library.get::<ToolsFn>(b"sam_plugin_tools\0") {
            let mut any = false;
            for tool in tools() {
                registry.register(tool);
                any = true;
            }
            any
        } else {
            warn!(
                "Plugin library {} has no 'sam_plugin_register' or 'sam_plugin_tools' export",
                module
            );
            false
        }
    };

    std::mem::forget(library);
    registered
}

/// Discover and load external plugins. Returns how many candidates were
/// accepted and registered.
///
/// When plugins are disabled (the default) no candidate is opened and no
/// code from any candidate executes.
pub fn load_plugins(
    registry: &ToolRegistry,
    entry_points: &[EntryPoint],
    policy: &PluginPolicy,
) -> usize {
    if !policy.enabled {
        debug!(
            "Plugins disabled; skipping {} entry point(s) and SAM_PLUGINS",
            entry_points.len()
        );
        return 0;
    }

    let mut loaded = 0usize;

    // 1) Host-registered entry points
    for ep in entry_points {
        let module = ep.library.display().to_string();
        let metadata = policy.resolve_metadata(&module);
        if !policy.permits(&metadata, Some(&ep.name)) {
            continue;
        }
        if load_and_register(registry, &module) {
            info!("Loaded plugin from entry point: {}", ep.name);
            loaded += 1;
        }
    }

    // 2) Environment-driven module list
    let modules = std::env::var("SAM_PLUGINS").unwrap_or_default();
    for module in modules.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        let metadata = policy.resolve_metadata(module);
        if !policy.permits(&metadata, None) {
            continue;
        }
        if load_and_register(registry, module) {
            info!("Loaded plugin module: {}", module);
            loaded += 1;
        }
    }

    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::tool_cache::ToolResultCache;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(EventBus::new(), Arc::new(ToolResultCache::in_memory()))
    }

    #[test]
    fn test_disabled_policy_loads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lib = dir.path().join("fake.so");
        std::fs::write(&lib, b"not a real library").expect("write");

        let policy = PluginPolicy::new(false, true, dir.path().join("allowlist.json"));
        let registry = registry();
        let eps = [EntryPoint::new("fake", &lib)];

        assert_eq!(load_plugins(&registry, &eps, &policy), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unlisted_candidate_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lib = dir.path().join("fake.so");
        std::fs::write(&lib, b"not a real library").expect("write");

        let policy = PluginPolicy::new(true, false, dir.path().join("allowlist.json"));
        let registry = registry();
        let eps = [EntryPoint::new("fake", &lib)];

        // Enabled, but no allowlist rule and unverified not allowed: the
        // loader must not even attempt to open the library.
        assert_eq!(load_plugins(&registry, &eps, &policy), 0);
        assert!(registry.is_empty());
    }
}
