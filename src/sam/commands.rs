//! Operator commands exposed through the `sam` binary.

use serde_json::json;

use crate::plugin_policy::{
    load_allowlist_document, write_allowlist_document, PluginPolicy,
};

/// Compute the digest for a plugin library and pin it in the allowlist.
///
/// Updates `modules[<module>]` and, when given, `entry_points[<entry_point>]`
/// in one atomic rewrite. Returns a process exit code: `0` on success, `1`
/// when the module cannot be resolved or hashed or the allowlist cannot be
/// written.
pub fn trust_plugin(module: &str, entry_point: Option<&str>, label: Option<&str>) -> i32 {
    let policy = PluginPolicy::from_env();

    let metadata = policy.resolve_metadata(module);
    let origin = match &metadata.origin {
        Some(origin) => origin.display().to_string(),
        None => {
            eprintln!(
                "Could not locate module '{}'. Ensure the library file exists.",
                module
            );
            return 1;
        }
    };
    let digest = match &metadata.sha256 {
        Some(digest) => digest.clone(),
        None => {
            eprintln!(
                "Unable to compute digest for '{}' (origin: {}).",
                module, origin
            );
            return 1;
        }
    };

    let mut doc = load_allowlist_document(&policy.allowlist_path);

    let mut record = serde_json::Map::new();
    record.insert("sha256".to_string(), json!(digest));
    if let Some(label) = label {
        record.insert("label".to_string(), json!(label));
    }
    doc.modules
        .insert(module.to_string(), serde_json::Value::Object(record));

    if let Some(ep) = entry_point {
        let mut record = serde_json::Map::new();
        record.insert("module".to_string(), json!(module));
        record.insert("sha256".to_string(), json!(digest));
        if let Some(label) = label {
            record.insert("label".to_string(), json!(label));
        }
        doc.entry_points
            .insert(ep.to_string(), serde_json::Value::Object(record));
    }

    if let Err(e) = write_allowlist_document(&policy.allowlist_path, &doc) {
        eprintln!(
            "Failed to update allowlist {}: {}",
            policy.allowlist_path.display(),
            e
        );
        return 1;
    }

    println!("Plugin allowlist updated");
    println!("   Module: {}", module);
    println!("   Digest: {}", digest);
    if let Some(ep) = entry_point {
        println!("   Entry point: {}", ep);
    }
    if let Some(label) = label {
        println!("   Label: {}", label);
    }
    println!();
    if !policy.enabled {
        println!(
            "Plugins remain disabled. Set SAM_ENABLE_PLUGINS=true and restart to load trusted plugins."
        );
    } else if policy.allow_unverified {
        println!(
            "SAM_PLUGIN_ALLOW_UNVERIFIED is enabled; consider disabling for strict enforcement."
        );
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_policy::PluginPolicy;

    #[test]
    fn test_trust_missing_module_fails() {
        assert_eq!(trust_plugin("/definitely/not/here.so", None, None), 1);
    }

    #[test]
    fn test_trust_writes_module_and_entry_point() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lib = dir.path().join("wallet.so");
        std::fs::write(&lib, b"library bytes").expect("write");
        let allowlist = dir.path().join("allowlist.json");

        // trust_plugin reads SAM_PLUGIN_ALLOWLIST_FILE through from_env.
        std::env::set_var("SAM_PLUGIN_ALLOWLIST_FILE", &allowlist);
        let code = trust_plugin(
            &lib.display().to_string(),
            Some("wallet"),
            Some("wallet tools"),
        );
        std::env::remove_var("SAM_PLUGIN_ALLOWLIST_FILE");
        assert_eq!(code, 0);

        let policy = PluginPolicy::new(true, false, allowlist);
        let meta = policy.resolve_metadata(&lib.display().to_string());
        assert!(policy.permits(&meta, Some("wallet")));
        assert!(policy.permits(&meta, None));
    }
}
