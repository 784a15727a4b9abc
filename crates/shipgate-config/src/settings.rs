//! Run settings: version tags and the destination repository prefix.
//!
//! Settings come from the manifest's `settings` block and can be overridden
//! from the environment with `SHIPGATE_<KEY>` (e.g., `SHIPGATE_RUNTIME_TAG`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "SHIPGATE_";

/// Build argument carrying `package_manager_version`.
pub const PACKAGE_MANAGER_VERSION_ARG: &str = "PACKAGE_MANAGER_VERSION";
/// Build argument carrying `runtime_tag`.
pub const RUNTIME_TAG_ARG: &str = "RUNTIME_TAG";

/// Recognised setting keys.
pub const KNOWN_KEYS: [&str; 4] = [
    "base_image_tag",
    "package_manager_version",
    "runtime_tag",
    "push_repo_prefix",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Selects the upstream image version.
    pub base_image_tag: Option<String>,
    /// Passed to every build as `PACKAGE_MANAGER_VERSION`.
    pub package_manager_version: Option<String>,
    /// Passed to every build as `RUNTIME_TAG`.
    pub runtime_tag: Option<String>,
    /// Prepended to every destination tag.
    pub push_repo_prefix: Option<String>,
    /// Any other keys, available for interpolation.
    pub extra: BTreeMap<String, String>,
}

impl Settings {
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "base_image_tag" => self.base_image_tag.as_deref(),
            "package_manager_version" => self.package_manager_version.as_deref(),
            "runtime_tag" => self.runtime_tag.as_deref(),
            "push_repo_prefix" => self.push_repo_prefix.as_deref(),
            other => self.extra.get(other).map(String::as_str),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match key {
            "base_image_tag" => self.base_image_tag = Some(value),
            "package_manager_version" => self.package_manager_version = Some(value),
            "runtime_tag" => self.runtime_tag = Some(value),
            "push_repo_prefix" => self.push_repo_prefix = Some(value),
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }

    /// Override settings from an environment lookup.
    ///
    /// Known keys and any key already present in `extra` are checked.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let keys: Vec<String> = KNOWN_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(self.extra.keys().cloned())
            .collect();

        for key in keys {
            let var = format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase());
            if let Some(value) = lookup(&var).filter(|v| !v.is_empty()) {
                tracing::debug!(key = %key, var = %var, "Setting overridden from environment");
                self.set(&key, value);
            }
        }
    }

    /// Override settings from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Build arguments every target receives.
    pub fn build_args(&self) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        if let Some(v) = &self.package_manager_version {
            args.insert(PACKAGE_MANAGER_VERSION_ARG.to_string(), v.clone());
        }
        if let Some(v) = &self.runtime_tag {
            args.insert(RUNTIME_TAG_ARG.to_string(), v.clone());
        }
        args
    }
}
