//! Variable interpolation for manifest values.
//!
//! Supports variables like:
//! - `${settings.KEY}` - A run setting (unknown keys are an error)
//! - `${git.sha}` - Full git commit SHA
//! - `${git.short_sha}` - Short (7 char) git commit SHA
//! - `${git.branch}` - Current branch name
//! - `${git.tag}` - Git tag (if applicable)
//! - `${git.ref}` - Git ref (branch or tag)
//! - `${run.id}` - Run ID
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::settings::Settings;
use crate::{ConfigError, ConfigResult};

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub git: GitContext,
    pub run: RunContext,
    pub settings: Settings,
    pub env: HashMap<String, String>,
}

/// Git context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
    pub tag: Option<String>,
    pub ref_name: String,
}

/// Run context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub id: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate git context from environment variables (CI environment).
    pub fn populate_git_from_env(&mut self) {
        self.git.sha = env_var("SHIPGATE_COMMIT_SHA")
            .or_else(|| env_var("GITHUB_SHA"))
            .or_else(|| env_var("CI_COMMIT_SHA"))
            .unwrap_or_default();

        if !self.git.sha.is_empty() {
            self.git.short_sha = self.git.sha.chars().take(7).collect();
        }

        // Pull request builds report the source branch in GITHUB_HEAD_REF.
        self.git.branch = env_var("SHIPGATE_BRANCH")
            .or_else(|| env_var("GITHUB_HEAD_REF"))
            .or_else(|| env_var("GITHUB_REF_NAME"))
            .or_else(|| env_var("CI_COMMIT_BRANCH"))
            .unwrap_or_default();

        self.git.tag = env_var("CI_COMMIT_TAG").or_else(|| {
            env_var("GITHUB_REF_TYPE")
                .filter(|t| t == "tag")
                .and_then(|_| env_var("GITHUB_REF_NAME"))
        });

        self.git.ref_name = self
            .git
            .tag
            .clone()
            .unwrap_or_else(|| self.git.branch.clone());
    }

    /// Populate git context by running git commands in a repo path.
    /// Values already present (e.g., from the CI environment) are kept.
    pub fn populate_git_from_repo(&mut self, repo_path: &str) {
        use std::process::Command;

        let run_git = |args: &[&str]| -> Option<String> {
            Command::new("git")
                .args(args)
                .current_dir(repo_path)
                .output()
                .ok()
                .filter(|o| o.status.success())
                .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        };

        if self.git.sha.is_empty() {
            if let Some(sha) = run_git(&["rev-parse", "HEAD"]) {
                self.git.short_sha = sha.chars().take(7).collect();
                self.git.sha = sha;
            }
        }

        if self.git.branch.is_empty() {
            if let Some(branch) = run_git(&["rev-parse", "--abbrev-ref", "HEAD"]) {
                if branch != "HEAD" {
                    self.git.branch = branch;
                }
            }
        }

        if self.git.tag.is_none() {
            self.git.tag = run_git(&["describe", "--tags", "--exact-match", "HEAD"]);
        }

        self.git.ref_name = self
            .git
            .tag
            .clone()
            .unwrap_or_else(|| self.git.branch.clone());
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        self.env.extend(std::env::vars());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["settings", key] => self.settings.get(key).map(str::to_string),

            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),
            ["git", "tag"] => self.git.tag.clone(),
            ["git", "ref"] => Some(self.git.ref_name.clone()),

            ["run", "id"] => Some(self.run.id.clone()),

            ["env", name] => self.env.get(*name).cloned(),

            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    /// Unknown variables are left as-is.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate, failing if a `${settings.*}` reference is undefined.
    pub fn interpolate_strict(&self, field: &str, input: &str) -> ConfigResult<String> {
        if let Some(missing) = self.unresolved_settings(input).into_iter().next() {
            return Err(ConfigError::InvalidReference(format!(
                "{} refers to undefined setting '{}'",
                field, missing
            )));
        }
        Ok(self.interpolate(input))
    }

    /// Interpolate every value of a map with [`Self::interpolate_strict`].
    pub fn interpolate_map_strict(
        &self,
        field: &str,
        map: &BTreeMap<String, String>,
    ) -> ConfigResult<BTreeMap<String, String>> {
        map.iter()
            .map(|(k, v)| {
                let value = self.interpolate_strict(&format!("{} {}", field, k), v)?;
                Ok((k.clone(), value))
            })
            .collect()
    }

    /// Names of `${settings.*}` references in `input` that have no value.
    pub fn unresolved_settings(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .filter_map(|caps| {
                let key = caps[1].strip_prefix("settings.")?;
                if self.settings.get(key).is_none() {
                    Some(key.to_string())
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        self.ctx.git.short_sha = sha.chars().take(7).collect();
        self.ctx.git.sha = sha;
        self
    }

    pub fn with_git_branch(mut self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        self.ctx.git.ref_name = branch.clone();
        self.ctx.git.branch = branch;
        self
    }

    pub fn with_run(mut self, id: impl Into<String>) -> Self {
        self.ctx.run.id = id.into();
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.ctx.settings = settings;
        self
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<String>) -> Self {
        self.ctx.settings.set(key, value);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
