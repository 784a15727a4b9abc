//! Build targets, relays and the plan that ties them together.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::{Error, Result};

/// Associates a logical build target with the path patterns that trigger it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRule {
    /// Target name (e.g., "export").
    pub name: String,
    /// Glob patterns, tested in order.
    pub patterns: Vec<String>,
}

impl TargetRule {
    pub fn new<I, S>(name: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// How to build and publish the image for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Build context directory.
    pub context: PathBuf,
    /// Definition file (Dockerfile), relative to the working directory.
    pub dockerfile: PathBuf,
    /// Fully qualified destination tag.
    pub tag: String,
    /// Build arguments.
    pub args: BTreeMap<String, String>,
    /// Target platform (e.g., "linux/amd64").
    pub platform: Option<String>,
}

/// A target rule together with its build specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub rule: TargetRule,
    pub build: BuildSpec,
}

impl Target {
    pub fn name(&self) -> &str {
        &self.rule.name
    }
}

/// Unconditional re-publish of an upstream image under a local tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySpec {
    pub name: String,
    /// Upstream image reference to pull.
    pub source: String,
    /// Fully qualified destination tag.
    pub tag: String,
}

/// Immutable description of everything a run may do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    targets: Vec<Target>,
    relays: Vec<RelaySpec>,
}

impl BuildPlan {
    /// Create a plan, rejecting duplicate target or relay names.
    pub fn new(targets: Vec<Target>, relays: Vec<RelaySpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target.name()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate target '{}'",
                    target.name()
                )));
            }
        }

        let mut seen = HashSet::new();
        for relay in &relays {
            if !seen.insert(relay.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate relay '{}'",
                    relay.name
                )));
            }
        }

        Ok(Self { targets, relays })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn relays(&self) -> &[RelaySpec] {
        &self.relays
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name() == name)
    }

    /// The classification rules, in plan order.
    pub fn rules(&self) -> Vec<TargetRule> {
        self.targets.iter().map(|t| t.rule.clone()).collect()
    }
}
