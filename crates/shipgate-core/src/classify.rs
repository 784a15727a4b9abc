//! Path classification: which targets does a change set affect?
//!
//! Patterns use standard glob semantics: `*` and `?` stay within a path
//! segment, `**` crosses segments. Negation is not supported.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::change::ChangeSet;
use crate::target::TargetRule;
use crate::{Error, Result};

/// Classification of a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetClassification {
    pub name: String,
    pub affected: bool,
    /// Changed paths that matched at least one of the target's patterns.
    pub matched_paths: Vec<String>,
}

/// One entry per rule, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    entries: Vec<TargetClassification>,
}

impl ClassificationResult {
    /// Whether the named target is affected. Unknown names are not.
    pub fn is_affected(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.affected)
    }

    pub fn get(&self, name: &str) -> Option<&TargetClassification> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn entries(&self) -> &[TargetClassification] {
        &self.entries
    }

    /// Names of affected targets, in rule order.
    pub fn affected(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.affected)
            .map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Plain name → affected mapping.
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.affected))
            .collect()
    }
}

struct CompiledRule {
    name: String,
    globs: GlobSet,
}

/// Compiled form of a rule table. Compiling validates every pattern.
pub struct Classifier {
    rules: Vec<CompiledRule>,
}

impl Classifier {
    /// Compile all patterns, failing on the first malformed one.
    pub fn new(rules: &[TargetRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    globs: build_glob_set(rule)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Evaluate the change set against every rule.
    pub fn classify(&self, changes: &ChangeSet) -> ClassificationResult {
        let entries = self
            .rules
            .iter()
            .map(|rule| {
                let matched_paths: Vec<String> = changes
                    .iter()
                    .filter(|path| rule.globs.is_match(path))
                    .map(str::to_string)
                    .collect();
                TargetClassification {
                    name: rule.name.clone(),
                    affected: !matched_paths.is_empty(),
                    matched_paths,
                }
            })
            .collect();

        ClassificationResult { entries }
    }
}

/// Compile `rules` and classify `changes` in one step.
pub fn classify(changes: &ChangeSet, rules: &[TargetRule]) -> Result<ClassificationResult> {
    Ok(Classifier::new(rules)?.classify(changes))
}

fn build_glob_set(rule: &TargetRule) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in &rule.patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Classification {
                target: rule.name.clone(),
                pattern: pattern.clone(),
                message: e.kind().to_string(),
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| Error::Classification {
        target: rule.name.clone(),
        pattern: rule.patterns.join(", "),
        message: e.to_string(),
    })
}
