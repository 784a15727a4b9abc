//! Change sets observed from a triggering event.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The set of file paths touched by a triggering event.
///
/// Paths are normalised on construction and the set cannot be modified
/// afterwards. Ordering is lexical so iteration is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    paths: BTreeSet<String>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of distinct paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Iterate over the normalised paths in lexical order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    /// Parse newline-separated paths, as printed by `git diff --name-only`.
    pub fn from_lines(text: &str) -> Self {
        text.lines().collect()
    }
}

/// Normalise a raw path: trim, use forward slashes, drop leading `./`.
fn normalize(raw: &str) -> Option<String> {
    let mut path = raw.trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    if path.is_empty() { None } else { Some(path) }
}

impl<S: AsRef<str>> FromIterator<S> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let paths = iter
            .into_iter()
            .filter_map(|p| normalize(p.as_ref()))
            .collect();
        Self { paths }
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.paths.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_normalized() {
        let changes: ChangeSet = ["./export/Dockerfile", "clients\\app.py", "  libs/a.py  "]
            .into_iter()
            .collect();

        assert!(changes.contains("export/Dockerfile"));
        assert!(changes.contains("clients/app.py"));
        assert!(changes.contains("libs/a.py"));
    }

    #[test]
    fn test_empty_entries_and_duplicates_collapse() {
        let changes = ChangeSet::from_lines("a.txt\n\n./a.txt\n   \nb.txt\n");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.iter().collect::<Vec<_>>(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_empty_change_set() {
        let changes = ChangeSet::empty();
        assert!(changes.is_empty());
        assert_eq!(changes.iter().count(), 0);
    }
}
