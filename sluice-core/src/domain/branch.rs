//! Branch domain types

use serde::{Deserialize, Serialize};

/// Number of hash characters shown in labels
const SHORT_HASH_LEN: usize = 7;

/// Identifies the commit being deployed
///
/// Captured once when a run starts and frozen for the rest of the run,
/// even if the repository moves on while stages are executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub commit_hash: String,
    pub label: String,
}

impl BranchInfo {
    /// Creates branch info with the default `name@short-hash` label
    pub fn new(name: impl Into<String>, commit_hash: impl Into<String>) -> Self {
        let name = name.into();
        let commit_hash = commit_hash.into();
        let label = format!("{}@{}", name, shorten(&commit_hash));

        Self {
            name,
            commit_hash,
            label,
        }
    }

    /// Replaces the generated label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Placeholder used when no metadata could be captured
    pub fn unknown() -> Self {
        Self {
            name: "unknown".to_string(),
            commit_hash: String::new(),
            label: "unknown".to_string(),
        }
    }

    /// Abbreviated commit hash
    pub fn short_hash(&self) -> &str {
        shorten(&self.commit_hash)
    }
}

fn shorten(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}
