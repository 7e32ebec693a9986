//! Persisted in-flight worker set.
//!
//! Maps task id to when its worker started and which worktree it owns.
//! The supervisor is the only writer and only touches this file while it
//! holds the index write lock, so the set always agrees with the `pid`
//! fields in the index. Survives supervisor crashes: on startup, entries
//! whose PID is gone drive the worker-disappeared recovery path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InFlightEntry {
    pub started_at: DateTime<Utc>,
    pub worktree_path: PathBuf,
}

/// The in-flight map. Empty map serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct InFlightSet {
    entries: BTreeMap<String, InFlightEntry>,
}

impl InFlightSet {
    /// Load from disk; a missing file is an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read in-flight set {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse in-flight set {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to rename in-flight set to {}", path.display()))?;
        Ok(())
    }

    pub fn insert(&mut self, task_id: &str, entry: InFlightEntry) {
        self.entries.insert(task_id.to_string(), entry);
    }

    pub fn remove(&mut self, task_id: &str) -> Option<InFlightEntry> {
        self.entries.remove(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&InFlightEntry> {
        self.entries.get(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn task_ids(&self) -> std::collections::BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InFlightEntry)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let set = InFlightSet::load(&dir.path().join("in-flight.json")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn roundtrip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in-flight.json");

        let mut set = InFlightSet::default();
        set.insert(
            "task-01",
            InFlightEntry {
                started_at: Utc::now(),
                worktree_path: PathBuf::from("/repo/_governator/_local-state/worktrees/task-01"),
            },
        );
        set.save(&path).unwrap();

        let loaded = InFlightSet::load(&path).unwrap();
        assert_eq!(loaded, set);
        assert!(loaded.contains("task-01"));
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn empty_set_serializes_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in-flight.json");
        InFlightSet::default().save(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}\n");
    }

    #[test]
    fn remove_returns_entry() {
        let mut set = InFlightSet::default();
        set.insert(
            "t",
            InFlightEntry {
                started_at: Utc::now(),
                worktree_path: PathBuf::from("/wt"),
            },
        );
        assert!(set.remove("t").is_some());
        assert!(set.remove("t").is_none());
        assert!(set.is_empty());
    }
}
