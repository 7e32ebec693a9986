//! Deterministic index persistence with an advisory write lock.
//!
//! `save` must produce identical bytes for equal inputs across processes
//! and machines: tasks sorted by (order, id, path, role), dependency and
//! overlap lists sorted, map keys sorted (BTreeMap), 2-space pretty JSON
//! with a trailing newline. Writes go through a temp file and rename so a
//! crashed writer never leaves a torn index.
//!
//! The write lock is an advisory exclusive `flock` on `<path>.lock`,
//! acquired non-blocking. A busy lock is a distinguished error so the
//! supervisor can surface a clear operator message instead of a raw EWOULDBLOCK.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Deserialize;

use crate::task::{Index, IndexValidationError};

/// Failures loading or saving the index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(
        "index lock busy at {path}: another governator process is writing the index; \
         retry once it finishes"
    )]
    LockHeld { path: PathBuf },
    #[error("failed to parse index at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid index at {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: IndexValidationError,
    },
    #[error("index io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Held advisory exclusive lock on the index. Dropping releases it; the
/// lock file itself is left in place for the next writer.
#[derive(Debug)]
pub struct IndexLock {
    file: File,
    path: PathBuf,
}

impl IndexLock {
    /// Acquire the write lock for `index_path` without blocking.
    /// Busy = `IndexError::LockHeld`.
    pub fn acquire(index_path: &Path) -> Result<Self, IndexError> {
        let path = lock_path(index_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| IndexError::io(&path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| IndexError::io(&path, e))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                Err(IndexError::LockHeld { path })
            }
            Err(e) => Err(IndexError::io(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// The advisory lock path for an index file.
pub fn lock_path(index_path: &Path) -> PathBuf {
    let mut os = index_path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

/// Read and parse the index. Rejects trailing content after the JSON
/// object, normalizes legacy state names, and fails on duplicate task IDs.
/// Sanity warnings (unknown dependency references, pid/state mismatches)
/// are logged, not returned.
pub fn load(path: &Path) -> Result<Index, IndexError> {
    let content = fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;

    let mut de = serde_json::Deserializer::from_str(&content);
    let index = Index::deserialize(&mut de).map_err(|e| IndexError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    de.end().map_err(|e| IndexError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let warnings = index.validate().map_err(|e| IndexError::Invalid {
        path: path.to_path_buf(),
        source: e,
    })?;
    for warning in warnings {
        tracing::warn!(path = %path.display(), "{warning}");
    }
    Ok(index)
}

/// Serialize the index to its canonical byte representation.
pub fn to_canonical_json(index: &Index) -> String {
    let mut normalized = index.clone();
    normalized.normalize();
    let mut json = serde_json::to_string_pretty(&normalized)
        .unwrap_or_else(|e| unreachable!("index serialization cannot fail: {e}"));
    json.push('\n');
    json
}

/// Acquire the write lock, write deterministic bytes, release.
pub fn save(path: &Path, index: &Index) -> Result<(), IndexError> {
    let lock = IndexLock::acquire(path)?;
    save_locked(path, index, &lock)
}

/// Write the index while the caller already holds the write lock.
/// Used for multi-step sequences (load → transition → save).
pub fn save_locked(path: &Path, index: &Index, _lock: &IndexLock) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IndexError::io(path, e))?;
    }
    let bytes = to_canonical_json(index);

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp).map_err(|e| IndexError::io(&tmp, e))?;
        file.write_all(bytes.as_bytes())
            .map_err(|e| IndexError::io(&tmp, e))?;
        file.sync_all().map_err(|e| IndexError::io(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| IndexError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskState};

    fn sample_index() -> Index {
        let mut index = Index::new();
        index.digests.governator_md = "sha256:abc".into();
        index
            .digests
            .planning_docs
            .insert("_governator/docs/plan.md".into(), "sha256:def".into());

        let mut t2 = Task::execution("task-02", TaskState::Triaged);
        t2.order = 20;
        t2.role = "engineer".into();
        t2.dependencies = vec!["task-01".into()];
        t2.overlap = vec!["db".into(), "api".into()];
        let mut t1 = Task::execution("task-01", TaskState::Merged);
        t1.order = 10;
        t1.role = "engineer".into();
        index.tasks = vec![t2, t1];
        index
    }

    #[test]
    fn save_load_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("_local-state").join("index.json");

        save(&path, &sample_index()).unwrap();
        let first = fs::read(&path).unwrap();

        let loaded = load(&path).unwrap();
        save(&path, &loaded).unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn save_is_deterministic_over_input_ordering() {
        let mut shuffled = sample_index();
        shuffled.tasks.reverse();
        shuffled.tasks[0].overlap.reverse();

        assert_eq!(
            to_canonical_json(&sample_index()),
            to_canonical_json(&shuffled)
        );
    }

    #[test]
    fn canonical_json_ends_with_newline() {
        assert!(to_canonical_json(&Index::new()).ends_with("}\n"));
    }

    #[test]
    fn trailing_content_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut body = to_canonical_json(&Index::new());
        body.push_str("{\"second\": true}");
        fs::write(&path, body).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Parse { .. }));
        assert!(err.to_string().contains("index.json"));
    }

    #[test]
    fn duplicate_ids_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut index = Index::new();
        index.tasks = vec![
            Task::execution("t1", TaskState::Backlog),
            Task::execution("t1", TaskState::Backlog),
        ];
        // Serialize without validation.
        fs::write(&path, serde_json::to_string(&index).unwrap()).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Invalid { .. }));
    }

    #[test]
    fn legacy_states_normalized_on_load_not_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let body = r#"{
            "schema_version": 1,
            "digests": {"governator_md": "", "planning_docs": {}},
            "tasks": [
                {"id": "t1", "kind": "execution", "state": "open"},
                {"id": "t2", "kind": "execution", "state": "worked"},
                {"id": "t3", "kind": "execution", "state": "done"}
            ]
        }"#;
        fs::write(&path, body).unwrap();

        let index = load(&path).unwrap();
        assert_eq!(index.task("t1").unwrap().state, TaskState::Triaged);
        assert_eq!(index.task("t2").unwrap().state, TaskState::Implemented);
        assert_eq!(index.task("t3").unwrap().state, TaskState::Merged);

        save(&path, &index).unwrap();
        let round = fs::read_to_string(&path).unwrap();
        assert!(round.contains("\"triaged\""));
        assert!(!round.contains("\"open\""));
        assert!(!round.contains("\"worked\""));
        assert!(!round.contains("\"done\""));
    }

    #[test]
    fn second_lock_acquisition_reports_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let _held = IndexLock::acquire(&path).unwrap();
        let err = IndexLock::acquire(&path).unwrap_err();
        assert!(matches!(err, IndexError::LockHeld { .. }));
        assert!(err.to_string().contains("index.json.lock"));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        {
            let _held = IndexLock::acquire(&path).unwrap();
        }
        let _again = IndexLock::acquire(&path).unwrap();
    }

    #[test]
    fn save_fails_while_lock_held_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let _held = IndexLock::acquire(&path).unwrap();

        let err = save(&path, &Index::new()).unwrap_err();
        assert!(matches!(err, IndexError::LockHeld { .. }));
    }

    #[test]
    fn save_locked_writes_under_existing_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let lock = IndexLock::acquire(&path).unwrap();
        save_locked(&path, &sample_index(), &lock).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn empty_planning_docs_round_trips_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        save(&path, &Index::new()).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("\"planning_docs\": {}"));
    }
}
