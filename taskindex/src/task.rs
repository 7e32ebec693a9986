//! Task index data model.
//!
//! The index is the single source of truth for execution state. Everything
//! here serializes deterministically: collections that reach disk are sorted
//! before writing so that equal in-memory values produce byte-identical
//! files across processes and machines.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Current index schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// What a task entry describes. The engine schedules only `Execution` tasks;
/// `Planning` entries are carried for the planning phase and presented in
/// status output, never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Planning,
    Execution,
}

/// Lifecycle state of a task.
///
/// States are strings on disk for auditability and a tagged variant in
/// memory. The adjacency list lives in [`crate::state_machine`]; nothing
/// else knows which edges are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Backlog,
    Triaged,
    Implemented,
    Tested,
    Reviewed,
    Mergeable,
    Merged,
    Blocked,
    Conflict,
    Resolved,
}

impl TaskState {
    /// All states, in declaration order.
    pub const ALL: [TaskState; 10] = [
        TaskState::Backlog,
        TaskState::Triaged,
        TaskState::Implemented,
        TaskState::Tested,
        TaskState::Reviewed,
        TaskState::Mergeable,
        TaskState::Merged,
        TaskState::Blocked,
        TaskState::Conflict,
        TaskState::Resolved,
    ];

    /// The on-disk string for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Backlog => "backlog",
            TaskState::Triaged => "triaged",
            TaskState::Implemented => "implemented",
            TaskState::Tested => "tested",
            TaskState::Reviewed => "reviewed",
            TaskState::Mergeable => "mergeable",
            TaskState::Merged => "merged",
            TaskState::Blocked => "blocked",
            TaskState::Conflict => "conflict",
            TaskState::Resolved => "resolved",
        }
    }

    /// Parse an on-disk state string, accepting legacy synonyms.
    ///
    /// Legacy names are normalized on load only (`open → triaged`,
    /// `worked → implemented`, `done → merged`); `as_str` never emits them.
    pub fn from_wire(s: &str) -> Option<Self> {
        let state = match s {
            "backlog" => TaskState::Backlog,
            "triaged" | "open" => TaskState::Triaged,
            "implemented" | "worked" => TaskState::Implemented,
            "tested" => TaskState::Tested,
            "reviewed" => TaskState::Reviewed,
            "mergeable" => TaskState::Mergeable,
            "merged" | "done" => TaskState::Merged,
            "blocked" => TaskState::Blocked,
            "conflict" => TaskState::Conflict,
            "resolved" => TaskState::Resolved,
            _ => return None,
        };
        Some(state)
    }

    /// Terminal success. `merged` is the only terminal state.
    pub fn is_terminal_success(self) -> bool {
        matches!(self, TaskState::Merged)
    }

    /// States a worker may be attached to. `pid > 0` is only legal here.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            TaskState::Triaged
                | TaskState::Implemented
                | TaskState::Tested
                | TaskState::Reviewed
                | TaskState::Conflict
                | TaskState::Resolved
        )
    }

    /// States the scheduler may select for worker dispatch or promotion.
    /// Excludes `backlog` (not yet triaged), `blocked` (operator resume
    /// only), `mergeable` (engine-side merge apply) and `merged`.
    pub fn is_schedulable(self) -> bool {
        self.is_in_progress()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TaskState::from_wire(&s).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown task state `{s}`"))
        })
    }
}

/// Retry policy carried on each task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retries {
    pub max_attempts: u32,
}

impl Default for Retries {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Attempt counters. `total` increments once per worker run; `failed`
/// additionally increments when the run did not complete its stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attempts {
    pub total: u32,
    pub failed: u32,
}

/// Informational per-task metrics. Never consulted by scheduling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metrics {
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// One task entry in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub path: String,
    pub state: TaskState,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub overlap: Vec<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub retries: Retries,
    #[serde(default)]
    pub attempts: Attempts,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub assigned_role: String,
    #[serde(default)]
    pub blocked_reason: String,
    #[serde(default)]
    pub merge_conflict: bool,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Task {
    /// A minimal execution task, used by tests and planning ingestion.
    pub fn execution(id: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Execution,
            title: String::new(),
            path: String::new(),
            state,
            role: String::new(),
            dependencies: Vec::new(),
            overlap: Vec::new(),
            order: 0,
            retries: Retries::default(),
            attempts: Attempts::default(),
            pid: 0,
            assigned_role: String::new(),
            blocked_reason: String::new(),
            merge_conflict: false,
            metrics: Metrics::default(),
        }
    }

    /// Deterministic sort key: (`order`, `id`, `path`, `role`).
    pub fn sort_key(&self) -> (i64, &str, &str, &str) {
        (self.order, &self.id, &self.path, &self.role)
    }
}

/// Digests of governance inputs, used to detect planning drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Digests {
    #[serde(default)]
    pub governator_md: String,
    /// Repo-relative planning doc path → sha256 digest. An empty map
    /// serializes as `{}`; keys are sorted by the map type.
    #[serde(default)]
    pub planning_docs: BTreeMap<String, String>,
}

/// The canonical task index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub schema_version: u32,
    #[serde(default)]
    pub digests: Digests,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            digests: Digests::default(),
            tasks: Vec::new(),
        }
    }
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Sort tasks and their dependency/overlap lists into canonical order.
    /// Called before every save; idempotent.
    pub fn normalize(&mut self) {
        for task in &mut self.tasks {
            task.dependencies.sort();
            task.dependencies.dedup();
            task.overlap.sort();
            task.overlap.dedup();
        }
        self.tasks.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    /// Hard validation errors (duplicate IDs, malformed IDs) plus sanity
    /// warnings (dependency references to unknown tasks, pid/state
    /// disagreements). Errors abort a load; warnings are logged by the
    /// caller and tolerated.
    pub fn validate(&self) -> Result<Vec<String>, IndexValidationError> {
        let mut seen = std::collections::BTreeSet::new();
        for task in &self.tasks {
            validate_task_id(&task.id)
                .map_err(|reason| IndexValidationError::InvalidTaskId {
                    id: task.id.clone(),
                    reason,
                })?;
            if !seen.insert(task.id.as_str()) {
                return Err(IndexValidationError::DuplicateTaskId {
                    id: task.id.clone(),
                });
            }
        }

        let mut warnings = Vec::new();
        for task in &self.tasks {
            for dep in &task.dependencies {
                if !seen.contains(dep.as_str()) {
                    warnings.push(format!(
                        "task `{}` depends on unknown task `{dep}`",
                        task.id
                    ));
                }
            }
            if task.pid > 0 && !task.state.is_in_progress() {
                warnings.push(format!(
                    "task `{}` has pid {} but state `{}` is not in progress",
                    task.id, task.pid, task.state
                ));
            }
        }
        Ok(warnings)
    }
}

/// Validation failure that makes an index unusable.
#[derive(Debug, thiserror::Error)]
pub enum IndexValidationError {
    #[error("duplicate task id `{id}`")]
    DuplicateTaskId { id: String },
    #[error("invalid task id `{id}`: {reason}")]
    InvalidTaskId { id: String, reason: String },
}

/// Task IDs become path components and branch names, so the character set
/// is restricted: non-empty, no path separators, no `..` traversal.
pub fn validate_task_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("empty".into());
    }
    if id.contains('/') || id.contains('\\') {
        return Err("contains a path separator".into());
    }
    if id == ".." || id.contains("..") {
        return Err("contains `..`".into());
    }
    Ok(())
}
