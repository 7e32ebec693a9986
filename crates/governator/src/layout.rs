//! Repository-relative filesystem layout.
//!
//! Every path the engine touches hangs off `_governator/` inside the
//! target repository. Durable state survives resets and is layered into
//! config; local state is the engine's scratch space (index, locks, logs,
//! worktrees, per-worker dirs).

use std::path::{Path, PathBuf};

pub const GOVERNATOR_DIR: &str = "_governator";
pub const DURABLE_STATE_DIR: &str = "_durable-state";
pub const LOCAL_STATE_DIR: &str = "_local-state";

/// Path helper rooted at the target repository.
#[derive(Debug, Clone)]
pub struct Layout {
    repo_root: PathBuf,
}

impl Layout {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn governator_dir(&self) -> PathBuf {
        self.repo_root.join(GOVERNATOR_DIR)
    }

    // ── Governance inputs ─────────────────────────────────────────────

    pub fn governator_md(&self) -> PathBuf {
        self.repo_root.join("GOVERNATOR.md")
    }

    pub fn worker_contract(&self) -> PathBuf {
        self.governator_dir().join("worker-contract.md")
    }

    pub fn role_prompt(&self, role: &str) -> PathBuf {
        self.governator_dir().join("roles").join(format!("{role}.md"))
    }

    pub fn reasoning_prompt(&self, level: &str) -> PathBuf {
        self.governator_dir()
            .join("reasoning")
            .join(format!("{level}.md"))
    }

    pub fn custom_global_prompt(&self) -> PathBuf {
        self.governator_dir().join("custom-prompts").join("_global.md")
    }

    pub fn custom_role_prompt(&self, role: &str) -> PathBuf {
        self.governator_dir()
            .join("custom-prompts")
            .join(format!("{role}.md"))
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.governator_dir().join("tasks")
    }

    // ── Durable state ─────────────────────────────────────────────────

    pub fn durable_state_dir(&self) -> PathBuf {
        self.governator_dir().join(DURABLE_STATE_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.durable_state_dir().join("config.json")
    }

    pub fn planning_spec_path(&self) -> PathBuf {
        self.durable_state_dir().join("planning.json")
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.durable_state_dir().join("migrations")
    }

    pub fn migration_marker(&self, id: &str) -> PathBuf {
        self.migrations_dir().join(format!("{id}.done"))
    }

    // ── Local state ───────────────────────────────────────────────────

    pub fn local_state_dir(&self) -> PathBuf {
        self.governator_dir().join(LOCAL_STATE_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.local_state_dir().join("index.json")
    }

    pub fn inflight_path(&self) -> PathBuf {
        self.local_state_dir().join("in-flight.json")
    }

    pub fn run_lock_path(&self) -> PathBuf {
        self.local_state_dir().join("run.lock")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.local_state_dir().join("audit.log")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.local_state_dir().join("logs")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.local_state_dir().join("worktrees")
    }

    pub fn supervisor_dir(&self) -> PathBuf {
        self.local_state_dir().join("supervisor")
    }

    pub fn supervisor_state_path(&self) -> PathBuf {
        self.supervisor_dir().join("state.json")
    }

    pub fn supervisor_log_path(&self) -> PathBuf {
        self.supervisor_dir().join("supervisor.log")
    }

    /// Per-worker scratch dir: dispatch.sh, env, prompt.md,
    /// prompt-files.txt, exit.json, agent.pid, dispatch.json.
    pub fn worker_state_dir(&self, task_id: &str, stage: &str) -> PathBuf {
        self.local_state_dir()
            .join("worker")
            .join(format!("{task_id}-{stage}"))
    }

    /// Stage markers live inside the worktree, mirroring the local-state
    /// prefix, so they travel with the task branch.
    pub fn stage_marker_in(worktree: &Path, marker: &str) -> PathBuf {
        worktree
            .join(GOVERNATOR_DIR)
            .join(LOCAL_STATE_DIR)
            .join(marker)
    }
}
