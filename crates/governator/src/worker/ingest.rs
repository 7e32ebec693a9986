//! Ingestion of worker completion artifacts.
//!
//! A stage is complete iff the task branch has a fresh commit AND the
//! worker created the stage marker file inside the worktree. Anything less
//! blocks the task with a reason precise enough for an operator to act on
//! without reading logs.

use std::path::Path;

use taskindex::TaskState;

use crate::layout::Layout;
use crate::worker::dispatch::{DispatchRecord, ExitStatusFile};
use crate::worker::Stage;
use crate::worktree::WorktreeManager;

/// What a finished worker run means for the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Commit and marker both present: advance to the stage's success state.
    Completed { new_state: TaskState },
    /// Run failed or artifacts missing: block with this reason.
    Blocked { reason: String },
}

impl Outcome {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Outcome::Blocked {
            reason: reason.into(),
        }
    }
}

/// Map one finished worker run to an outcome.
pub fn ingest(
    worktree: &Path,
    stage: Stage,
    dispatch: &DispatchRecord,
    exit: &ExitStatusFile,
) -> Outcome {
    if exit.exit_code != 0 {
        return Outcome::blocked(format!("worker exited with code {}", exit.exit_code));
    }

    let head = WorktreeManager::head_commit(worktree);
    let has_fresh_commit = match (&head, &dispatch.head_at_dispatch) {
        (Some(now), Some(then)) => now != then,
        (Some(_), None) => true,
        (None, _) => false,
    };
    let marker = stage.marker();
    let has_marker = Layout::stage_marker_in(worktree, marker).is_file();

    match (has_fresh_commit, has_marker) {
        (true, true) => Outcome::Completed {
            new_state: stage.success_state(),
        },
        (false, true) => Outcome::blocked("missing commit on task branch"),
        (true, false) => Outcome::blocked(format!("missing `{marker}` marker file")),
        (false, false) => Outcome::blocked(format!(
            "missing commit on task branch and missing `{marker}` marker file"
        )),
    }
}

/// Outcome for a worker that exceeded its wall-clock timeout and was
/// killed. The reason carries the configured limit.
pub fn timed_out(timeout_seconds: u64) -> Outcome {
    Outcome::blocked(format!(
        "worker timed out after {timeout_seconds}s and was terminated"
    ))
}

/// Outcome for an in-flight worker whose process vanished without writing
/// `exit.json` (supervisor or host crash).
pub fn worker_disappeared() -> Outcome {
    Outcome::blocked("worker disappeared")
}
