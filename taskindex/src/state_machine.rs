//! Task lifecycle state machine.
//!
//! The single place that knows the legal transition edges. Every mutation of
//! a task's `state` field goes through [`transition`], which validates the
//! edge, mutates in place, and emits one audit record. The supervisor calls
//! it while holding the index write lock so transitions are observable
//! atomically.

use crate::audit::AuditLog;
use crate::task::{Index, TaskState};

/// Attempted transition is not in the adjacency table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal task transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: TaskState,
    pub to: TaskState,
}

/// Failure locating or transitioning a task.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("unknown task `{0}`")]
    UnknownTask(String),
    #[error(transparent)]
    Illegal(#[from] IllegalTransition),
}

/// Legal edges:
///
/// ```text
/// backlog     -> triaged
/// triaged     -> implemented | blocked
/// implemented -> tested      | blocked
/// tested      -> reviewed    | conflict | triaged | blocked
/// reviewed    -> mergeable   | blocked
/// mergeable   -> merged      | conflict
/// conflict    -> resolved    | blocked
/// resolved    -> mergeable   | conflict
/// blocked     -> triaged
/// ```
fn is_legal_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    matches!(
        (from, to),
        (Backlog, Triaged)
            | (Triaged, Implemented)
            | (Triaged, Blocked)
            | (Implemented, Tested)
            | (Implemented, Blocked)
            | (Tested, Reviewed)
            | (Tested, Conflict)
            | (Tested, Triaged)
            | (Tested, Blocked)
            | (Reviewed, Mergeable)
            | (Reviewed, Blocked)
            | (Mergeable, Merged)
            | (Mergeable, Conflict)
            | (Conflict, Resolved)
            | (Conflict, Blocked)
            | (Resolved, Mergeable)
            | (Resolved, Conflict)
            | (Blocked, Triaged)
    )
}

/// Reject the pair unless it is a legal edge.
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), IllegalTransition> {
    if is_legal_transition(from, to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// The set of states reachable from `from` in one transition.
pub fn reachable_states(from: TaskState) -> Vec<TaskState> {
    TaskState::ALL
        .into_iter()
        .filter(|to| is_legal_transition(from, *to))
        .collect()
}

/// Validate and apply a transition, emitting one audit record on success.
///
/// Entering `blocked` leaves `blocked_reason` as set by the caller (it is
/// set before or after this call under the same index lock); leaving
/// `blocked` clears it. Audit failures never fail the transition.
pub fn transition(
    index: &mut Index,
    task_id: &str,
    to: TaskState,
    audit: &AuditLog,
) -> Result<(), TransitionError> {
    let task = index
        .task_mut(task_id)
        .ok_or_else(|| TransitionError::UnknownTask(task_id.to_string()))?;

    let from = task.state;
    validate_transition(from, to)?;

    task.state = to;
    if from == TaskState::Blocked {
        task.blocked_reason.clear();
    }
    if matches!(to, TaskState::Resolved | TaskState::Merged) {
        task.merge_conflict = false;
    }

    let role = task.role.clone();
    tracing::debug!(task_id, from = %from, to = %to, "task transition");
    audit.record(
        task_id,
        &role,
        "task.transition",
        &[("from", from.as_str()), ("to", to.as_str())],
    );
    Ok(())
}

/// Bump `attempts.total` for one task. Called when a worker run is reaped.
pub fn increment_attempts(index: &mut Index, task_id: &str) -> Result<u32, TransitionError> {
    let task = index
        .task_mut(task_id)
        .ok_or_else(|| TransitionError::UnknownTask(task_id.to_string()))?;
    task.attempts.total += 1;
    Ok(task.attempts.total)
}

/// Bump `attempts.failed` for one task.
pub fn increment_failed_attempts(
    index: &mut Index,
    task_id: &str,
) -> Result<u32, TransitionError> {
    let task = index
        .task_mut(task_id)
        .ok_or_else(|| TransitionError::UnknownTask(task_id.to_string()))?;
    task.attempts.failed += 1;
    Ok(task.attempts.failed)
}
