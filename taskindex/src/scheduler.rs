//! Deterministic scheduling over the task DAG.
//!
//! Each tick the supervisor asks for a selection: which eligible tasks to
//! dispatch, given global and per-role concurrency caps and mutual-exclusion
//! overlap tags. Every task considered gets a `RoutingDecision` so the
//! selection is auditable after the fact.
//!
//! Ordering prioritizes conflict resolution ahead of everything else so the
//! merge queue clears before new work advances, then ranks remaining tasks
//! by how close they are to merging.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::task::{Index, Task, TaskKind, TaskState};

pub const REASON_SELECTED: &str = "selected";
pub const REASON_OVERLAP_CONFLICT: &str = "skipped (overlap conflict)";
pub const REASON_ROLE_CAP_DISABLED: &str = "skipped (role cap disabled)";
pub const REASON_ROLE_CAP_REACHED: &str = "skipped (role cap reached)";
pub const REASON_GLOBAL_CAP_REACHED: &str = "skipped (global cap reached)";

/// Concurrency limits for one scheduling run. A role cap ≤ 0 disables the
/// role entirely.
#[derive(Debug, Clone)]
pub struct Caps {
    pub global: usize,
    pub default_role: i64,
    pub roles: BTreeMap<String, i64>,
}

impl Caps {
    pub fn role_cap(&self, role: &str) -> i64 {
        self.roles.get(role).copied().unwrap_or(self.default_role)
    }
}

/// One per-task verdict from a scheduling run.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub task_id: String,
    pub role: String,
    pub state: TaskState,
    pub selected: bool,
    pub reason: String,
}

/// Result of a scheduling run: the ordered decisions and the IDs selected
/// for dispatch, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub decisions: Vec<RoutingDecision>,
    pub selected: Vec<String>,
}

/// Scheduling failure. No dispatch occurs for the tick that produced one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
}

/// Priority rank for ordering eligible tasks; lower runs first.
///
/// Conflict-resolution work leads (resolved ahead of conflict, being one
/// step further along), then states by proximity to merge. Unschedulable
/// states sort last and never reach routing.
pub fn state_rank(state: TaskState) -> u8 {
    match state {
        TaskState::Resolved => 0,
        TaskState::Conflict => 1,
        TaskState::Mergeable => 2,
        TaskState::Reviewed => 3,
        TaskState::Tested => 4,
        TaskState::Implemented => 5,
        TaskState::Triaged => 6,
        TaskState::Backlog | TaskState::Blocked | TaskState::Merged => u8::MAX,
    }
}

/// Detect cycles among task dependencies via DFS coloring.
///
/// Returns the IDs forming the first cycle found, in edge order. Edges to
/// unknown tasks are ignored here (they are load-time sanity warnings).
pub fn detect_cycles(index: &Index) -> Result<(), ScheduleError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: BTreeMap<&str, Color> = index
        .tasks
        .iter()
        .map(|t| (t.id.as_str(), Color::White))
        .collect();

    fn visit<'a>(
        index: &'a Index,
        id: &'a str,
        color: &mut BTreeMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        color.insert(id, Color::Gray);
        stack.push(id);

        if let Some(task) = index.task(id) {
            for dep in &task.dependencies {
                match color.get(dep.as_str()) {
                    Some(Color::Gray) => {
                        // Close the cycle: everything on the stack from the
                        // first occurrence of `dep` onward, plus `dep` again.
                        let start = stack.iter().position(|s| *s == dep.as_str()).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        path.push(dep.clone());
                        return Some(path);
                    }
                    Some(Color::White) => {
                        if let Some(cycle) = visit(index, dep.as_str(), color, stack) {
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }

        stack.pop();
        color.insert(id, Color::Black);
        None
    }

    let ids: Vec<&str> = index.tasks.iter().map(|t| t.id.as_str()).collect();
    for id in ids {
        if color.get(id) == Some(&Color::White) {
            let mut stack = Vec::new();
            if let Some(path) = visit(index, id, &mut color, &mut stack) {
                return Err(ScheduleError::CycleDetected { path });
            }
        }
    }
    Ok(())
}

/// A task is eligible iff it is an execution task, all of its dependencies
/// are merged, and its own state is schedulable. A dependency on an unknown
/// task is never satisfied.
pub fn is_eligible(index: &Index, task: &Task) -> bool {
    if task.kind != TaskKind::Execution || !task.state.is_schedulable() {
        return false;
    }
    task.dependencies.iter().all(|dep| {
        index
            .task(dep)
            .map(|d| d.state.is_terminal_success())
            .unwrap_or(false)
    })
}

/// Eligible tasks in deterministic dispatch order: rank bucket, then
/// `order` ascending, then `id` lexicographic.
pub fn ordered_eligible<'a>(index: &'a Index) -> Vec<&'a Task> {
    let mut eligible: Vec<&Task> = index
        .tasks
        .iter()
        .filter(|t| is_eligible(index, t))
        .collect();
    eligible.sort_by(|a, b| {
        state_rank(a.state)
            .cmp(&state_rank(b.state))
            .then_with(|| a.order.cmp(&b.order))
            .then_with(|| a.id.cmp(&b.id))
    });
    eligible
}

/// Route ordered eligible tasks through the caps.
///
/// `running` names tasks already attached to live workers: they are not
/// reconsidered, but their roles, overlap tags, and slots count against the
/// caps so a tick never over-commits.
pub fn route(index: &Index, ordered: &[&Task], caps: &Caps, running: &BTreeSet<String>) -> Selection {
    let mut usage: BTreeMap<&str, i64> = BTreeMap::new();
    let mut active_overlap: BTreeSet<&str> = BTreeSet::new();
    let mut in_flight = 0usize;

    for id in running {
        if let Some(task) = index.task(id) {
            *usage.entry(task.role.as_str()).or_insert(0) += 1;
            for tag in &task.overlap {
                active_overlap.insert(tag.as_str());
            }
            in_flight += 1;
        }
    }

    let mut selection = Selection::default();
    for task in ordered {
        if running.contains(&task.id) {
            continue;
        }

        let reason = if in_flight + selection.selected.len() >= caps.global {
            REASON_GLOBAL_CAP_REACHED
        } else if !task.overlap.is_empty()
            && task.overlap.iter().any(|t| active_overlap.contains(t.as_str()))
        {
            REASON_OVERLAP_CONFLICT
        } else {
            let cap = caps.role_cap(&task.role);
            let used = usage.get(task.role.as_str()).copied().unwrap_or(0);
            if cap <= 0 {
                REASON_ROLE_CAP_DISABLED
            } else if used >= cap {
                REASON_ROLE_CAP_REACHED
            } else {
                REASON_SELECTED
            }
        };

        let selected = reason == REASON_SELECTED;
        if selected {
            *usage.entry(task.role.as_str()).or_insert(0) += 1;
            for tag in &task.overlap {
                active_overlap.insert(tag.as_str());
            }
            selection.selected.push(task.id.clone());
        }
        selection.decisions.push(RoutingDecision {
            task_id: task.id.clone(),
            role: task.role.clone(),
            state: task.state,
            selected,
            reason: reason.to_string(),
        });
    }
    selection
}

/// Full scheduling run: cycle check, eligibility, ordering, routing.
pub fn select(
    index: &Index,
    caps: &Caps,
    running: &BTreeSet<String>,
) -> Result<Selection, ScheduleError> {
    detect_cycles(index)?;
    let ordered = ordered_eligible(index);
    Ok(route(index, &ordered, caps, running))
}
