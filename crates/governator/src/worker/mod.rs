//! Worker runtime: command resolution, prompt staging, background dispatch,
//! and ingestion of completion artifacts.
//!
//! Workers are full OS processes, detached from the supervisor. All
//! communication is through files: the staged prompt going in, and
//! `exit.json`, the stage marker, and git commits coming out.

pub mod command;
pub mod dispatch;
pub mod ingest;
pub mod staging;

use std::fmt;

use taskindex::TaskState;

/// Lifecycle stage a worker runs. Orthogonal to task state: the state says
/// where the task is, the stage says what the next worker will do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Work,
    Test,
    Review,
    Resolve,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Work => "work",
            Stage::Test => "test",
            Stage::Review => "review",
            Stage::Resolve => "resolve",
        }
    }

    /// Marker file the worker must create inside the worktree to declare
    /// the stage complete.
    pub fn marker(self) -> &'static str {
        match self {
            Stage::Work => "worked.md",
            Stage::Test => "tested.md",
            Stage::Review => "reviewed.md",
            Stage::Resolve => "resolved.md",
        }
    }

    /// Task state reached when the stage completes with commit + marker.
    pub fn success_state(self) -> TaskState {
        match self {
            Stage::Work => TaskState::Implemented,
            Stage::Test => TaskState::Tested,
            Stage::Review => TaskState::Reviewed,
            Stage::Resolve => TaskState::Resolved,
        }
    }

    /// Which stage a worker runs for a task in the given state. `None` for
    /// states handled engine-side (promotion, merge apply) or not
    /// schedulable at all.
    pub fn for_state(state: TaskState) -> Option<Stage> {
        match state {
            TaskState::Triaged => Some(Stage::Work),
            TaskState::Implemented => Some(Stage::Test),
            TaskState::Tested => Some(Stage::Review),
            TaskState::Conflict => Some(Stage::Resolve),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "work" => Some(Stage::Work),
            "test" => Some(Stage::Test),
            "review" => Some(Stage::Review),
            "resolve" => Some(Stage::Resolve),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_success_states() {
        assert_eq!(Stage::Work.success_state(), TaskState::Implemented);
        assert_eq!(Stage::Test.success_state(), TaskState::Tested);
        assert_eq!(Stage::Review.success_state(), TaskState::Reviewed);
        assert_eq!(Stage::Resolve.success_state(), TaskState::Resolved);
    }

    #[test]
    fn stage_markers() {
        assert_eq!(Stage::Work.marker(), "worked.md");
        assert_eq!(Stage::Test.marker(), "tested.md");
        assert_eq!(Stage::Review.marker(), "reviewed.md");
        assert_eq!(Stage::Resolve.marker(), "resolved.md");
    }

    #[test]
    fn stage_for_state_covers_worker_states_only() {
        assert_eq!(Stage::for_state(TaskState::Triaged), Some(Stage::Work));
        assert_eq!(Stage::for_state(TaskState::Implemented), Some(Stage::Test));
        assert_eq!(Stage::for_state(TaskState::Tested), Some(Stage::Review));
        assert_eq!(Stage::for_state(TaskState::Conflict), Some(Stage::Resolve));
        // Reviewed/resolved are promoted engine-side; mergeable merges.
        assert_eq!(Stage::for_state(TaskState::Reviewed), None);
        assert_eq!(Stage::for_state(TaskState::Resolved), None);
        assert_eq!(Stage::for_state(TaskState::Mergeable), None);
        assert_eq!(Stage::for_state(TaskState::Backlog), None);
    }

    #[test]
    fn parse_roundtrip() {
        for stage in [Stage::Work, Stage::Test, Stage::Review, Stage::Resolve] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("deploy"), None);
    }
}
