//! Planning progress presentation.
//!
//! Planning itself happens outside the engine; what arrives here is its
//! spec (an ordered list of step IDs with their prompt files) plus the
//! planning-kind tasks it has already materialized in the index. The engine
//! never executes a planning step; it only renders how far planning got so
//! `status` can show one coherent picture.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use taskindex::{Index, TaskKind, TaskState};

/// One planning step, as enumerated by the planning front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Repo-relative prompt file under `_governator/prompts/`.
    #[serde(default)]
    pub prompt: String,
}

/// The ordered planning pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanningSpec {
    #[serde(default)]
    pub steps: Vec<PlanningStep>,
}

impl PlanningSpec {
    /// Load the planning spec; a missing file means planning has not been
    /// initialized and yields an empty spec.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read planning spec {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse planning spec {}", path.display()))
    }
}

/// Status of one planning step, derived from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// No planning task for this step exists yet.
    Pending,
    /// A planning task exists and is not terminal.
    InProgress,
    /// The step's planning task is merged.
    Done,
    /// The step's planning task is blocked.
    Blocked,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in progress"),
            StepStatus::Done => write!(f, "done"),
            StepStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Per-step progress line.
#[derive(Debug, Clone)]
pub struct StepProgress {
    pub id: String,
    pub title: String,
    pub status: StepStatus,
}

/// Join the planning spec with the planning tasks in the index, preserving
/// step order.
pub fn progress(spec: &PlanningSpec, index: &Index) -> Vec<StepProgress> {
    spec.steps
        .iter()
        .map(|step| {
            let status = index
                .tasks
                .iter()
                .find(|t| t.kind == TaskKind::Planning && t.id == step.id)
                .map(|t| match t.state {
                    TaskState::Merged => StepStatus::Done,
                    TaskState::Blocked => StepStatus::Blocked,
                    _ => StepStatus::InProgress,
                })
                .unwrap_or(StepStatus::Pending);
            StepProgress {
                id: step.id.clone(),
                title: step.title.clone(),
                status,
            }
        })
        .collect()
}

/// Render progress lines for status output. Empty string when there is no
/// planning spec to present.
pub fn render(progress: &[StepProgress]) -> String {
    if progress.is_empty() {
        return String::new();
    }
    let done = progress
        .iter()
        .filter(|p| p.status == StepStatus::Done)
        .count();
    let mut out = format!("planning: {done}/{} steps done\n", progress.len());
    for step in progress {
        out.push_str(&format!("  {} [{}] {}\n", step.id, step.status, step.title));
    }
    out
}
