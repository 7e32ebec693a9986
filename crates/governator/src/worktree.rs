//! Git worktree and branch lifecycle per task attempt.
//!
//! Each attempt runs in its own worktree on its own branch so concurrent
//! workers cannot stomp on each other's trees and partial work survives a
//! failure. Reuse is the common path after a blocked task: the worktree
//! keeps in-progress files and pid files for operator inspection.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use taskindex::{validate_task_id, AuditLog};

/// Request to materialize a worktree for one task attempt.
#[derive(Debug, Clone)]
pub struct WorktreeRequest {
    pub task_id: String,
    pub attempt: u32,
    pub branch: String,
    pub base_branch: String,
}

/// A materialized worktree.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub path: PathBuf,
    pub repo_relative_path: PathBuf,
    pub branch: String,
    pub reused: bool,
}

/// Manages worktrees under `_governator/_local-state/worktrees/`.
pub struct WorktreeManager {
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_root: impl Into<PathBuf>, worktrees_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktrees_dir: worktrees_dir.into(),
        }
    }

    /// Deterministic worktree path: attempt 1 is the bare task id, later
    /// attempts get an `-attempt-<n>` suffix.
    pub fn worktree_path(&self, task_id: &str, attempt: u32) -> PathBuf {
        self.worktrees_dir.join(attempt_name(task_id, attempt))
    }

    /// Branch for a task attempt, mirroring the worktree path rule.
    pub fn branch_name(task_id: &str, attempt: u32) -> String {
        format!("governator/{}", attempt_name(task_id, attempt))
    }

    /// Create or reuse the worktree for the request.
    ///
    /// An existing path must be a git worktree currently on the requested
    /// branch; any mismatch is fatal rather than silently adopted.
    pub fn ensure(&self, req: &WorktreeRequest, audit: &AuditLog) -> Result<Worktree> {
        validate_task_id(&req.task_id)
            .map_err(|reason| anyhow::anyhow!("invalid task id `{}`: {reason}", req.task_id))?;

        let path = self.worktree_path(&req.task_id, req.attempt);
        let repo_relative_path = path
            .strip_prefix(&self.repo_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());

        if path.exists() {
            let inside = git_in(&path, &["rev-parse", "--is-inside-work-tree"])
                .with_context(|| format!("{} exists but is not a git worktree", path.display()))?;
            if inside.trim() != "true" {
                bail!("{} exists but is not a git worktree", path.display());
            }
            let current = git_in(&path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
            if current.trim() != req.branch {
                bail!(
                    "worktree {} is on branch `{}`, expected `{}`",
                    path.display(),
                    current.trim(),
                    req.branch
                );
            }
            return Ok(Worktree {
                path,
                repo_relative_path,
                branch: req.branch.clone(),
                reused: true,
            });
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let path_str = path.display().to_string();
        let created_branch;
        if self.branch_exists(&req.branch)? {
            git_in(
                &self.repo_root,
                &["worktree", "add", &path_str, &req.branch],
            )
            .with_context(|| format!("git worktree add failed for {}", req.task_id))?;
            created_branch = false;
        } else {
            if !self.branch_exists(&req.base_branch)? {
                bail!(
                    "base branch `{}` does not exist; cannot branch for task {}",
                    req.base_branch,
                    req.task_id
                );
            }
            git_in(
                &self.repo_root,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &req.branch,
                    &path_str,
                    &req.base_branch,
                ],
            )
            .with_context(|| format!("git worktree add -b failed for {}", req.task_id))?;
            created_branch = true;
        }

        audit.record(
            &req.task_id,
            "",
            "worktree.create",
            &[("path", path_str.as_str()), ("branch", req.branch.as_str())],
        );
        if created_branch {
            audit.record(
                &req.task_id,
                "",
                "branch.create",
                &[
                    ("branch", req.branch.as_str()),
                    ("base", req.base_branch.as_str()),
                ],
            );
        }

        Ok(Worktree {
            path,
            repo_relative_path,
            branch: req.branch.clone(),
            reused: false,
        })
    }

    /// Remove a merged task's worktree and branch, emitting audit events.
    /// Failures degrade to warnings: a stubborn worktree never blocks a merge.
    pub fn remove(&self, task_id: &str, path: &Path, branch: &str, audit: &AuditLog) {
        let path_str = path.display().to_string();
        if let Err(e) = git_in(&self.repo_root, &["worktree", "remove", "--force", &path_str]) {
            tracing::warn!(task_id, error = %e, "git worktree remove failed");
        } else {
            audit.record(task_id, "", "worktree.delete", &[("path", path_str.as_str())]);
        }
        if let Err(e) = git_in(&self.repo_root, &["branch", "-D", branch]) {
            tracing::warn!(task_id, branch, error = %e, "git branch delete failed");
        } else {
            audit.record(task_id, "", "branch.delete", &[("branch", branch)]);
        }
    }

    /// Current HEAD commit of a worktree, or None when the branch has no
    /// commit yet.
    pub fn head_commit(worktree: &Path) -> Option<String> {
        git_in(worktree, &["rev-parse", "--verify", "HEAD"])
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let output = Command::new("git")
            .args(["show-ref", "--verify", "--quiet"])
            .arg(format!("refs/heads/{branch}"))
            .current_dir(&self.repo_root)
            .output()
            .context("failed to run git show-ref")?;
        Ok(output.status.success())
    }
}

fn attempt_name(task_id: &str, attempt: u32) -> String {
    if attempt <= 1 {
        task_id.to_string()
    } else {
        format!("{task_id}-attempt-{attempt}")
    }
}

/// Run git in `cwd`, returning stdout or a stderr-bearing error.
pub fn git_in(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
