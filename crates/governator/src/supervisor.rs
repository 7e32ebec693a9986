//! The supervisor: a single-process poll loop over the task index.
//!
//! Each tick, in fixed order: reap finished workers, enforce timeouts,
//! apply merges for mergeable tasks, promote reviewed/resolved tasks into
//! the merge queue, then ask the scheduler for new work and dispatch it.
//! Every index mutation happens inside (acquire write lock → load → mutate
//! → save → release) so readers only ever observe committed snapshots.
//!
//! Workers are detached OS processes; the only communication channels are
//! files (`exit.json`, stage markers, git commits). The loop exits 0 once
//! the index is quiescent: nothing schedulable, nothing mergeable, nothing
//! in flight.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Child;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use taskindex::scheduler::{self, RoutingDecision};
use taskindex::{
    self as ti, increment_attempts, increment_failed_attempts, transition, AuditLog, Index,
    IndexLock, Task, TaskKind, TaskState,
};

use crate::config::EngineConfig;
use crate::inflight::{InFlightEntry, InFlightSet};
use crate::layout::Layout;
use crate::runlock::{pid_alive, RunLock};
use crate::worker::command::{self, Substitutions};
use crate::worker::dispatch::{self, DispatchRecord};
use crate::worker::ingest::{self, Outcome};
use crate::worker::{staging, Stage};
use crate::worktree::{git_in, WorktreeManager, WorktreeRequest};

/// What one tick did, for logging, tests, and the status surface.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TickReport {
    pub reaped: Vec<String>,
    pub merged: Vec<String>,
    pub promoted: Vec<String>,
    pub dispatched: Vec<String>,
    pub decisions: Vec<RoutingDecision>,
    /// Set when scheduling failed (dependency cycle); nothing was
    /// dispatched this tick.
    pub schedule_error: Option<String>,
    pub quiescent: bool,
}

/// Supervisor state file, rewritten each tick and removed on clean exit.
#[derive(Debug, Serialize)]
struct SupervisorState<'a> {
    pid: u32,
    started_at: &'a str,
    tick: u64,
    updated_at: String,
    last_decisions: &'a [RoutingDecision],
}

pub struct Supervisor {
    layout: Layout,
    config: EngineConfig,
    audit: AuditLog,
    worktrees: WorktreeManager,
    /// Wrapper process handles, kept only to reap exited wrappers while the
    /// supervisor lives. A dropped handle does not kill the worker.
    children: HashMap<String, Child>,
    started_at: String,
    tick_count: u64,
}

impl Supervisor {
    pub fn new(layout: Layout, config: EngineConfig) -> Self {
        let audit = AuditLog::new(layout.audit_log_path());
        let worktrees = WorktreeManager::new(layout.repo_root(), layout.worktrees_dir());
        Self {
            layout,
            config,
            audit,
            worktrees,
            children: HashMap::new(),
            started_at: dispatch::rfc3339_now(),
            tick_count: 0,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Acquire the run lock, recover crashed workers, report drift, then
    /// poll until quiescent or interrupted. Returns the process exit code.
    pub async fn run(&mut self) -> Result<i32> {
        let run_lock = RunLock::acquire(&self.layout.run_lock_path())
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        info!(
            repo = %self.layout.repo_root().display(),
            pid = std::process::id(),
            "supervisor started"
        );

        self.recover_crashed_workers()?;
        self.report_drift();

        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;

        let code = loop {
            let report = self.tick()?;
            self.write_state(&report);
            self.log_tick(&report);

            if report.quiescent {
                info!("index quiescent; supervisor exiting");
                break 0;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received; supervisor shutting down");
                    break 130;
                }
                _ = sigterm.recv() => {
                    info!("termination requested; supervisor shutting down");
                    break 143;
                }
            }
        };

        if let Err(e) = fs::remove_file(self.layout.supervisor_state_path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove supervisor state file");
            }
        }
        run_lock.release();
        Ok(code)
    }

    /// One pass of the loop. Public so tests can drive ticks synchronously.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.tick_count += 1;
        let mut report = TickReport::default();

        self.reap_workers(&mut report)?;
        self.apply_merges(&mut report)?;
        self.promote_merge_ready(&mut report)?;

        let index = ti::store::load(&self.layout.index_path())
            .with_context(|| "failed to load index".to_string())?;
        let inflight = InFlightSet::load(&self.layout.inflight_path())?;

        if inflight.is_empty() && !index.tasks.iter().any(Self::is_actionable) {
            report.quiescent = true;
            return Ok(report);
        }

        let selection = match scheduler::select(&index, &self.config.caps(), &inflight.task_ids())
        {
            Ok(selection) => selection,
            Err(e) => {
                // A cyclic graph needs operator repair; keep polling so
                // in-flight workers are still reaped, but dispatch nothing.
                warn!(error = %e, "scheduling failed; no dispatch this tick");
                report.schedule_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.decisions = selection.decisions.clone();
        for decision in &report.decisions {
            tracing::debug!(
                task_id = %decision.task_id,
                selected = decision.selected,
                reason = %decision.reason,
                "routing decision"
            );
        }

        for task_id in &selection.selected {
            match self.dispatch_task(task_id) {
                Ok(true) => report.dispatched.push(task_id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "dispatch failed; blocking task");
                    self.block_task(task_id, &format!("dispatch failed: {e:#}"))?;
                }
            }
        }

        Ok(report)
    }

    /// A task that still needs the engine: schedulable (worker stages,
    /// promotion) or awaiting merge apply.
    fn is_actionable(task: &Task) -> bool {
        task.kind == TaskKind::Execution
            && (task.state.is_schedulable() || task.state == TaskState::Mergeable)
    }

    // ── Startup recovery ──────────────────────────────────────────────

    /// In-flight entries whose worker is gone without an `exit.json` are
    /// from a crashed run: block them. Entries with an `exit.json` are left
    /// for the first reap pass.
    fn recover_crashed_workers(&mut self) -> Result<()> {
        let inflight = InFlightSet::load(&self.layout.inflight_path())?;
        if inflight.is_empty() {
            return Ok(());
        }

        let index = ti::store::load(&self.layout.index_path())?;
        let mut disappeared = Vec::new();
        for (task_id, _entry) in inflight.iter() {
            let Some(task) = index.task(task_id) else {
                continue;
            };
            let Some(stage) = Stage::for_state(task.state) else {
                continue;
            };
            let state_dir = self.layout.worker_state_dir(task_id, stage.as_str());
            if dispatch::read_exit(&state_dir)?.is_some() {
                continue;
            }
            let wrapper_pid = Self::wrapper_pid(task, &state_dir);
            if wrapper_pid.map(pid_alive).unwrap_or(false) {
                continue;
            }
            disappeared.push(task_id.clone());
        }

        for task_id in disappeared {
            warn!(task_id = %task_id, "worker disappeared during previous run");
            self.apply_outcome(&task_id, ingest::worker_disappeared(), None)?;
        }
        Ok(())
    }

    fn report_drift(&self) {
        let index = match ti::store::load(&self.layout.index_path()) {
            Ok(index) => index,
            Err(_) => return,
        };
        match ti::detect_drift(self.layout.repo_root(), &index.digests) {
            Ok(report) if report.has_drift => {
                warn!("{}", report.message);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "drift check failed"),
        }
    }

    // ── Reaping ───────────────────────────────────────────────────────

    fn reap_workers(&mut self, report: &mut TickReport) -> Result<()> {
        let inflight = InFlightSet::load(&self.layout.inflight_path())?;
        if inflight.is_empty() {
            return Ok(());
        }
        let index = ti::store::load(&self.layout.index_path())?;

        for (task_id, entry) in inflight.iter() {
            let Some(task) = index.task(task_id) else {
                warn!(task_id = %task_id, "in-flight entry for unknown task; dropping");
                self.remove_inflight_entry(task_id)?;
                continue;
            };
            let Some(stage) = Stage::for_state(task.state) else {
                warn!(task_id = %task_id, state = %task.state, "in-flight task has no stage");
                continue;
            };
            let state_dir = self.layout.worker_state_dir(task_id, stage.as_str());
            let dispatch_record = dispatch::read_dispatch(&state_dir)?;

            if let Some(exit) = dispatch::read_exit(&state_dir)? {
                self.reap_child(task_id);
                let record = dispatch_record.unwrap_or_else(|| DispatchRecord {
                    command: String::new(),
                    wrapper_pid: task.pid,
                    started_at: entry.started_at,
                    head_at_dispatch: None,
                });
                let outcome = ingest::ingest(&entry.worktree_path, stage, &record, &exit);
                self.audit.record(
                    task_id,
                    &task.role,
                    "agent.outcome",
                    &[
                        ("stage", stage.as_str()),
                        ("exit_code", &exit.exit_code.to_string()),
                        ("result", outcome_label(&outcome)),
                    ],
                );
                self.apply_outcome(task_id, outcome, Some(entry.started_at))?;
                report.reaped.push(task_id.clone());
                continue;
            }

            // Still running: enforce the wall-clock timeout.
            let elapsed = Utc::now().signed_duration_since(entry.started_at);
            let limit = self.config.timeouts.worker_seconds;
            if elapsed.num_seconds() >= 0 && elapsed.num_seconds() as u64 >= limit {
                let wrapper_pid = Self::wrapper_pid(task, &state_dir);
                if let Some(pid) = wrapper_pid {
                    dispatch::terminate_process_group(pid);
                }
                self.audit.record(
                    task_id,
                    &task.role,
                    "worker.timeout",
                    &[("stage", stage.as_str()), ("limit_seconds", &limit.to_string())],
                );
                self.reap_child(task_id);
                self.apply_outcome(task_id, ingest::timed_out(limit), Some(entry.started_at))?;
                report.reaped.push(task_id.clone());
                continue;
            }

            // Worker vanished without exit.json (host crash, kill -9).
            let wrapper_pid = Self::wrapper_pid(task, &state_dir);
            if !wrapper_pid.map(pid_alive).unwrap_or(false) {
                // The wrapper may have written exit.json between the two
                // checks; leave it for the next tick's reap in that case.
                if dispatch::read_exit(&state_dir)?.is_some() {
                    continue;
                }
                self.reap_child(task_id);
                self.apply_outcome(
                    task_id,
                    ingest::worker_disappeared(),
                    Some(entry.started_at),
                )?;
                report.reaped.push(task_id.clone());
            }
        }
        Ok(())
    }

    fn wrapper_pid(task: &Task, state_dir: &Path) -> Option<u32> {
        if task.pid > 0 {
            return Some(task.pid);
        }
        dispatch::read_dispatch(state_dir)
            .ok()
            .flatten()
            .map(|r| r.wrapper_pid)
            .filter(|pid| *pid > 0)
    }

    fn reap_child(&mut self, task_id: &str) {
        if let Some(mut child) = self.children.remove(task_id) {
            let _ = child.wait();
        }
    }

    /// Apply a finished worker's outcome under the index write lock: clear
    /// the pid, bump attempt counters, transition, persist index and
    /// in-flight set together.
    fn apply_outcome(
        &mut self,
        task_id: &str,
        outcome: Outcome,
        started_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let index_path = self.layout.index_path();
        let lock = IndexLock::acquire(&index_path).map_err(|e| anyhow::anyhow!("{e}"))?;
        let mut index = ti::store::load(&index_path)?;

        {
            let task = index
                .task_mut(task_id)
                .with_context(|| format!("unknown task `{task_id}`"))?;
            task.pid = 0;
            if let Some(started) = started_at {
                let secs = Utc::now().signed_duration_since(started).num_seconds();
                if secs > 0 {
                    task.metrics.duration_seconds += secs as u64;
                }
            }
        }
        increment_attempts(&mut index, task_id)?;

        match outcome {
            Outcome::Completed { new_state } => {
                transition(&mut index, task_id, new_state, &self.audit)?;
                info!(task_id, state = %new_state, "stage completed");
            }
            Outcome::Blocked { reason } => {
                increment_failed_attempts(&mut index, task_id)?;
                transition(&mut index, task_id, TaskState::Blocked, &self.audit)?;
                if let Some(task) = index.task_mut(task_id) {
                    task.blocked_reason = reason.clone();
                }
                warn!(task_id, reason = %reason, "task blocked");
            }
        }

        ti::store::save_locked(&index_path, &index, &lock)?;

        let mut inflight = InFlightSet::load(&self.layout.inflight_path())?;
        inflight.remove(task_id);
        inflight.save(&self.layout.inflight_path())?;
        Ok(())
    }

    fn remove_inflight_entry(&self, task_id: &str) -> Result<()> {
        let lock =
            IndexLock::acquire(&self.layout.index_path()).map_err(|e| anyhow::anyhow!("{e}"))?;
        let mut inflight = InFlightSet::load(&self.layout.inflight_path())?;
        inflight.remove(task_id);
        inflight.save(&self.layout.inflight_path())?;
        drop(lock);
        Ok(())
    }

    // ── Merge apply ───────────────────────────────────────────────────

    /// Merge every mergeable task's branch into the base branch. Success
    /// reaches the terminal state and prunes the worktree; a conflicted
    /// merge is aborted and parks the task in `conflict` for a resolve
    /// worker.
    fn apply_merges(&mut self, report: &mut TickReport) -> Result<()> {
        let index = ti::store::load(&self.layout.index_path())?;
        let mergeable: Vec<String> = index
            .tasks
            .iter()
            .filter(|t| t.kind == TaskKind::Execution && t.state == TaskState::Mergeable)
            .map(|t| t.id.clone())
            .collect();
        if mergeable.is_empty() {
            return Ok(());
        }

        // Merges land on the base branch in the primary checkout. If the
        // operator has something else checked out, leave the queue alone
        // rather than mis-filing clean merges as conflicts.
        let current = git_in(self.layout.repo_root(), &["rev-parse", "--abbrev-ref", "HEAD"])?;
        if current.trim() != self.config.branches.base {
            warn!(
                current = current.trim(),
                base = %self.config.branches.base,
                "primary checkout not on base branch; deferring merges"
            );
            return Ok(());
        }

        for task_id in mergeable {
            let task = index.task(&task_id).expect("listed above");
            let attempt = attempt_number(task);
            let branch = WorktreeManager::branch_name(&task_id, attempt);
            let worktree_path = self.worktrees.worktree_path(&task_id, attempt);

            match self.merge_branch(&branch) {
                Ok(()) => {
                    let lock = IndexLock::acquire(&self.layout.index_path())
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    let mut index = ti::store::load(&self.layout.index_path())?;
                    transition(&mut index, &task_id, TaskState::Merged, &self.audit)?;
                    ti::store::save_locked(&self.layout.index_path(), &index, &lock)?;
                    drop(lock);

                    self.worktrees
                        .remove(&task_id, &worktree_path, &branch, &self.audit);
                    info!(task_id = %task_id, branch = %branch, "merged");
                    report.merged.push(task_id);
                }
                Err(e) => {
                    warn!(task_id = %task_id, branch = %branch, error = %e, "merge conflict");
                    let lock = IndexLock::acquire(&self.layout.index_path())
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    let mut index = ti::store::load(&self.layout.index_path())?;
                    transition(&mut index, &task_id, TaskState::Conflict, &self.audit)?;
                    if let Some(task) = index.task_mut(&task_id) {
                        task.merge_conflict = true;
                    }
                    ti::store::save_locked(&self.layout.index_path(), &index, &lock)?;
                }
            }
        }
        Ok(())
    }

    /// `git merge --no-ff` of the task branch into the base branch, run in
    /// the primary checkout. A failed merge is aborted so the tree stays
    /// clean for the next attempt.
    fn merge_branch(&self, branch: &str) -> Result<()> {
        let root = self.layout.repo_root();
        if let Err(e) = git_in(
            root,
            &[
                "merge",
                "--no-ff",
                branch,
                "-m",
                &format!("governator: merge {branch}"),
            ],
        ) {
            let _ = git_in(root, &["merge", "--abort"]);
            return Err(e);
        }
        Ok(())
    }

    // ── Promotion ─────────────────────────────────────────────────────

    /// `reviewed` and `resolved` tasks whose branch verifiably has commits
    /// enter the merge queue. No worker stage produces `mergeable`; this is
    /// the engine-side step between review/resolve and merge apply.
    fn promote_merge_ready(&mut self, report: &mut TickReport) -> Result<()> {
        let index = ti::store::load(&self.layout.index_path())?;
        let inflight = InFlightSet::load(&self.layout.inflight_path())?;

        let candidates: Vec<String> = index
            .tasks
            .iter()
            .filter(|t| {
                t.kind == TaskKind::Execution
                    && matches!(t.state, TaskState::Reviewed | TaskState::Resolved)
                    && t.pid == 0
                    && !inflight.contains(&t.id)
            })
            .map(|t| t.id.clone())
            .collect();

        for task_id in candidates {
            let task = index.task(&task_id).expect("listed above");
            let attempt = attempt_number(task);
            let worktree_path = self.worktrees.worktree_path(&task_id, attempt);
            if WorktreeManager::head_commit(&worktree_path).is_none() {
                warn!(task_id = %task_id, "merge-ready task has no commits; leaving as is");
                continue;
            }

            let lock = IndexLock::acquire(&self.layout.index_path())
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let mut index = ti::store::load(&self.layout.index_path())?;
            transition(&mut index, &task_id, TaskState::Mergeable, &self.audit)?;
            ti::store::save_locked(&self.layout.index_path(), &index, &lock)?;
            report.promoted.push(task_id);
        }
        Ok(())
    }

    // ── Dispatch ──────────────────────────────────────────────────────

    /// Dispatch one selected task. Returns Ok(false) when the task was
    /// skipped (no worker stage for its state, or attempts exhausted).
    fn dispatch_task(&mut self, task_id: &str) -> Result<bool> {
        let index_path = self.layout.index_path();

        // Phase 1, under the lock: attach the task and persist the
        // in-flight entry before the process exists.
        let (task, stage, attempt, worktree_path) = {
            let lock = IndexLock::acquire(&index_path).map_err(|e| anyhow::anyhow!("{e}"))?;
            let mut index = ti::store::load(&index_path)?;
            let task = index
                .task(task_id)
                .with_context(|| format!("unknown task `{task_id}`"))?
                .clone();

            let Some(stage) = Stage::for_state(task.state) else {
                return Ok(false);
            };

            let max = task.retries.max_attempts;
            if max > 0 && task.attempts.failed >= max {
                transition(&mut index, task_id, TaskState::Blocked, &self.audit)?;
                if let Some(t) = index.task_mut(task_id) {
                    t.blocked_reason = format!("max attempts ({max}) exhausted");
                }
                ti::store::save_locked(&index_path, &index, &lock)?;
                warn!(task_id, max_attempts = max, "attempts exhausted; blocked");
                return Ok(false);
            }

            let attempt = attempt_number(&task);
            let worktree_path = self.worktrees.worktree_path(task_id, attempt);
            {
                let t = index.task_mut(task_id).expect("present above");
                t.pid = 0;
                t.assigned_role = t.role.clone();
            }
            ti::store::save_locked(&index_path, &index, &lock)?;

            let mut inflight = InFlightSet::load(&self.layout.inflight_path())?;
            inflight.insert(
                task_id,
                InFlightEntry {
                    started_at: Utc::now(),
                    worktree_path: worktree_path.clone(),
                },
            );
            inflight.save(&self.layout.inflight_path())?;
            (task, stage, attempt, worktree_path)
        };

        // Phase 2, no lock held: worktree, staging, spawn.
        let launch = self.launch_worker(&task, stage, attempt);
        match launch {
            Ok(worker) => {
                let lock = IndexLock::acquire(&index_path).map_err(|e| anyhow::anyhow!("{e}"))?;
                let mut index = ti::store::load(&index_path)?;
                if let Some(t) = index.task_mut(task_id) {
                    t.pid = worker.wrapper_pid;
                }
                ti::store::save_locked(&index_path, &index, &lock)?;
                drop(lock);

                self.children.insert(task_id.to_string(), worker.child);
                info!(
                    task_id,
                    stage = %stage,
                    attempt,
                    pid = worker.wrapper_pid,
                    worktree = %worktree_path.display(),
                    "worker started"
                );
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn launch_worker(
        &mut self,
        task: &Task,
        stage: Stage,
        attempt: u32,
    ) -> Result<dispatch::LaunchedWorker> {
        let request = WorktreeRequest {
            task_id: task.id.clone(),
            attempt,
            branch: WorktreeManager::branch_name(&task.id, attempt),
            base_branch: self.config.branches.base.clone(),
        };
        let worktree = self.worktrees.ensure(&request, &self.audit)?;

        let worker_dir = self.layout.worker_state_dir(&task.id, stage.as_str());
        let effort = self.config.reasoning_effort.for_role(&task.role);
        let cli = self.config.workers.cli;

        let staged = staging::stage(
            &self.layout,
            task,
            stage,
            &worktree.path,
            &worker_dir,
            cli,
            effort,
        )?;

        let task_path = self.layout.repo_root().join(&task.path);
        let resolved = command::resolve(
            &self.config,
            &task.role,
            effort,
            &Substitutions {
                task_path: &task_path,
                prompt_path: &staged.prompt_path,
                repo_root: self.layout.repo_root(),
                role: &task.role,
            },
        )?;

        self.audit.record(
            &task.id,
            &task.role,
            "agent.invoke",
            &[
                ("stage", stage.as_str()),
                ("attempt", &attempt.to_string()),
                ("command", &resolved.display()),
            ],
        );

        // A reused worktree may hold this stage's marker from an earlier
        // run; completion must come from the worker we are about to start.
        let marker = Layout::stage_marker_in(&worktree.path, stage.marker());
        if marker.exists() {
            fs::remove_file(&marker)
                .with_context(|| format!("failed to clear stale marker {}", marker.display()))?;
        }

        let head = WorktreeManager::head_commit(&worktree.path);
        dispatch::dispatch(
            &task.id,
            &worktree.path,
            &worker_dir,
            &self.layout.logs_dir(),
            &resolved,
            &staged,
            head,
        )
    }

    /// Block a task after a dispatch failure, cleaning up its in-flight
    /// entry. Per-task errors never abort the loop.
    fn block_task(&mut self, task_id: &str, reason: &str) -> Result<()> {
        self.apply_outcome(task_id, Outcome::blocked(reason), None)
    }

    // ── Observability ─────────────────────────────────────────────────

    fn write_state(&self, report: &TickReport) {
        let state = SupervisorState {
            pid: std::process::id(),
            started_at: &self.started_at,
            tick: self.tick_count,
            updated_at: dispatch::rfc3339_now(),
            last_decisions: &report.decisions,
        };
        let path = self.layout.supervisor_state_path();
        let write = || -> Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut body = serde_json::to_string_pretty(&state)?;
            body.push('\n');
            fs::write(&path, body)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!(error = %e, "failed to write supervisor state");
        }
    }

    fn log_tick(&self, report: &TickReport) {
        let line = format!(
            "tick={} reaped={} merged={} promoted={} dispatched={} quiescent={}\n",
            self.tick_count,
            report.reaped.len(),
            report.merged.len(),
            report.promoted.len(),
            report.dispatched.len(),
            report.quiescent,
        );
        let path = self.layout.supervisor_log_path();
        let append = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            use std::io::Write;
            let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())
        };
        if let Err(e) = append() {
            warn!(error = %e, "failed to append supervisor log");
        }
    }
}

/// Worktree attempt number for a task: one worktree per failed-and-retried
/// cycle, shared across the stages of that cycle so each stage builds on the
/// previous stage's commits.
fn attempt_number(task: &Task) -> u32 {
    task.attempts.failed + 1
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Completed { .. } => "completed",
        Outcome::Blocked { .. } => "blocked",
    }
}

/// Per-state counts and blocked reasons, for `governator status`.
pub fn status_summary(index: &Index) -> String {
    use std::collections::BTreeMap;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for task in &index.tasks {
        *counts.entry(task.state.as_str()).or_insert(0) += 1;
    }

    let mut out = String::new();
    out.push_str(&format!("tasks: {}\n", index.tasks.len()));
    for (state, count) in counts {
        out.push_str(&format!("  {state}: {count}\n"));
    }
    for task in &index.tasks {
        if task.state == TaskState::Blocked {
            out.push_str(&format!("  blocked {}: {}\n", task.id, task.blocked_reason));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskindex::Task;

    #[test]
    fn status_summary_counts_states_and_reasons() {
        let mut index = Index::new();
        index.tasks.push(Task::execution("a", TaskState::Merged));
        index.tasks.push(Task::execution("b", TaskState::Merged));
        let mut blocked = Task::execution("c", TaskState::Blocked);
        blocked.blocked_reason = "missing commit on task branch".into();
        index.tasks.push(blocked);

        let summary = status_summary(&index);
        assert!(summary.contains("tasks: 3"));
        assert!(summary.contains("merged: 2"));
        assert!(summary.contains("blocked: 1"));
        assert!(summary.contains("blocked c: missing commit on task branch"));
    }

    #[test]
    fn actionable_covers_schedulable_and_mergeable() {
        let mergeable = Task::execution("m", TaskState::Mergeable);
        assert!(Supervisor::is_actionable(&mergeable));
        let merged = Task::execution("d", TaskState::Merged);
        assert!(!Supervisor::is_actionable(&merged));
        let backlog = Task::execution("b", TaskState::Backlog);
        assert!(!Supervisor::is_actionable(&backlog));
        let mut planning = Task::execution("p", TaskState::Triaged);
        planning.kind = TaskKind::Planning;
        assert!(!Supervisor::is_actionable(&planning));
    }
}
