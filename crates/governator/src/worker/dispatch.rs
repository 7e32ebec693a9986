//! Background worker dispatch and exit capture.
//!
//! The supervisor never talks to a worker directly. Dispatch writes a
//! `dispatch.sh` wrapper into the worker state dir which launches the
//! resolved command in the background, records the agent PID, waits for it,
//! and writes `exit.json` atomically, including from its signal trap, so a
//! timed-out worker still leaves an exit record. The wrapper runs in its
//! own process group with stdio captured to per-task log files, and the
//! supervisor does not wait on it: a crashed supervisor leaves the worker
//! running and recovers from the files later.

use std::fs::{self, File, OpenOptions, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::worker::command::{shell_quote, ResolvedCommand};
use crate::worker::staging::StagedPrompt;

/// Contents of `exit.json`, written by the wrapper when the agent exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitStatusFile {
    pub exit_code: i64,
    pub finished_at: String,
    pub pid: u32,
}

/// Metadata written next to the wrapper at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub command: String,
    pub wrapper_pid: u32,
    pub started_at: DateTime<Utc>,
    /// HEAD of the task branch when the worker started; completion requires
    /// a commit newer than this.
    pub head_at_dispatch: Option<String>,
}

/// A worker that has been launched and detached.
#[derive(Debug)]
pub struct LaunchedWorker {
    pub wrapper_pid: u32,
    pub state_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Held only so the supervisor can reap the wrapper and avoid zombies
    /// while it is alive; dropping it does not kill the worker.
    pub child: Child,
}

fn wrapper_script(
    env_path: &Path,
    worktree: &Path,
    state_dir: &Path,
    command_line: &str,
) -> String {
    let env_q = shell_quote(&env_path.display().to_string());
    let wt_q = shell_quote(&worktree.display().to_string());
    let state_q = shell_quote(&state_dir.display().to_string());
    format!(
        r#"#!/bin/sh
set -a
. {env_q}
set +a
cd {wt_q}

{command_line} &
agent=$!
echo "$agent" > {state_q}/agent.pid

write_exit() {{
    printf '{{"exit_code": %d, "finished_at": "%s", "pid": %d}}\n' \
        "$1" "$(date -u +%Y-%m-%dT%H:%M:%SZ)" "$agent" > {state_q}/exit.json.tmp
    mv {state_q}/exit.json.tmp {state_q}/exit.json
}}

on_term() {{
    kill "$agent" 2>/dev/null
    wait "$agent" 2>/dev/null
    write_exit 143
    exit 143
}}
trap on_term TERM INT

wait "$agent"
code=$?
write_exit "$code"
exit "$code"
"#
    )
}

/// Write the wrapper and launch it, detached, from the worktree directory.
///
/// `head_at_dispatch` is recorded in `dispatch.json` for the completion
/// check; stdout/stderr go to `<logs_dir>/<task>-<ts>-{stdout,stderr}.log`.
pub fn dispatch(
    task_id: &str,
    worktree: &Path,
    state_dir: &Path,
    logs_dir: &Path,
    resolved: &ResolvedCommand,
    staged: &StagedPrompt,
    head_at_dispatch: Option<String>,
) -> Result<LaunchedWorker> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create {}", state_dir.display()))?;
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;

    // A re-dispatched stage reuses this dir; leftovers from the previous
    // run must not be mistaken for this run's output.
    for stale in ["exit.json", "exit.json.tmp", "agent.pid"] {
        let path = state_dir.join(stale);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to clear stale {}", path.display()))?;
        }
    }

    let started_at = Utc::now();
    let command_line = resolved.display();

    let script_path = state_dir.join("dispatch.sh");
    fs::write(
        &script_path,
        wrapper_script(&staged.env_path, worktree, state_dir, &command_line),
    )
    .with_context(|| format!("failed to write {}", script_path.display()))?;
    fs::set_permissions(&script_path, Permissions::from_mode(0o755))
        .with_context(|| format!("failed to chmod {}", script_path.display()))?;

    let ts = started_at.format("%Y%m%d-%H%M%S");
    let stdout_log = log_file(logs_dir, &format!("{task_id}-{ts}-stdout.log"))?;
    let stderr_log = log_file(logs_dir, &format!("{task_id}-{ts}-stderr.log"))?;

    let child = Command::new("sh")
        .arg(&script_path)
        .current_dir(worktree)
        .stdin(Stdio::null())
        .stdout(stdout_log)
        .stderr(stderr_log)
        .process_group(0)
        .spawn()
        .with_context(|| format!("failed to spawn worker wrapper for {task_id}"))?;

    let wrapper_pid = child.id();
    let record = DispatchRecord {
        command: command_line,
        wrapper_pid,
        started_at,
        head_at_dispatch,
    };
    let mut body = serde_json::to_string_pretty(&record)?;
    body.push('\n');
    fs::write(state_dir.join("dispatch.json"), body)
        .with_context(|| format!("failed to write dispatch.json for {task_id}"))?;

    tracing::info!(
        task_id,
        wrapper_pid,
        worktree = %worktree.display(),
        "dispatched worker"
    );

    Ok(LaunchedWorker {
        wrapper_pid,
        state_dir: state_dir.to_path_buf(),
        started_at,
        child,
    })
}

fn log_file(dir: &Path, name: &str) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(name))
        .with_context(|| format!("failed to open log file {}", dir.join(name).display()))
}

/// Read `exit.json` from a worker state dir; `None` while still running.
pub fn read_exit(state_dir: &Path) -> Result<Option<ExitStatusFile>> {
    let path = state_dir.join("exit.json");
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

/// Read the dispatch metadata for a worker state dir.
pub fn read_dispatch(state_dir: &Path) -> Result<Option<DispatchRecord>> {
    let path = state_dir.join("dispatch.json");
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

/// Terminate a worker's whole process group. The wrapper's trap still
/// writes `exit.json`.
pub fn terminate_process_group(wrapper_pid: u32) {
    let Ok(pid) = i32::try_from(wrapper_pid) else {
        return;
    };
    if pid <= 0 {
        return;
    }
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGTERM) {
        tracing::warn!(wrapper_pid, error = %e, "failed to signal worker process group");
    }
}

/// RFC3339 seconds-precision timestamp, as written into `exit.json`.
pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
