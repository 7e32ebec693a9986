//! Single-supervisor run lock.
//!
//! At most one supervisor process may run against a repository. The lock is
//! a file created with `O_CREAT | O_EXCL` holding two lines:
//!
//! ```text
//! pid=<n>
//! started_at=<rfc3339>
//! ```
//!
//! A held lock whose owner PID is still alive means another supervisor is
//! running. A lock whose owner is gone is stale: it is reported with removal
//! instructions, never silently taken, so an operator always sees when a
//! previous run died uncleanly.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use nix::sys::signal::kill;
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum RunLockError {
    #[error(
        "another supervisor is already running (pid {pid}, started {started_at}); \
         lock: {path}"
    )]
    Held {
        path: PathBuf,
        pid: u32,
        started_at: String,
    },
    #[error(
        "stale run lock at {path}: owner pid {pid} is not alive; inspect the previous \
         run's state, then remove the lock file to continue"
    )]
    Stale { path: PathBuf, pid: u32 },
    #[error("unreadable run lock at {path}: {detail}; remove the lock file to continue")]
    Corrupt { path: PathBuf, detail: String },
    #[error("run lock io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Held run lock. Released explicitly or best-effort on drop, including on
/// the signal-shutdown path.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    released: bool,
}

impl RunLock {
    /// Acquire the run lock, non-blocking.
    pub fn acquire(path: &Path) -> Result<Self, RunLockError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RunLockError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let body = format!(
                    "pid={}\nstarted_at={}\n",
                    std::process::id(),
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
                );
                file.write_all(body.as_bytes())
                    .and_then(|()| file.sync_all())
                    .map_err(|e| RunLockError::Io {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Self {
                    path: path.to_path_buf(),
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Self::classify_existing(path))
            }
            Err(e) => Err(RunLockError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn classify_existing(path: &Path) -> RunLockError {
        let (pid, started_at) = match read_lock(path) {
            Ok(parsed) => parsed,
            Err(detail) => {
                return RunLockError::Corrupt {
                    path: path.to_path_buf(),
                    detail,
                }
            }
        };
        if pid_alive(pid) {
            RunLockError::Held {
                path: path.to_path_buf(),
                pid,
                started_at,
            }
        } else {
            RunLockError::Stale {
                path: path.to_path_buf(),
                pid,
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Safe to call once; drop covers early-exit paths.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove run lock");
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Parse the two-line lock format. Returns (pid, started_at).
fn read_lock(path: &Path) -> Result<(u32, String), String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut pid = None;
    let mut started_at = None;
    for line in content.lines() {
        if let Some(v) = line.strip_prefix("pid=") {
            pid = v.trim().parse::<u32>().ok();
        } else if let Some(v) = line.strip_prefix("started_at=") {
            started_at = Some(v.trim().to_string());
        }
    }
    match (pid, started_at) {
        (Some(pid), Some(started_at)) => Ok((pid, started_at)),
        _ => Err(format!("expected pid=/started_at= lines, got: {content:?}")),
    }
}

/// Signal-0 probe: does the PID name a live process we can see?
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    kill(Pid::from_raw(pid), None).is_ok()
}
