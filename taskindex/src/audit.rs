//! Append-only logfmt audit log.
//!
//! Every state change, worktree operation, and worker invocation emits one
//! line here. Records begin `ts=… task_id=… role=… event=…` followed by
//! event-specific fields. Writers serialize through an in-process mutex;
//! write failures are logged and swallowed so auditing can never fail the
//! operation that emitted it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

/// Handle to the audit log file. Cheap to share by reference; cloning is
/// deliberately not provided so there is one writer mutex per file.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. `fields` follow the fixed prefix in the order
    /// given. Never returns an error.
    pub fn record(&self, task_id: &str, role: &str, event: &str, fields: &[(&str, &str)]) {
        let mut line = format!(
            "ts={} task_id={} role={} event={}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            logfmt_value(task_id),
            logfmt_value(role),
            logfmt_value(event),
        );
        for (key, value) in fields {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&logfmt_value(value));
        }
        line.push('\n');

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.append_line(&line) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

/// Quote a logfmt value when it contains whitespace, quotes, or `=`.
fn logfmt_value(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=');
    if needs_quoting {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}
