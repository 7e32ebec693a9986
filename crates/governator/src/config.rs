//! Engine configuration.
//!
//! Defaults are built in; the durable `config.json` overlays them field by
//! field (`#[serde(default)]` layering); a couple of `GOVERNATOR_*`
//! environment variables override on top for operator convenience.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use taskindex::Caps;

use crate::layout::Layout;

/// Which CLI agent the workers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CliAgent {
    Codex,
    Claude,
    Gemini,
}

impl fmt::Display for CliAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliAgent::Codex => write!(f, "codex"),
            CliAgent::Claude => write!(f, "claude"),
            CliAgent::Gemini => write!(f, "gemini"),
        }
    }
}

/// Reasoning effort requested from the agent. `medium` is the CLI default
/// and needs no injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    High,
    Medium,
    Low,
}

impl EffortLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EffortLevel::High => "high",
            EffortLevel::Medium => "medium",
            EffortLevel::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub worker_seconds: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            worker_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Concurrency {
    pub global: usize,
    pub default_role: i64,
    pub roles: BTreeMap<String, i64>,
}

impl Default for Concurrency {
    fn default() -> Self {
        Self {
            global: 2,
            default_role: 1,
            roles: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Worker command templates. Precedence at resolution time:
/// role-specific override > default override > built-in for `cli`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerCommands {
    pub default: Option<String>,
    pub roles: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Workers {
    pub cli: CliAgent,
    pub commands: WorkerCommands,
}

impl Default for Workers {
    fn default() -> Self {
        Self {
            cli: CliAgent::Codex,
            commands: WorkerCommands::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningEffort {
    pub default: EffortLevel,
    pub roles: BTreeMap<String, EffortLevel>,
}

impl Default for ReasoningEffort {
    fn default() -> Self {
        Self {
            default: EffortLevel::Medium,
            roles: BTreeMap::new(),
        }
    }
}

impl ReasoningEffort {
    pub fn for_role(&self, role: &str) -> EffortLevel {
        self.roles.get(role).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Branches {
    pub base: String,
}

impl Default for Branches {
    fn default() -> Self {
        Self {
            base: "main".into(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeouts: Timeouts,
    pub concurrency: Concurrency,
    pub retries: RetryPolicy,
    pub workers: Workers,
    pub reasoning_effort: ReasoningEffort,
    pub branches: Branches,
    pub poll_interval_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            concurrency: Concurrency::default(),
            retries: RetryPolicy::default(),
            workers: Workers::default(),
            reasoning_effort: ReasoningEffort::default(),
            branches: Branches::default(),
            poll_interval_seconds: 2,
        }
    }
}

impl EngineConfig {
    /// Load defaults, overlay the durable config file when present, then
    /// apply environment overrides.
    pub fn load(layout: &Layout) -> Result<Self> {
        let path = layout.config_path();
        let mut config = if path.is_file() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(v) = std::env::var("GOVERNATOR_POLL_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                config.poll_interval_seconds = secs;
            }
        }
        if let Ok(v) = std::env::var("GOVERNATOR_WORKER_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                config.timeouts.worker_seconds = secs;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeouts.worker_seconds == 0 {
            bail!("timeouts.worker_seconds must be positive");
        }
        if self.branches.base.is_empty() {
            bail!("branches.base must not be empty");
        }
        if let Some(template) = &self.workers.commands.default {
            validate_template(template)?;
        }
        for (role, template) in &self.workers.commands.roles {
            validate_template(template)
                .with_context(|| format!("workers.commands.roles.{role}"))?;
        }
        Ok(())
    }

    /// Scheduler caps derived from the concurrency section.
    pub fn caps(&self) -> Caps {
        Caps {
            global: self.concurrency.global,
            default_role: self.concurrency.default_role,
            roles: self.concurrency.roles.clone(),
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn worker_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeouts.worker_seconds)
    }
}

/// A usable command template must reference the task or the staged prompt.
pub fn validate_template(template: &str) -> Result<()> {
    if !template.contains("{task_path}") && !template.contains("{prompt_path}") {
        bail!("command template must contain {{task_path}} or {{prompt_path}}: `{template}`");
    }
    Ok(())
}
