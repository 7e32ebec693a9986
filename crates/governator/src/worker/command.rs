//! Worker command resolution.
//!
//! Selects the command template for a role (role-specific override >
//! default override > built-in for the configured CLI agent), substitutes
//! the placeholder variables, and splits the result into argv. For the
//! Codex CLI, non-default reasoning effort is injected as a config flag
//! right after the executable; other CLIs get a reasoning prompt prepended
//! at staging time instead.

use std::path::Path;

use crate::config::{CliAgent, EffortLevel, EngineConfig};

/// Failure to produce a runnable worker command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("no command template for role `{role}` and no default or built-in")]
    NoTemplate { role: String },
    #[error("command template must contain {{task_path}} or {{prompt_path}}: `{template}`")]
    MissingPlaceholder { template: String },
    #[error("command template does not tokenize: `{template}`")]
    Unparseable { template: String },
    #[error("command template is empty after substitution")]
    Empty,
}

/// Values substituted into the template.
#[derive(Debug, Clone)]
pub struct Substitutions<'a> {
    pub task_path: &'a Path,
    pub prompt_path: &'a Path,
    pub repo_root: &'a Path,
    pub role: &'a str,
}

/// A resolved worker command, ready for the dispatch wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub argv: Vec<String>,
}

impl ResolvedCommand {
    /// Shell-quoted single line, for dispatch.sh and audit records.
    pub fn display(&self) -> String {
        self.argv
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn builtin_template(cli: CliAgent) -> &'static str {
    match cli {
        CliAgent::Codex => "codex exec --full-auto {prompt_path}",
        CliAgent::Claude => "claude -p {prompt_path} --permission-mode acceptEdits",
        CliAgent::Gemini => "gemini --prompt-file {prompt_path} --yolo",
    }
}

/// Resolve the worker command for a role at a reasoning effort level.
pub fn resolve(
    config: &EngineConfig,
    role: &str,
    effort: EffortLevel,
    subst: &Substitutions<'_>,
) -> Result<ResolvedCommand, CommandError> {
    let commands = &config.workers.commands;
    let template = commands
        .roles
        .get(role)
        .map(String::as_str)
        .or(commands.default.as_deref())
        .unwrap_or_else(|| builtin_template(config.workers.cli));

    if !template.contains("{task_path}") && !template.contains("{prompt_path}") {
        return Err(CommandError::MissingPlaceholder {
            template: template.to_string(),
        });
    }

    let substituted = template
        .replace("{task_path}", &subst.task_path.display().to_string())
        .replace("{prompt_path}", &subst.prompt_path.display().to_string())
        .replace("{repo_root}", &subst.repo_root.display().to_string())
        .replace("{role}", subst.role);

    let mut argv = shlex::split(&substituted).ok_or_else(|| CommandError::Unparseable {
        template: template.to_string(),
    })?;
    if argv.is_empty() {
        return Err(CommandError::Empty);
    }

    // Codex takes effort as a config flag; medium is the CLI default.
    if config.workers.cli == CliAgent::Codex && effort != EffortLevel::Medium {
        argv.insert(1, "--config".to_string());
        argv.insert(
            2,
            format!("model_reasoning_effort=\"{}\"", effort.as_str()),
        );
    }

    Ok(ResolvedCommand { argv })
}

/// Quote one argv token for POSIX sh.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
