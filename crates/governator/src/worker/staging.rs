//! Prompt staging.
//!
//! Assembles the prompt input for one task attempt at one stage: the
//! ordered prompt file list, a single concatenated prompt markdown file,
//! and an env file exposing the `GOVERNATOR_*` variables the worker
//! contract documents. Every required prompt file must exist as a regular
//! file before dispatch; missing ones are fatal.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use taskindex::Task;

use crate::config::{CliAgent, EffortLevel};
use crate::layout::Layout;
use crate::worker::Stage;

/// Artifacts staged for one worker run.
#[derive(Debug, Clone)]
pub struct StagedPrompt {
    /// Concatenated prompt markdown.
    pub prompt_path: PathBuf,
    /// One prompt source path per line, in read order.
    pub prompt_list_path: PathBuf,
    /// `KEY=value` lines sourced by the dispatch wrapper.
    pub env_path: PathBuf,
    /// The source files, in order.
    pub files: Vec<PathBuf>,
}

/// Compute the ordered prompt file list for a task at a stage.
///
/// Order: reasoning prompt (non-Codex CLIs at non-medium effort only),
/// worker contract, role prompt, optional global and role custom prompts,
/// then the task file itself.
pub fn prompt_files(
    layout: &Layout,
    task: &Task,
    cli: CliAgent,
    effort: EffortLevel,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if cli != CliAgent::Codex && effort != EffortLevel::Medium {
        files.push(layout.reasoning_prompt(effort.as_str()));
    }
    files.push(layout.worker_contract());
    files.push(layout.role_prompt(&task.role));

    for optional in [
        layout.custom_global_prompt(),
        layout.custom_role_prompt(&task.role),
    ] {
        if optional.is_file() {
            files.push(optional);
        }
    }

    files.push(layout.repo_root().join(&task.path));

    for file in &files {
        if !file.is_file() {
            bail!("required prompt file missing: {}", file.display());
        }
    }
    Ok(files)
}

/// Stage the prompt artifacts into `worker_dir`.
#[allow(clippy::too_many_arguments)]
pub fn stage(
    layout: &Layout,
    task: &Task,
    stage: Stage,
    worktree_dir: &Path,
    worker_dir: &Path,
    cli: CliAgent,
    effort: EffortLevel,
) -> Result<StagedPrompt> {
    fs::create_dir_all(worker_dir)
        .with_context(|| format!("failed to create worker dir {}", worker_dir.display()))?;

    let files = prompt_files(layout, task, cli, effort)?;

    let prompt_list_path = worker_dir.join("prompt-files.txt");
    let mut listing = String::new();
    for file in &files {
        listing.push_str(&file.display().to_string());
        listing.push('\n');
    }
    fs::write(&prompt_list_path, listing)
        .with_context(|| format!("failed to write {}", prompt_list_path.display()))?;

    let prompt_path = worker_dir.join("prompt.md");
    let mut prompt = String::new();
    for (i, file) in files.iter().enumerate() {
        let content = fs::read_to_string(file)
            .with_context(|| format!("failed to read prompt file {}", file.display()))?;
        if i > 0 {
            prompt.push('\n');
        }
        prompt.push_str(&content);
        if !content.ends_with('\n') {
            prompt.push('\n');
        }
    }
    fs::write(&prompt_path, prompt)
        .with_context(|| format!("failed to write {}", prompt_path.display()))?;

    let env_path = worker_dir.join("env");
    let task_path = layout.repo_root().join(&task.path);
    let env = format!(
        "GOVERNATOR_TASK_ID={}\n\
         GOVERNATOR_TASK_PATH={}\n\
         GOVERNATOR_ROLE={}\n\
         GOVERNATOR_STAGE={}\n\
         GOVERNATOR_WORKTREE_DIR={}\n\
         GOVERNATOR_PROMPT_PATH={}\n\
         GOVERNATOR_PROMPT_LIST={}\n\
         GOVERNATOR_WORKER_STATE_DIR={}\n",
        task.id,
        task_path.display(),
        task.role,
        stage,
        worktree_dir.display(),
        prompt_path.display(),
        prompt_list_path.display(),
        worker_dir.display(),
    );
    fs::write(&env_path, env).with_context(|| format!("failed to write {}", env_path.display()))?;

    Ok(StagedPrompt {
        prompt_path,
        prompt_list_path,
        env_path,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskindex::TaskState;

    fn seed_repo(root: &Path, role: &str) -> Task {
        let gov = root.join("_governator");
        fs::create_dir_all(gov.join("roles")).unwrap();
        fs::create_dir_all(gov.join("reasoning")).unwrap();
        fs::create_dir_all(gov.join("tasks")).unwrap();
        fs::write(gov.join("worker-contract.md"), "# Contract\n").unwrap();
        fs::write(gov.join(format!("roles/{role}.md")), "# Role\n").unwrap();
        fs::write(gov.join("reasoning/high.md"), "# Think hard\n").unwrap();
        fs::write(gov.join("tasks/t1.md"), "# Task t1\n").unwrap();

        let mut task = Task::execution("t1", TaskState::Triaged);
        task.role = role.to_string();
        task.path = "_governator/tasks/t1.md".to_string();
        task
    }

    #[test]
    fn staging_writes_list_prompt_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let task = seed_repo(dir.path(), "engineer");
        let worker_dir = layout.worker_state_dir("t1", "work");
        let worktree = dir.path().join("wt");

        let staged = stage(
            &layout,
            &task,
            Stage::Work,
            &worktree,
            &worker_dir,
            CliAgent::Codex,
            EffortLevel::Medium,
        )
        .unwrap();

        let listing = fs::read_to_string(&staged.prompt_list_path).unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("worker-contract.md"));
        assert!(lines[1].ends_with("roles/engineer.md"));
        assert!(lines[2].ends_with("tasks/t1.md"));

        let prompt = fs::read_to_string(&staged.prompt_path).unwrap();
        assert_eq!(prompt, "# Contract\n\n# Role\n\n# Task t1\n");

        let env = fs::read_to_string(&staged.env_path).unwrap();
        assert!(env.contains("GOVERNATOR_TASK_ID=t1\n"));
        assert!(env.contains("GOVERNATOR_ROLE=engineer\n"));
        assert!(env.contains("GOVERNATOR_STAGE=work\n"));
        assert!(env.contains(&format!(
            "GOVERNATOR_WORKTREE_DIR={}\n",
            worktree.display()
        )));
        assert!(env.contains("GOVERNATOR_PROMPT_PATH="));
        assert!(env.contains("GOVERNATOR_PROMPT_LIST="));
        assert!(env.contains("GOVERNATOR_WORKER_STATE_DIR="));
        assert!(env.contains("GOVERNATOR_TASK_PATH="));
    }

    #[test]
    fn reasoning_prompt_prepended_for_non_codex_high() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let task = seed_repo(dir.path(), "engineer");

        let files = prompt_files(&layout, &task, CliAgent::Claude, EffortLevel::High).unwrap();
        assert!(files[0].ends_with("reasoning/high.md"));
        assert!(files[1].ends_with("worker-contract.md"));
    }

    #[test]
    fn codex_skips_reasoning_prompt_even_at_high() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let task = seed_repo(dir.path(), "engineer");

        let files = prompt_files(&layout, &task, CliAgent::Codex, EffortLevel::High).unwrap();
        assert!(files[0].ends_with("worker-contract.md"));
    }

    #[test]
    fn medium_effort_never_adds_reasoning_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let task = seed_repo(dir.path(), "engineer");

        let files = prompt_files(&layout, &task, CliAgent::Gemini, EffortLevel::Medium).unwrap();
        assert!(files[0].ends_with("worker-contract.md"));
    }

    #[test]
    fn custom_prompts_included_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let task = seed_repo(dir.path(), "engineer");
        fs::create_dir_all(dir.path().join("_governator/custom-prompts")).unwrap();
        fs::write(
            dir.path().join("_governator/custom-prompts/_global.md"),
            "# Global\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("_governator/custom-prompts/engineer.md"),
            "# Custom role\n",
        )
        .unwrap();

        let files = prompt_files(&layout, &task, CliAgent::Codex, EffortLevel::Medium).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "worker-contract.md",
                "engineer.md",
                "_global.md",
                "engineer.md",
                "t1.md"
            ]
        );
    }

    #[test]
    fn missing_required_prompt_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let task = seed_repo(dir.path(), "engineer");
        fs::remove_file(dir.path().join("_governator/worker-contract.md")).unwrap();

        let err = prompt_files(&layout, &task, CliAgent::Codex, EffortLevel::Medium).unwrap_err();
        assert!(err.to_string().contains("worker-contract.md"));
    }

    #[test]
    fn missing_role_prompt_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let mut task = seed_repo(dir.path(), "engineer");
        task.role = "ghost".into();

        let err = prompt_files(&layout, &task, CliAgent::Codex, EffortLevel::Medium).unwrap_err();
        assert!(err.to_string().contains("roles/ghost.md"));
    }

    #[test]
    fn missing_reasoning_prompt_is_fatal_when_required() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let task = seed_repo(dir.path(), "engineer");

        // low.md was never seeded.
        let err = prompt_files(&layout, &task, CliAgent::Claude, EffortLevel::Low).unwrap_err();
        assert!(err.to_string().contains("reasoning/low.md"));
    }
}
