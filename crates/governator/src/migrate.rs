//! Idempotent durable-state migrations.
//!
//! Each migration runs at most once per repository; a marker file under
//! `_durable-state/migrations/<id>.done` records completion. Re-running the
//! engine (or the migration pass) is a no-op for markered migrations.

use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::EngineConfig;
use crate::layout::Layout;

struct Migration {
    id: &'static str,
    run: fn(&Layout) -> Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "0001-create-state-dirs",
        run: create_state_dirs,
    },
    Migration {
        id: "0002-seed-default-config",
        run: seed_default_config,
    },
];

fn create_state_dirs(layout: &Layout) -> Result<()> {
    for dir in [
        layout.durable_state_dir(),
        layout.local_state_dir(),
        layout.logs_dir(),
        layout.worktrees_dir(),
        layout.supervisor_dir(),
    ] {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}

fn seed_default_config(layout: &Layout) -> Result<()> {
    let path = layout.config_path();
    if path.exists() {
        return Ok(());
    }
    let mut body = serde_json::to_string_pretty(&EngineConfig::default())?;
    body.push('\n');
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Run all unmarkered migrations in order. Returns how many actually ran.
pub fn run_migrations(layout: &Layout) -> Result<usize> {
    fs::create_dir_all(layout.migrations_dir())
        .with_context(|| format!("failed to create {}", layout.migrations_dir().display()))?;

    let mut applied = 0;
    for migration in MIGRATIONS {
        let marker = layout.migration_marker(migration.id);
        if marker.exists() {
            continue;
        }
        (migration.run)(layout).with_context(|| format!("migration {} failed", migration.id))?;
        fs::write(&marker, b"done\n")
            .with_context(|| format!("failed to write {}", marker.display()))?;
        info!(id = migration.id, "applied migration");
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());

        let first = run_migrations(&layout).unwrap();
        assert_eq!(first, MIGRATIONS.len());
        assert!(layout.local_state_dir().is_dir());
        assert!(layout.config_path().is_file());

        let second = run_migrations(&layout).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn seeded_config_is_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        run_migrations(&layout).unwrap();
        let config = EngineConfig::load(&layout).unwrap();
        assert_eq!(config.concurrency.global, 2);
    }

    #[test]
    fn existing_config_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        fs::create_dir_all(layout.durable_state_dir()).unwrap();
        fs::write(layout.config_path(), r#"{"concurrency": {"global": 9}}"#).unwrap();

        run_migrations(&layout).unwrap();
        let config = EngineConfig::load(&layout).unwrap();
        assert_eq!(config.concurrency.global, 9);
    }
}
