//! Governance input digests and drift detection.
//!
//! The index stores sha256 digests of `GOVERNATOR.md` and every planning
//! doc it was generated from. Before advancing planning, the engine
//! recomputes them; a mismatch means the governance inputs changed after
//! planning ran, and the plan can no longer be trusted. Execution is
//! unaffected by drift.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use crate::task::Digests;

/// Repo-relative location of the governance doc.
pub const GOVERNATOR_MD: &str = "GOVERNATOR.md";

/// Hex sha256 of raw bytes, with the scheme prefix used throughout the index.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Digest one file's current content.
pub fn digest_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read {} for digesting", path.display()))?;
    Ok(sha256_hex(&bytes))
}

/// Compute fresh digests for `GOVERNATOR.md` and the given repo-relative
/// planning doc paths.
pub fn compute_digests(repo_root: &Path, planning_docs: &[String]) -> Result<Digests> {
    let governator_md = digest_file(&repo_root.join(GOVERNATOR_MD))?;
    let mut docs = BTreeMap::new();
    for rel in planning_docs {
        docs.insert(rel.clone(), digest_file(&repo_root.join(rel))?);
    }
    Ok(Digests {
        governator_md,
        planning_docs: docs,
    })
}

/// Outcome of comparing stored digests against current file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub has_drift: bool,
    /// Repo-relative paths whose content no longer matches the stored digest.
    pub changed: Vec<String>,
    /// Operator-facing message; empty when there is no drift.
    pub message: String,
}

impl DriftReport {
    fn clean() -> Self {
        Self {
            has_drift: false,
            changed: Vec::new(),
            message: String::new(),
        }
    }
}

/// Compare stored digests against the files on disk.
///
/// A planning doc that was deleted counts as changed. Stored digests that
/// are empty (pre-planning index) are skipped.
pub fn detect_drift(repo_root: &Path, stored: &Digests) -> Result<DriftReport> {
    let mut changed = Vec::new();

    if !stored.governator_md.is_empty() {
        let current = digest_file(&repo_root.join(GOVERNATOR_MD))?;
        if current != stored.governator_md {
            changed.push(GOVERNATOR_MD.to_string());
        }
    }

    for (rel, digest) in &stored.planning_docs {
        let path = repo_root.join(rel);
        let current = if path.is_file() {
            digest_file(&path)?
        } else {
            String::new()
        };
        if &current != digest {
            changed.push(rel.clone());
        }
    }

    if changed.is_empty() {
        return Ok(DriftReport::clean());
    }

    let mut message = String::from("Planning drift detected; replan required.");
    for path in &changed {
        message.push_str(&format!(" {path} changed."));
    }
    Ok(DriftReport {
        has_drift: true,
        changed,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            sha256_hex(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"governator"),
            sha256_hex(b"governator")
        );
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }

    #[test]
    fn clean_repo_has_no_drift() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(GOVERNATOR_MD), "# Governance\n").unwrap();
        let docs_dir = dir.path().join("_governator/docs");
        fs::create_dir_all(&docs_dir).unwrap();
        fs::write(docs_dir.join("plan.md"), "plan\n").unwrap();

        let digests =
            compute_digests(dir.path(), &["_governator/docs/plan.md".to_string()]).unwrap();
        let report = detect_drift(dir.path(), &digests).unwrap();
        assert!(!report.has_drift);
        assert!(report.message.is_empty());
    }

    #[test]
    fn governator_md_change_reports_drift() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(GOVERNATOR_MD), "v1").unwrap();
        let digests = compute_digests(dir.path(), &[]).unwrap();

        fs::write(dir.path().join(GOVERNATOR_MD), "v2").unwrap();
        let report = detect_drift(dir.path(), &digests).unwrap();

        assert!(report.has_drift);
        assert!(report
            .message
            .starts_with("Planning drift detected; replan required."));
        assert!(report.message.contains("GOVERNATOR.md changed"));
    }

    #[test]
    fn deleted_planning_doc_counts_as_drift() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(GOVERNATOR_MD), "v1").unwrap();
        fs::create_dir_all(dir.path().join("_governator/docs")).unwrap();
        fs::write(dir.path().join("_governator/docs/plan.md"), "plan").unwrap();
        let digests =
            compute_digests(dir.path(), &["_governator/docs/plan.md".to_string()]).unwrap();

        fs::remove_file(dir.path().join("_governator/docs/plan.md")).unwrap();
        let report = detect_drift(dir.path(), &digests).unwrap();
        assert!(report.has_drift);
        assert_eq!(report.changed, vec!["_governator/docs/plan.md".to_string()]);
    }

    #[test]
    fn empty_stored_digests_skip_comparison() {
        let dir = tempfile::tempdir().unwrap();
        // No GOVERNATOR.md on disk either; empty digests mean pre-planning.
        let report = detect_drift(dir.path(), &Digests::default()).unwrap();
        assert!(!report.has_drift);
    }
}
