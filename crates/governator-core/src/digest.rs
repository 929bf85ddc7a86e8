//! Drift Detector (spec.md §4.5, component C5).
//!
//! Compares stored content digests against freshly computed ones to
//! signal planning drift. Hashing reuses the teacher's `sha2`+`hex`
//! dependency pair (previously used for HMAC token signing in
//! `gator-core::token`); here it hashes file content directly instead of
//! signing a payload, since there is no token concept in this engine
//! (see DESIGN.md).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use governator_store::Digests;
use sha2::{Digest as _, Sha256};

/// The canonical project marker file whose hash participates in drift
/// detection alongside the planning docs (spec.md §4.5).
pub const PROJECT_MARKER_FILE: &str = "_governator/planning.json";

/// Directory scanned for planning docs (spec.md §4.5: "planning docs
/// discovered under a known directory").
pub const PLANNING_DOCS_DIR: &str = "_governator/planning";

/// One named difference between stored and computed digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftDetail {
    MarkerChanged,
    DocAdded(String),
    DocRemoved(String),
    DocChanged(String),
}

#[derive(Debug, Clone)]
pub struct DriftReport {
    pub has_drift: bool,
    pub details: Vec<DriftDetail>,
    pub message: String,
}

fn hash_file(path: &Path) -> Result<String> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read {} for digest", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

/// Recompute digests for `repo_root` (spec.md §4.5: "stable hash of the
/// canonical project marker file plus sorted (path, hash) pairs for
/// planning docs").
pub fn compute(repo_root: &Path) -> Result<Digests> {
    let marker_path = repo_root.join(PROJECT_MARKER_FILE);
    let marker_hash = if marker_path.exists() {
        hash_file(&marker_path)?
    } else {
        String::new()
    };

    let docs_dir = repo_root.join(PLANNING_DOCS_DIR);
    let mut planning_docs = BTreeMap::new();
    if docs_dir.is_dir() {
        for entry in std::fs::read_dir(&docs_dir)
            .with_context(|| format!("failed to list {}", docs_dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let rel = format!(
                "{PLANNING_DOCS_DIR}/{}",
                entry.file_name().to_string_lossy()
            );
            planning_docs.insert(rel, hash_file(&entry.path())?);
        }
    }

    Ok(Digests { marker_hash, planning_docs })
}

/// Compare `stored` against freshly computed digests for `repo_root`
/// (spec.md §4.5).
pub fn detect(repo_root: &Path, stored: &Digests) -> Result<DriftReport> {
    let computed = compute(repo_root)?;
    let mut details = Vec::new();

    if stored.marker_hash != computed.marker_hash {
        details.push(DriftDetail::MarkerChanged);
    }

    for path in computed.planning_docs.keys() {
        if !stored.planning_docs.contains_key(path) {
            details.push(DriftDetail::DocAdded(path.clone()));
        }
    }
    for (path, stored_hash) in &stored.planning_docs {
        match computed.planning_docs.get(path) {
            None => details.push(DriftDetail::DocRemoved(path.clone())),
            Some(computed_hash) if computed_hash != stored_hash => {
                details.push(DriftDetail::DocChanged(path.clone()))
            }
            _ => {}
        }
    }

    let has_drift = !details.is_empty();
    let message = if has_drift {
        format!("{} planning input(s) changed since last recorded digest", details.len())
    } else {
        "no drift".to_string()
    };

    Ok(DriftReport { has_drift, details, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("_governator/planning")).unwrap();
        std::fs::write(dir.path().join("_governator/planning.json"), r#"{"version":1,"steps":[]}"#).unwrap();
        std::fs::write(dir.path().join("_governator/planning/gap-analysis.md"), "hello").unwrap();
        dir
    }

    #[test]
    fn detect_is_idempotent() {
        let dir = seed_repo();
        let stored = compute(dir.path()).unwrap();
        let report = detect(dir.path(), &stored).unwrap();
        assert!(!report.has_drift);
        assert!(report.details.is_empty());
    }

    #[test]
    fn detect_flags_marker_change() {
        let dir = seed_repo();
        let stored = compute(dir.path()).unwrap();
        std::fs::write(dir.path().join("_governator/planning.json"), r#"{"version":2,"steps":[]}"#).unwrap();
        let report = detect(dir.path(), &stored).unwrap();
        assert!(report.has_drift);
        assert!(report.details.contains(&DriftDetail::MarkerChanged));
    }

    #[test]
    fn detect_flags_doc_added_and_removed() {
        let dir = seed_repo();
        let stored = compute(dir.path()).unwrap();
        std::fs::remove_file(dir.path().join("_governator/planning/gap-analysis.md")).unwrap();
        std::fs::write(dir.path().join("_governator/planning/new-step.md"), "new").unwrap();
        let report = detect(dir.path(), &stored).unwrap();
        assert!(report.has_drift);
        assert!(report
            .details
            .iter()
            .any(|d| matches!(d, DriftDetail::DocRemoved(p) if p.ends_with("gap-analysis.md"))));
        assert!(report
            .details
            .iter()
            .any(|d| matches!(d, DriftDetail::DocAdded(p) if p.ends_with("new-step.md"))));
    }

    #[test]
    fn detect_flags_doc_content_change() {
        let dir = seed_repo();
        let stored = compute(dir.path()).unwrap();
        std::fs::write(dir.path().join("_governator/planning/gap-analysis.md"), "changed").unwrap();
        let report = detect(dir.path(), &stored).unwrap();
        assert!(report
            .details
            .iter()
            .any(|d| matches!(d, DriftDetail::DocChanged(p) if p.ends_with("gap-analysis.md"))));
    }
}
