//! Engine error taxonomy (spec.md §7).
//!
//! Leaf errors that callers must distinguish by type use [`thiserror`],
//! mirroring the teacher's `WorktreeError` (`gator-core::worktree`).
//! Everything else propagates as `anyhow::Result` with `.context()`, the
//! same split the teacher uses between `WorktreeError` and the ambient
//! `anyhow` plumbing in `lifecycle::mod`.

use thiserror::Error;

/// Errors the supervisor and run entry point must distinguish from an
/// ordinary fatal error (spec.md §6, "Exit codes": "Drift carries a
/// sentinel error type distinguishable by callers").
#[derive(Debug, Error)]
pub enum EngineError {
    /// Drift detected outside supervisor mode (spec.md §4.5, §7 class 2).
    #[error("planning drift detected: {0}")]
    PlanningDrift(String),

    /// A configuration error (spec.md §7 class 1): missing/invalid spec,
    /// unknown role, or empty command. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The self-run guard's repo lock is already held by another process
    /// (spec.md §4.11, §8: "Two supervisors cannot both hold the
    /// supervisor lock for the same repoRoot").
    #[error("supervisor lock already held for this repository")]
    SupervisorLockHeld,

    /// The self-run guard's cooldown has not elapsed (spec.md §4.11).
    #[error("run blocked by cooldown: try again in {remaining_seconds}s")]
    GuardCooldown { remaining_seconds: u64 },
}

/// Git/worktree errors (spec.md §4.4, §7 class 3), split by lexical
/// classification: conflicts are recoverable, everything else is fatal
/// to the current operation. Mirrors the teacher's `WorktreeError`.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("not a git repository: {0}")]
    NotARepo(std::path::PathBuf),

    #[error("git command failed: {message}")]
    Command {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit { command: String, code: i32, stderr: String },

    #[error("merge conflict: {details}")]
    Conflict { details: String },

    #[error("failed to parse git output: {0}")]
    Parse(String),
}

impl VcsError {
    /// True when this error represents a recoverable merge conflict
    /// rather than a fatal VCS failure (spec.md §4.4: "Conflict
    /// classification is lexical over git's error text").
    pub fn is_conflict(&self) -> bool {
        matches!(self, VcsError::Conflict { .. })
    }
}

/// Lexical conflict classification over git stderr/stdout text (spec.md
/// §4.4, §9 open question: "purely lexical ... a structured replacement
/// ... is acceptable and preferable" — kept lexical here per the spec's
/// explicit default, see DESIGN.md).
pub fn classify_merge_output(stdout: &str, stderr: &str) -> Option<VcsError> {
    const MARKERS: [&str; 4] = [
        "conflict",
        "could not apply",
        "automatic merge failed",
        "merge conflict",
    ];
    let combined = format!("{stdout}\n{stderr}").to_lowercase();
    if MARKERS.iter().any(|m| combined.contains(m)) {
        Some(VcsError::Conflict { details: format!("{stdout}\n{stderr}").trim().to_string() })
    } else {
        None
    }
}
