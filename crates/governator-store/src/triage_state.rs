//! Backlog triage cursor state (spec.md §4.9): tracks retry bookkeeping
//! for the triage pass that turns `Backlog` tasks into a dependency-ordered
//! DAG.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::{load_json, save_json};

/// `{attempt; last_error; last_attempt_at}` (spec.md §4.9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageState {
    pub attempt: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl TriageState {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(load_json::<Self>(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    pub fn record_attempt(&mut self, at: DateTime<Utc>) {
        self.attempt += 1;
        self.last_attempt_at = Some(at);
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn record_success(&mut self) {
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_attempt_increments_counter() {
        let mut state = TriageState::default();
        state.record_attempt(Utc::now());
        state.record_attempt(Utc::now());
        assert_eq!(state.attempt, 2);
    }

    #[test]
    fn record_success_clears_last_error() {
        let mut state = TriageState::default();
        state.record_failure("dag cycle");
        assert_eq!(state.last_error.as_deref(), Some("dag cycle"));
        state.record_success();
        assert!(state.last_error.is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut state = TriageState::default();
        state.record_attempt(Utc::now());
        state.record_failure("bad dag");
        state.save(&path).unwrap();
        let loaded = TriageState::load(&path).unwrap();
        assert_eq!(loaded.attempt, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("bad dag"));
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        let loaded = TriageState::load(&path).unwrap();
        assert_eq!(loaded.attempt, 0);
    }
}
