//! Supervisor run state (spec.md §3, §4.10): the single record a repo's
//! supervisor loop persists describing whether it is running, idle, or
//! stopped, and why.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::{load_json, save_json};

/// Coarse run state of the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Idle,
    Stopped,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Idle => "idle",
            RunState::Stopped => "stopped",
        }
    }
}

/// Persisted supervisor status, read by operators and by the self-run
/// guard to decide whether a concurrent invocation should stand down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorState {
    pub run_state: RunState,
    pub pid: u32,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
}

impl SupervisorState {
    pub fn running(pid: u32) -> Self {
        Self { run_state: RunState::Running, pid, last_sweep_at: None, stop_reason: None }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    pub fn record_sweep(&mut self, at: DateTime<Utc>) {
        self.last_sweep_at = Some(at);
    }

    pub fn stop(&mut self, reason: impl Into<String>) {
        self.run_state = RunState::Stopped;
        self.stop_reason = Some(reason.into());
    }

    pub fn idle(&mut self) {
        self.run_state = RunState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("supervisor.json");
        let mut state = SupervisorState::running(999);
        state.record_sweep(Utc::now());
        state.save(&path).unwrap();
        let loaded = SupervisorState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.pid, 999);
        assert_eq!(loaded.run_state, RunState::Running);
    }

    #[test]
    fn stop_sets_reason() {
        let mut state = SupervisorState::running(1);
        state.stop("planning drift detected");
        assert_eq!(state.run_state, RunState::Stopped);
        assert_eq!(state.stop_reason.as_deref(), Some("planning drift detected"));
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        assert!(SupervisorState::load(&path).unwrap().is_none());
    }
}
