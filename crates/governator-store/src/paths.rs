//! Well-known repo-relative paths (spec.md §6, "File-system layout").
//!
//! All paths are computed relative to a repository root, the way the
//! teacher's `WorktreeManager` takes `repo_path` and derives worktree and
//! branch locations from it (`gator-core/src/worktree/mod.rs`).

use std::path::{Path, PathBuf};

/// Paths under `<repo>/_governator/...`.
#[derive(Debug, Clone)]
pub struct RepoPaths {
    root: PathBuf,
}

impl RepoPaths {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self { root: repo_root.into() }
    }

    pub fn repo_root(&self) -> &Path {
        &self.root
    }

    fn governator(&self) -> PathBuf {
        self.root.join("_governator")
    }

    pub fn index_json(&self) -> PathBuf {
        self.governator().join("index.json")
    }

    pub fn planning_json(&self) -> PathBuf {
        self.governator().join("planning.json")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.governator().join("tasks")
    }

    pub fn roles_dir(&self) -> PathBuf {
        self.governator().join("roles")
    }

    pub fn role_prompt(&self, role: &str) -> PathBuf {
        self.roles_dir().join(format!("{role}.md"))
    }

    fn local_state(&self) -> PathBuf {
        self.governator().join("_local-state")
    }

    pub fn in_flight_json(&self) -> PathBuf {
        self.local_state().join("in-flight.json")
    }

    pub fn guard_timestamp(&self) -> PathBuf {
        self.local_state().join("guard.timestamp")
    }

    pub fn run_lock(&self) -> PathBuf {
        self.local_state().join("run.lock")
    }

    pub fn supervisor_json(&self) -> PathBuf {
        self.local_state().join("supervisor.json")
    }

    pub fn supervisor_log(&self) -> PathBuf {
        self.local_state().join("supervisor.log")
    }

    pub fn dag_json(&self) -> PathBuf {
        self.local_state().join("dag.json")
    }

    pub fn triage_state_json(&self) -> PathBuf {
        self.local_state().join("triage").join("state.json")
    }

    pub fn triage_dag_order_doc(&self) -> PathBuf {
        self.local_state().join("triage").join("dag-order-task.md")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.local_state().join("worktrees")
    }

    pub fn task_worktree(&self, task_id: &str) -> PathBuf {
        self.worktrees_dir().join(task_id)
    }

    pub fn worker_state_dir(&self, task_id: &str, attempt: u32, stage: &str, role: &str) -> PathBuf {
        self.task_worktree(task_id)
            .join("_local-state")
            .join(format!("worker-{attempt}-{stage}-{role}"))
    }

    fn durable_state(&self) -> PathBuf {
        self.governator().join("_durable-state")
    }

    pub fn config_json(&self) -> PathBuf {
        self.durable_state().join("config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_repo_relative_forward_slash() {
        let p = RepoPaths::new("/repo");
        assert_eq!(p.index_json(), PathBuf::from("/repo/_governator/index.json"));
        assert_eq!(
            p.worker_state_dir("t-1", 2, "test", "worker"),
            PathBuf::from("/repo/_governator/_local-state/worktrees/t-1/_local-state/worker-2-test-worker")
        );
    }
}
