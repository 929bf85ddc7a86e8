//! Persistent Index Store (spec.md §4.1, component C1).
//!
//! Loads and saves the task index atomically, and exposes the small set
//! of read operations the scheduler and supervisor need. Modeled after
//! the teacher's `gator-db::queries::tasks` query module, but backed by
//! an in-memory `Vec<Task>` rather than SQL rows: there is exactly one
//! writer (the supervisor), so no row-level locking is needed, only the
//! atomic-file discipline in `crate::atomic`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::atomic::{load_json, save_json};
use crate::models::{PLANNING_TASK_ID, Task, TaskKind, TaskState};

/// Schema version written by this crate. A mismatch on load is a fatal
/// error (spec.md §4.1: "schema version mismatch is a fatal load error").
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Content digests used by the drift detector (spec.md §4.5).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digests {
    /// Hash of the canonical project marker file.
    pub marker_hash: String,
    /// path -> hash for every planning doc discovered under the known
    /// planning-docs directory.
    pub planning_docs: BTreeMap<String, String>,
}

/// `{schema_version; digests; ordered sequence of tasks}` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub schema_version: u32,
    pub digests: Digests,
    pub tasks: Vec<Task>,
}

impl Index {
    /// A brand-new, empty index, not yet seeded with a planning task.
    pub fn empty() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            digests: Digests::default(),
            tasks: Vec::new(),
        }
    }

    /// Validate index invariants (spec.md §3): unique IDs, dependencies
    /// reference tasks present in the same index, at most one planning
    /// task with the well-known ID.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut planning_count = 0;
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                bail!("duplicate task id in index: {}", task.id);
            }
            if task.kind == TaskKind::Planning {
                planning_count += 1;
                if task.id != PLANNING_TASK_ID {
                    bail!(
                        "planning task must use id {:?}, found {:?}",
                        PLANNING_TASK_ID,
                        task.id
                    );
                }
            }
        }
        if planning_count > 1 {
            bail!("index has {} planning tasks, expected at most 1", planning_count);
        }
        for task in &self.tasks {
            for dep in &task.dependencies {
                if !seen.contains(dep.as_str()) {
                    bail!(
                        "task {} depends on unknown task {}",
                        task.id,
                        dep
                    );
                }
            }
        }
        Ok(())
    }
}

/// Load the index from `path`. Returns `Ok(None)` if the file does not
/// exist yet (not yet seeded by scaffolding).
pub fn load(path: &Path) -> Result<Option<Index>> {
    let Some(index) = load_json::<Index>(path)? else {
        return Ok(None);
    };
    if index.schema_version != CURRENT_SCHEMA_VERSION {
        bail!(
            "index schema version mismatch: file has {}, expected {}",
            index.schema_version,
            CURRENT_SCHEMA_VERSION
        );
    }
    index.validate()?;
    Ok(Some(index))
}

/// Atomically save the index. Index-save failures are fatal to the
/// caller (spec.md §7, class 8): the index is authoritative.
pub fn save(path: &Path, index: &Index) -> Result<()> {
    index.validate()?;
    save_json(path, index)
}

pub fn find_by_id<'a>(index: &'a Index, id: &str) -> Option<&'a Task> {
    index.tasks.iter().find(|t| t.id == id)
}

pub fn find_by_id_mut<'a>(index: &'a mut Index, id: &str) -> Option<&'a mut Task> {
    index.tasks.iter_mut().find(|t| t.id == id)
}

/// Update the planning task's workstream cursor. `step_id` of `None`
/// resets to `PlanningNotStarted`; pass `Some("")`-free explicit step ids.
pub fn update_planning_state(index: &mut Index, step_id: Option<&str>) -> Result<()> {
    let Some(task) = find_by_id_mut(index, PLANNING_TASK_ID) else {
        bail!("index has no planning task to update");
    };
    task.state = match step_id {
        None => TaskState::PlanningNotStarted,
        Some(id) => TaskState::PlanningStep { step_id: id.to_string() },
    };
    Ok(())
}

pub fn mark_planning_complete(index: &mut Index) -> Result<()> {
    let Some(task) = find_by_id_mut(index, PLANNING_TASK_ID) else {
        bail!("index has no planning task to update");
    };
    task.state = TaskState::PlanningComplete;
    Ok(())
}

/// Number of execution tasks still in `Backlog` (spec.md §4.1).
pub fn count_backlog(index: &Index) -> usize {
    index
        .tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Execution && t.state == TaskState::Backlog)
        .count()
}

/// True when every execution task's state is in the terminal set
/// `{Merged, Blocked, Conflict}` (spec.md §4.1).
pub fn execution_complete(index: &Index) -> bool {
    index
        .tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Execution)
        .all(|t| t.state.is_execution_terminal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;
    use tempfile::TempDir;

    fn sample_index() -> Index {
        let mut idx = Index::empty();
        idx.tasks.push(Task::new_planning("planner", "_governator/roles/planner.md"));
        idx
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let mut idx = sample_index();
        idx.tasks.push(Task::new_execution("t-1", "worker", "p.md", 0, 3));
        idx.tasks.push(Task::new_execution("t-1", "worker", "p.md", 1, 3));
        assert!(idx.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let mut idx = sample_index();
        let mut t = Task::new_execution("t-1", "worker", "p.md", 0, 3);
        t.dependencies.push("ghost".to_string());
        idx.tasks.push(t);
        assert!(idx.validate().is_err());
    }

    #[test]
    fn validate_rejects_second_planning_task() {
        let mut idx = sample_index();
        idx.tasks.push(Task::new_planning("planner2", "x.md"));
        assert!(idx.validate().is_err());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        let idx = sample_index();
        save(&path, &idx).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.tasks.len(), 1);
    }

    #[test]
    fn load_rejects_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        let mut idx = sample_index();
        idx.schema_version = 999;
        save_json(&path, &idx).unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn execution_complete_true_when_all_terminal() {
        let mut idx = sample_index();
        let mut t1 = Task::new_execution("t-1", "worker", "p.md", 0, 3);
        t1.state = TaskState::Merged;
        let mut t2 = Task::new_execution("t-2", "worker", "p.md", 1, 3);
        t2.state = TaskState::Blocked;
        idx.tasks.push(t1);
        idx.tasks.push(t2);
        assert!(execution_complete(&idx));
    }

    #[test]
    fn execution_complete_false_with_pending_task() {
        let mut idx = sample_index();
        idx.tasks.push(Task::new_execution("t-1", "worker", "p.md", 0, 3));
        assert!(!execution_complete(&idx));
    }

    #[test]
    fn count_backlog_counts_only_execution_backlog() {
        let mut idx = sample_index();
        idx.tasks.push(Task::new_execution("t-1", "worker", "p.md", 0, 3));
        let mut t2 = Task::new_execution("t-2", "worker", "p.md", 1, 3);
        t2.state = TaskState::Triaged;
        idx.tasks.push(t2);
        assert_eq!(count_backlog(&idx), 1);
    }
}
