//! Backlog Triage (spec.md §4.9, component C9).
//!
//! Reads `_local-state/dag.json` (`{id -> [dep_ids]}`), written by an
//! external planning collaborator, and applies it to every Backlog or
//! Triaged task: dependencies not present in the index are warned about
//! and dropped, a task absent from the DAG gets an empty dependency
//! list, and every eligible task moves to Triaged regardless. Retried
//! up to a small attempt cap on failure, recorded in `TriageState`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use governator_store::{Index, TaskKind, TaskState, TriageState};
use tracing::warn;

/// Cap on triage retry attempts before the cycle gives up for this run
/// (spec.md §4.9: "retried up to a small cap").
pub const MAX_TRIAGE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriageOutcome {
    Applied { updated: usize },
    NoDagFile,
    AttemptsExhausted,
}

/// Run one triage cycle (spec.md §4.9). No-op if no task is eligible
/// (Backlog or Triaged) or if the attempt cap was already hit.
pub fn run_cycle(index: &mut Index, dag_path: &Path, triage_state_path: &Path, repo_root: &Path) -> Result<TriageOutcome> {
    let mut state = TriageState::load(triage_state_path)?;
    if state.attempt >= MAX_TRIAGE_ATTEMPTS {
        return Ok(TriageOutcome::AttemptsExhausted);
    }

    let Ok(raw) = std::fs::read_to_string(dag_path) else {
        state.record_attempt(Utc::now());
        state.record_failure(format!("dag file not found at {}", dag_path.display()));
        state.save(triage_state_path)?;
        return Ok(TriageOutcome::NoDagFile);
    };

    let dag: BTreeMap<String, Vec<String>> = match serde_json::from_str(&raw) {
        Ok(dag) => dag,
        Err(e) => {
            state.record_attempt(Utc::now());
            state.record_failure(format!("failed to parse dag.json: {e}"));
            state.save(triage_state_path)?;
            anyhow::bail!("failed to parse dag.json at {}: {e}", dag_path.display());
        }
    };

    let known_ids: std::collections::HashSet<String> = index.tasks.iter().map(|t| t.id.clone()).collect();
    let mut updated = 0;

    for task in index.tasks.iter_mut() {
        if task.kind != TaskKind::Execution {
            continue;
        }
        if !matches!(task.state, TaskState::Backlog | TaskState::Triaged) {
            continue;
        }
        let deps = dag.get(&task.id).cloned().unwrap_or_default();
        let (kept, dropped): (Vec<String>, Vec<String>) = deps.into_iter().partition(|d| known_ids.contains(d));
        for dropped_id in &dropped {
            warn!(event = "triage.dependency.dropped", task = %task.id, dependency = %dropped_id);
        }
        task.dependencies = kept;
        task.state = TaskState::Triaged;
        updated += 1;
    }

    index.digests = crate::digest::compute(repo_root).context("failed to recompute digests after triage")?;

    state.record_attempt(Utc::now());
    state.record_success();
    state.save(triage_state_path)?;

    Ok(TriageOutcome::Applied { updated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use governator_store::Task;
    use tempfile::TempDir;

    fn index_with_tasks() -> Index {
        let mut idx = Index::empty();
        idx.tasks.push(Task::new_execution("t-1", "worker", "_governator/tasks/t-1.md", 0, 3));
        idx.tasks.push(Task::new_execution("t-2", "worker", "_governator/tasks/t-2.md", 1, 3));
        idx
    }

    #[test]
    fn applies_dag_and_drops_unknown_deps() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("dag.json"),
            r#"{"t-2": ["t-1", "ghost"]}"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("_governator")).unwrap();
        let mut index = index_with_tasks();

        let outcome = run_cycle(
            &mut index,
            &dir.path().join("dag.json"),
            &dir.path().join("triage-state.json"),
            dir.path(),
        )
        .unwrap();

        assert_eq!(outcome, TriageOutcome::Applied { updated: 2 });
        let t2 = governator_store::index::find_by_id(&index, "t-2").unwrap();
        assert_eq!(t2.dependencies, vec!["t-1".to_string()]);
        assert_eq!(t2.state, TaskState::Triaged);
    }

    #[test]
    fn missing_dag_file_records_failure_and_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let mut index = index_with_tasks();
        let outcome = run_cycle(
            &mut index,
            &dir.path().join("missing-dag.json"),
            &dir.path().join("triage-state.json"),
            dir.path(),
        )
        .unwrap();
        assert_eq!(outcome, TriageOutcome::NoDagFile);
        let state = TriageState::load(&dir.path().join("triage-state.json")).unwrap();
        assert_eq!(state.attempt, 1);
    }

    #[test]
    fn attempt_cap_stops_further_cycles() {
        let dir = TempDir::new().unwrap();
        let triage_path = dir.path().join("triage-state.json");
        let mut state = TriageState::default();
        for _ in 0..MAX_TRIAGE_ATTEMPTS {
            state.record_attempt(Utc::now());
        }
        state.save(&triage_path).unwrap();

        let mut index = index_with_tasks();
        let outcome = run_cycle(&mut index, &dir.path().join("dag.json"), &triage_path, dir.path()).unwrap();
        assert_eq!(outcome, TriageOutcome::AttemptsExhausted);
    }
}
