//! Stage Handlers (spec.md §4.8, component C8).
//!
//! Each of the five stages is modeled as a value with the capability set
//! {input state, success state, failure state, dispatch, ingest}, per
//! spec.md §9 ("Polymorphism across stages ... replaces any per-stage
//! inheritance or deep class hierarchies"). This module holds the
//! dispatch and collection logic the scheduler drives; `state::mod`
//! holds the pure state tables these functions consult.

use std::path::Path;

use anyhow::{Context, Result};
use governator_store::{EngineConfig, Index, InFlightEntry, InFlightRegistry, RepoPaths, Stage, Task, TaskState};

use crate::audit::{AgentOutcomeStatus, AuditEvent, AuditSink};
use crate::dispatch::{self, ConflictEnv};
use crate::vcs::{MergeOutcome, VcsCoordinator};

/// Everything a stage handler needs, collected so call sites don't thread
/// six separate arguments through every function.
pub struct StageContext<'a> {
    pub paths: &'a RepoPaths,
    pub vcs: &'a VcsCoordinator,
    pub config: &'a EngineConfig,
    pub audit: &'a dyn AuditSink,
}

/// Outcome of a collection attempt for one in-flight task (spec.md §4.7
/// "Collection path").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    StillRunning,
    TimedOut,
    Success,
    Failure { exit_code: i32 },
}

/// Dispatch `task` at `stage` (spec.md §4.7 "Dispatch path"): ensure
/// branch and worktree, resolve the role command, spawn the agent,
/// register the in-flight entry. Write the Resolve stage's auxiliary
/// conflict prompt first.
pub async fn dispatch_task(ctx: &StageContext<'_>, task: &Task, stage: Stage, in_flight: &mut InFlightRegistry) -> Result<()> {
    ctx.vcs.create_task_branch(&task.id).context("failed to create task branch")?;
    let worktree = ctx.vcs.ensure_worktree(&task.id).context("failed to ensure task worktree")?;

    let attempt = task.retries.total + 1;
    let stage_name = stage.env_value().unwrap_or("merge");
    let worker_state_dir = ctx.paths.worker_state_dir(&task.id, attempt, stage_name, &task.role);

    let conflict_env = if stage == Stage::Resolve {
        let branch = VcsCoordinator::branch_name(&task.id);
        write_conflict_prompt(&worker_state_dir, &branch, &task.path)?;
        ConflictEnv { conflict_branch: Some(branch), conflict_task_path: Some(task.path.clone()) }
    } else {
        ConflictEnv::default()
    };

    let command = dispatch::resolve_command(ctx.config, &task.role, &task.path)
        .with_context(|| format!("failed to resolve command for role {}", task.role))?;

    let outcome = dispatch::spawn(&worktree.path, &worker_state_dir, task, stage, &command, &conflict_env).await?;

    in_flight.add(
        task.id.clone(),
        InFlightEntry { stage, attempt, pid: outcome.pid, started_at: outcome.started_at },
    );

    ctx.audit
        .record(AuditEvent::AgentInvoke { task_id: task.id.clone(), role: task.role.clone(), stage: stage.to_string() })
        .await;
    println!("task={} role={} stage={} status=start", task.id, task.role, stage);
    Ok(())
}

fn write_conflict_prompt(worker_state_dir: &Path, branch: &str, task_path: &str) -> Result<()> {
    std::fs::create_dir_all(worker_state_dir)
        .with_context(|| format!("failed to create worker state dir {}", worker_state_dir.display()))?;
    let contents = format!(
        "Conflicting branch: {branch}\nTask prompt: {task_path}\n\nRebase or otherwise resolve the conflict on this branch, then exit 0.\n"
    );
    std::fs::write(worker_state_dir.join("conflict.md"), contents)
        .context("failed to write conflict.md")?;
    Ok(())
}

/// Collect the outcome of an in-flight task (spec.md §4.7 "Collection
/// path"). Does not mutate `task.state`; callers apply the returned
/// outcome via [`apply_outcome`].
pub fn collect_task(
    ctx: &StageContext<'_>,
    task_id: &str,
    stage: Stage,
    entry: &InFlightEntry,
    worker_state_dir: &Path,
) -> Result<CollectOutcome> {
    if let Some(exit) = dispatch::read_exit_status(worker_state_dir)? {
        return Ok(if exit.exit_code == 0 { CollectOutcome::Success } else { CollectOutcome::Failure { exit_code: exit.exit_code } });
    }

    let pid = dispatch::read_dispatch_pid(worker_state_dir)?.unwrap_or(entry.pid);
    if !dispatch::is_pid_alive(pid) {
        // Exited without leaving exit.json (e.g. killed out of band).
        return Ok(CollectOutcome::Failure { exit_code: -1 });
    }

    let stage_name = stage.env_value().unwrap_or("merge");
    let timeout_seconds = ctx.config.timeouts.seconds_for_stage(stage_name);
    let elapsed = (chrono::Utc::now() - entry.started_at).num_seconds().max(0) as u64;
    if elapsed >= timeout_seconds {
        dispatch::kill_pid(entry.pid);
        dispatch::kill_pid(pid);
        return Ok(CollectOutcome::TimedOut);
    }

    Ok(CollectOutcome::StillRunning)
}

/// Apply a terminal [`CollectOutcome`] to `task`, per spec.md §4.8's
/// per-stage contract table and §7 class 7 (retry exhaustion). Returns
/// `false` for [`CollectOutcome::StillRunning`] (the in-flight entry
/// must not be removed).
///
/// On success, finalizes the worktree first (spec.md §4.7: "finalize
/// the worktree (§4.4) and apply the success transition") by committing
/// any changes with subject `[<state>] <title>`.
pub async fn apply_outcome(
    ctx: &StageContext<'_>,
    task: &mut Task,
    stage: Stage,
    outcome: CollectOutcome,
    worker_state_dir: &Path,
) -> Result<bool> {
    let from = task.state.clone();
    match outcome {
        CollectOutcome::StillRunning => return Ok(false),
        CollectOutcome::Success => {
            task.retries.record_attempt();
            task.state = crate::state::success_state(stage);

            let worktree = ctx.vcs.ensure_worktree(&task.id).context("failed to ensure worktree to finalize success")?;
            let stdout_log = std::fs::read_to_string(worker_state_dir.join("stdout.log")).unwrap_or_default();
            let git_changes_out = worker_state_dir.join("git-changes.txt");
            ctx.vcs
                .commit_stage_changes(&worktree.path, &task.state.to_string(), &task.id, &stdout_log, &git_changes_out)
                .context("failed to finalize worktree on stage success")?;

            ctx.audit
                .record(AuditEvent::AgentOutcome { task_id: task.id.clone(), status: AgentOutcomeStatus::Success, exit_code: 0 })
                .await;
            println!("task={} role={} stage={} status=complete", task.id, task.role, stage);
        }
        CollectOutcome::Failure { exit_code } => {
            task.retries.record_attempt();
            task.retries.record_failure();
            task.state = failure_state(task, stage);
            if task.state == TaskState::Blocked {
                task.resume_state = Some(from.clone());
            }
            ctx.audit
                .record(AuditEvent::AgentOutcome { task_id: task.id.clone(), status: AgentOutcomeStatus::Failed, exit_code })
                .await;
            println!("task={} role={} stage={} status=failure reason=\"exit code {exit_code}\"", task.id, task.role, stage);
        }
        CollectOutcome::TimedOut => {
            task.retries.record_attempt();
            task.retries.record_failure();
            task.state = failure_state(task, stage);
            if task.state == TaskState::Blocked {
                task.resume_state = Some(from.clone());
            }
            let timeout_seconds = ctx.config.timeouts.seconds_for_stage(stage.env_value().unwrap_or("merge"));
            ctx.audit.record(AuditEvent::WorkerTimeout { task_id: task.id.clone(), timeout_seconds }).await;
            ctx.audit
                .record(AuditEvent::AgentOutcome { task_id: task.id.clone(), status: AgentOutcomeStatus::Timeout, exit_code: -1 })
                .await;
            println!(
                "task={} role={} stage={} status=timeout reason=\"worker timed out after {timeout_seconds}s\" timeout_seconds={timeout_seconds}",
                task.id, task.role, stage
            );
        }
    }
    if task.state != from {
        ctx.audit.record(AuditEvent::TaskTransition { task_id: task.id.clone(), from: from.to_string(), to: task.state.to_string() }).await;
    }
    Ok(true)
}

/// Failure state for `stage`, substituting `Blocked` when the retry
/// budget is exhausted (spec.md §4.8, §7 class 7). Resolve always routes
/// to `Blocked` regardless of attempts, per the contract table.
fn failure_state(task: &Task, stage: Stage) -> TaskState {
    if stage == Stage::Resolve || task.retries.exhausted() {
        return TaskState::Blocked;
    }
    crate::state::retry_failure_state(stage)
}

/// Resume every `Blocked` task whose worktree is still present on disk
/// (spec.md §7 class 7: "Blocked tasks are resume candidates for a
/// subsequent run ... moved back to their input state with attempts
/// preserved ... only if their worktree is preserved on disk"). Runs once
/// per execution sweep, before dispatch, so a resumed task is immediately
/// eligible for scheduling in the same sweep. Returns the number resumed.
pub async fn resume_blocked_tasks(ctx: &StageContext<'_>, index: &mut Index) -> Result<usize> {
    let mut resumed = 0;
    for task in index.tasks.iter_mut() {
        if task.state != TaskState::Blocked {
            continue;
        }
        let Some(target) = task.resume_state.clone() else { continue };
        if !crate::state::is_valid_transition(&TaskState::Blocked, &target) {
            continue;
        }
        if !ctx.vcs.worktree_exists(&task.id) {
            continue;
        }
        let from = task.state.clone();
        task.state = target;
        task.resume_state = None;
        ctx.audit.record(AuditEvent::TaskTransition { task_id: task.id.clone(), from: from.to_string(), to: task.state.to_string() }).await;
        println!("task={} role={} status=resume from={} to={}", task.id, task.role, from, task.state);
        resumed += 1;
    }
    Ok(resumed)
}

/// Result of the synchronous Merge stage (spec.md §4.7 "Merge stage
/// specifics").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStageResult {
    Merged,
    Conflict,
    Fatal(String),
}

/// Run the Merge stage for one Reviewed/Resolved/Mergeable task.
/// Synchronous: never registered in-flight, never spawns an agent.
pub async fn run_merge_stage(ctx: &StageContext<'_>, task: &mut Task) -> Result<MergeStageResult> {
    let worktree = ctx.vcs.ensure_worktree(&task.id).context("failed to ensure task worktree for merge")?;
    let from = task.state.clone();

    let result = ctx.vcs.isolated_merge(&task.id, &task.id, &worktree.path);
    let outcome = match result {
        Ok(MergeOutcome::Merged) => {
            task.state = TaskState::Merged;
            task.merge_conflict = false;
            MergeStageResult::Merged
        }
        Ok(MergeOutcome::Conflict { details }) => {
            task.state = TaskState::Conflict;
            task.merge_conflict = true;
            println!("task={} role={} stage=merge status=failure reason=\"merge conflict: {details}\"", task.id, task.role);
            MergeStageResult::Conflict
        }
        Err(e) => {
            task.state = TaskState::Blocked;
            task.resume_state = Some(from.clone());
            crate::vcs::warn_cleanup_failed(&VcsCoordinator::branch_name(&task.id), &e.to_string());
            MergeStageResult::Fatal(e.to_string())
        }
    };

    if task.state != from {
        ctx.audit.record(AuditEvent::TaskTransition { task_id: task.id.clone(), from: from.to_string(), to: task.state.to_string() }).await;
    }
    if outcome == MergeStageResult::Merged {
        println!("task={} role={} stage=merge status=complete", task.id, task.role);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use governator_store::RetryCounters;

    fn sample_task(state: TaskState) -> Task {
        let mut t = Task::new_execution("t-1", "worker", "_governator/tasks/t-1.md", 0, 3);
        t.state = state;
        t
    }

    #[test]
    fn failure_state_substitutes_blocked_when_exhausted() {
        let mut task = sample_task(TaskState::Implemented);
        task.retries = RetryCounters { max_attempts: 1, total: 1, failed: 1 };
        assert_eq!(failure_state(&task, Stage::Work), TaskState::Blocked);
    }

    #[test]
    fn failure_state_uses_retry_table_when_not_exhausted() {
        let task = sample_task(TaskState::Implemented);
        assert_eq!(failure_state(&task, Stage::Test), TaskState::Open);
    }

    #[test]
    fn resolve_failure_is_always_blocked() {
        let task = sample_task(TaskState::Conflict);
        assert_eq!(failure_state(&task, Stage::Resolve), TaskState::Blocked);
    }
}
