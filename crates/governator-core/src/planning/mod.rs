//! Planning Workstream Controller (spec.md §4.6, component C6).
//!
//! Single-threaded step walker over the planning spec's `PLANNING_TASK_ID`
//! task. Driven the same way `stages::dispatch_task`/`collect_task` drive
//! execution tasks, but specialized: one task, serial steps, a
//! `--no-ff --no-edit` merge instead of the squash+rebase execution flow,
//! and a final task-file inventory that seeds the index's execution
//! backlog.

use std::path::Path;

use anyhow::{Context, Result, bail};
use governator_store::{
    Index, InFlightEntry, InFlightRegistry, PLANNING_TASK_ID, PlanningSpec, PlanningStep, Stage, Task, TaskKind,
    TaskState, Validation,
};

use crate::audit::AuditEvent;
use crate::dispatch::{self, ConflictEnv};
use crate::stages::StageContext;
use crate::vcs::MergeOutcome;

/// What the supervisor should do next after one planning iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningOutcome {
    /// An agent is running; nothing else to do this iteration.
    Running,
    /// A step finished and advanced; caller should persist the index.
    Advanced { to: TaskState },
    /// The final step finished; the backlog was seeded from task files.
    Complete { tasks_seeded: usize },
    /// A step's agent exited nonzero or a validation failed; retried next
    /// iteration up to the task's own retry budget.
    Failed { reason: String },
}

fn current_step_id(state: &TaskState) -> Option<String> {
    match state {
        TaskState::PlanningNotStarted => None,
        TaskState::PlanningStep { step_id } => Some(step_id.clone()),
        _ => None,
    }
}

/// Run one planning iteration (spec.md §4.6, numbered steps 1-3).
pub async fn run_iteration(
    ctx: &StageContext<'_>,
    index: &mut Index,
    spec: &PlanningSpec,
    in_flight: &mut InFlightRegistry,
) -> Result<PlanningOutcome> {
    let task = index
        .tasks
        .iter_mut()
        .find(|t| t.id == PLANNING_TASK_ID && t.kind == TaskKind::Planning)
        .context("index has no planning task")?;

    if task.state == TaskState::PlanningComplete {
        return Ok(PlanningOutcome::Complete { tasks_seeded: 0 });
    }

    let step_id = current_step_id(&task.state);
    let step = match &step_id {
        Some(id) => spec.step(id).with_context(|| format!("planning spec has no step {id:?}"))?,
        None => spec.first_step().context("planning spec has no steps")?,
    };

    if in_flight.contains(PLANNING_TASK_ID) {
        let entry = in_flight.entry(PLANNING_TASK_ID).cloned().unwrap();
        let attempt = entry.attempt;
        let worker_state_dir = ctx.paths.worker_state_dir(PLANNING_TASK_ID, attempt, "work", &step.role);
        return poll_running_step(ctx, index, spec, in_flight, step, &worker_state_dir).await;
    }

    dispatch_step(ctx, index, in_flight, step).await?;
    Ok(PlanningOutcome::Running)
}

async fn dispatch_step(
    ctx: &StageContext<'_>,
    index: &mut Index,
    in_flight: &mut InFlightRegistry,
    step: &PlanningStep,
) -> Result<()> {
    ctx.vcs.create_task_branch(PLANNING_TASK_ID).context("failed to create planning branch")?;
    let worktree = ctx.vcs.ensure_worktree(PLANNING_TASK_ID).context("failed to ensure planning worktree")?;

    let task = governator_store::index::find_by_id_mut(index, PLANNING_TASK_ID).context("missing planning task")?;
    let attempt = task.retries.total + 1;
    task.role = step.role.clone();
    task.path = step.prompt.clone();

    let worker_state_dir = ctx.paths.worker_state_dir(PLANNING_TASK_ID, attempt, "work", &step.role);
    let command = dispatch::resolve_command(ctx.config, &step.role, &step.prompt)
        .with_context(|| format!("failed to resolve command for planning role {}", step.role))?;

    let outcome = dispatch::spawn(&worktree.path, &worker_state_dir, task, Stage::Work, &command, &ConflictEnv::default()).await?;
    in_flight.add(
        PLANNING_TASK_ID,
        InFlightEntry { stage: Stage::Work, attempt, pid: outcome.pid, started_at: outcome.started_at },
    );
    ctx.audit
        .record(AuditEvent::AgentInvoke { task_id: PLANNING_TASK_ID.to_string(), role: step.role.clone(), stage: "planning".to_string() })
        .await;
    println!("task=planning role={} stage=planning status=start step={}", step.role, step.id);
    Ok(())
}

async fn poll_running_step(
    ctx: &StageContext<'_>,
    index: &mut Index,
    spec: &PlanningSpec,
    in_flight: &mut InFlightRegistry,
    step: &PlanningStep,
    worker_state_dir: &Path,
) -> Result<PlanningOutcome> {
    let Some(exit) = dispatch::read_exit_status(worker_state_dir)? else {
        return Ok(PlanningOutcome::Running);
    };

    in_flight.remove(PLANNING_TASK_ID);
    let worktree = ctx.vcs.ensure_worktree(PLANNING_TASK_ID).context("failed to ensure planning worktree")?;

    if exit.exit_code != 0 {
        let task = governator_store::index::find_by_id_mut(index, PLANNING_TASK_ID).context("missing planning task")?;
        task.retries.record_attempt();
        task.retries.record_failure();
        let reason = format!("planning step {} exited {}", step.id, exit.exit_code);
        println!("task=planning role={} stage=planning status=failure reason=\"{reason}\"", step.role);
        return Ok(PlanningOutcome::Failed { reason });
    }

    for validation in &step.validations {
        if let Err(reason) = run_validation(ctx, &worktree.path, validation) {
            let task = governator_store::index::find_by_id_mut(index, PLANNING_TASK_ID).context("missing planning task")?;
            task.retries.record_attempt();
            task.retries.record_failure();
            println!("task=planning role={} stage=planning status=failure reason=\"{reason}\"", step.role);
            return Ok(PlanningOutcome::Failed { reason });
        }
    }

    let stdout_log = std::fs::read_to_string(worker_state_dir.join("stdout.log")).unwrap_or_default();
    let git_changes_out = worker_state_dir.join("git-changes.txt");
    ctx.vcs
        .commit_stage_changes(&worktree.path, "planning", &step.name, &stdout_log, &git_changes_out)
        .context("failed to commit planning step changes")?;

    match ctx.vcs.merge_planning_branch(PLANNING_TASK_ID).context("failed to merge planning branch")? {
        MergeOutcome::Conflict { details } => {
            bail!("planning branch merge conflict on step {}: {details}", step.id);
        }
        MergeOutcome::Merged => {}
    }

    index.digests = crate::digest::compute(ctx.vcs.repo_root()).context("failed to recompute digests after planning merge")?;

    let task = governator_store::index::find_by_id_mut(index, PLANNING_TASK_ID).context("missing planning task")?;
    task.retries.record_attempt();

    if spec.is_final_step(&step.id) {
        let seeded = seed_backlog_from_task_files(ctx, index)?;
        if count_execution_tasks(index) == 0 {
            bail!("planning completed task-file inventory but no execution tasks were found");
        }
        governator_store::index::mark_planning_complete(index)?;
        println!("task=planning role={} stage=planning status=complete tasks_seeded={seeded}", step.role);
        Ok(PlanningOutcome::Complete { tasks_seeded: seeded })
    } else {
        let next = spec.step_after(&step.id).context("non-final step has no successor")?;
        governator_store::index::update_planning_state(index, Some(&next.id))?;
        println!("task=planning role={} stage=planning status=complete next_step={}", step.role, next.id);
        Ok(PlanningOutcome::Advanced { to: TaskState::PlanningStep { step_id: next.id.clone() } })
    }
}

fn run_validation(ctx: &StageContext<'_>, worktree: &Path, validation: &Validation) -> Result<(), String> {
    match validation {
        Validation::Command { run } => {
            let status = std::process::Command::new("/bin/sh")
                .arg("-c")
                .arg(run)
                .current_dir(worktree)
                .status()
                .map_err(|e| format!("failed to run validation command {run:?}: {e}"))?;
            if !status.success() {
                return Err(format!("validation command {run:?} exited {}", status.code().unwrap_or(-1)));
            }
            Ok(())
        }
        Validation::FileRegex { path, pattern } => {
            let full_path = worktree.join(path);
            let contents = std::fs::read_to_string(&full_path)
                .map_err(|e| format!("failed to read {path} for validation: {e}"))?;
            let re = regex::Regex::new(pattern).map_err(|e| format!("invalid validation pattern {pattern:?}: {e}"))?;
            if !re.is_match(&contents) {
                return Err(format!("file {path} does not match pattern {pattern:?}"));
            }
            Ok(())
        }
        Validation::Prompt { role, path } => {
            // No in-core LLM judge; reuse the configured command for `role`
            // against `path`, synchronously, exit 0 = pass. See DESIGN.md.
            let command = dispatch::resolve_command(ctx.config, role, path)
                .map_err(|e| format!("no command configured for validation role {role:?}: {e}"))?;
            let (program, args) = command.split_first().ok_or_else(|| "empty validation command".to_string())?;
            let status = std::process::Command::new(program)
                .args(args)
                .current_dir(worktree)
                .status()
                .map_err(|e| format!("failed to run prompt validation for role {role:?}: {e}"))?;
            if !status.success() {
                return Err(format!("prompt validation for role {role:?} exited {}", status.code().unwrap_or(-1)));
            }
            Ok(())
        }
    }
}

fn count_execution_tasks(index: &Index) -> usize {
    index.tasks.iter().filter(|t| t.kind == TaskKind::Execution).count()
}

/// Task-file inventory (spec.md §4.6, final step): scan
/// `_governator/tasks/*.md` and insert any file not already tracked by
/// id as a new Backlog execution task. Task IDs are derived from the
/// filename stem (`<id>-<slug>-<role>.md`, spec.md §6); the role is the
/// filename's last hyphen-delimited segment.
fn seed_backlog_from_task_files(ctx: &StageContext<'_>, index: &mut Index) -> Result<usize> {
    let tasks_dir = ctx.paths.tasks_dir();
    if !tasks_dir.is_dir() {
        return Ok(0);
    }

    let mut seeded = 0;
    let mut entries: Vec<_> = std::fs::read_dir(&tasks_dir)
        .with_context(|| format!("failed to list {}", tasks_dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list {}", tasks_dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for (order, entry) in entries.into_iter().enumerate() {
        if !entry.path().extension().is_some_and(|ext| ext == "md") {
            continue;
        }
        let stem = entry.path().file_stem().unwrap_or_default().to_string_lossy().to_string();
        let Some(id) = stem.split('-').next().map(str::to_string) else { continue };
        if governator_store::index::find_by_id(index, &id).is_some() {
            continue;
        }
        let role = stem.rsplit('-').next().unwrap_or("worker").to_string();
        let rel_path = format!("_governator/tasks/{}", entry.file_name().to_string_lossy());
        index.tasks.push(Task::new_execution(id, role, rel_path, order as i64, ctx.config.retries.max_attempts));
        seeded += 1;
    }
    Ok(seeded)
}
