//! Unified Supervisor Loop (spec.md §4.10, component C10).
//!
//! Single-process loop owning the opened index, in-flight registry, and
//! locks (spec.md §9, "Global mutable state"). Each iteration loads
//! state, resolves drift, advances planning or triage, sweeps execution,
//! and sleeps. SIGINT/SIGTERM mark the persisted state Stopped and
//! return cleanly, mirroring the teacher's orchestrator's
//! `CancellationToken`-driven shutdown (`gator-core::orchestrator::mod`).

use std::time::Duration;

use anyhow::{Context, Result};
use governator_store::{EngineConfig, Index, InFlightRegistry, PlanningSpec, RepoPaths, SupervisorState, Stage, TaskState};
use tracing::{info, warn};

use crate::audit::AuditSink;
use crate::error::EngineError;
use crate::stages::{self, CollectOutcome, StageContext};
use crate::vcs::VcsCoordinator;
use crate::{digest, planning, scheduler, triage};

/// Default sleep between supervisor iterations (spec.md §4.10, step 7).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct Supervisor {
    paths: RepoPaths,
    vcs: VcsCoordinator,
    config: EngineConfig,
    audit: Box<dyn AuditSink>,
    poll_interval: Duration,
}

/// Why one iteration's sweep was suppressed (spec.md §4.10, step 2:
/// "run one execute pass with `DisableDispatch=true` to drain").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchMode {
    Normal,
    DrainOnly,
}

impl Supervisor {
    pub fn new(repo_root: impl Into<std::path::PathBuf>, config: EngineConfig, audit: Box<dyn AuditSink>) -> Self {
        let repo_root = repo_root.into();
        let base_branch = config.branches.base.clone();
        Self {
            vcs: VcsCoordinator::new(repo_root.clone(), base_branch),
            paths: RepoPaths::new(repo_root),
            config,
            audit,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn stage_ctx(&self) -> StageContext<'_> {
        StageContext { paths: &self.paths, vcs: &self.vcs, config: &self.config, audit: self.audit.as_ref() }
    }

    /// Run the supervisor loop to completion: until execution is
    /// complete, a fatal error occurs, or a shutdown signal arrives.
    pub async fn run(&self, mut cancel: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        self.vcs.ensure_base().context("failed to ensure base branch before supervising")?;

        let mut supervisor_state = SupervisorState::running(std::process::id());
        supervisor_state.save(&self.paths.supervisor_json())?;

        loop {
            if *cancel.borrow() {
                supervisor_state.stop("signal received");
                supervisor_state.save(&self.paths.supervisor_json())?;
                info!(event = "supervisor.stopped", reason = "signal");
                return Ok(());
            }

            match self.run_iteration().await {
                Ok(IterationResult::Continue) => {}
                Ok(IterationResult::Complete) => {
                    supervisor_state.idle();
                    supervisor_state.save(&self.paths.supervisor_json())?;
                    info!(event = "supervisor.completed");
                    return Ok(());
                }
                Err(e) => {
                    supervisor_state.stop(e.to_string());
                    supervisor_state.save(&self.paths.supervisor_json()).ok();
                    return Err(e);
                }
            }

            supervisor_state.record_sweep(chrono::Utc::now());
            supervisor_state.save(&self.paths.supervisor_json())?;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.changed() => {}
            }
        }
    }

    /// Run exactly one supervisor iteration (spec.md §4.10's numbered
    /// steps 1-6; step 7, the poll sleep, is [`Supervisor::run`]'s own
    /// loop). Exposed so tests can drive and inspect individual
    /// iterations instead of only the loop as a whole.
    pub async fn run_iteration(&self) -> Result<IterationResult> {
        let mut index = governator_store::index::load(&self.paths.index_json())?
            .context("index not found; repo has not been scaffolded")?;
        let spec = governator_store::planning_spec::load(&self.paths.planning_json())?;
        let mut in_flight = InFlightRegistry::load(&self.paths.in_flight_json())?;

        let drift = digest::detect(self.vcs.repo_root(), &index.digests)?;
        let mode = if drift.has_drift {
            self.handle_drift(&mut index, &in_flight, &drift)?
        } else {
            DispatchMode::Normal
        };

        let planning_task = index
            .tasks
            .iter()
            .find(|t| t.id == governator_store::PLANNING_TASK_ID)
            .context("index has no planning task")?;

        if planning_task.state != TaskState::PlanningComplete {
            if mode == DispatchMode::DrainOnly {
                self.drain(&mut in_flight, &mut index).await?;
                InFlightRegistry::save(&in_flight, &self.paths.in_flight_json())?;
                governator_store::index::save(&self.paths.index_json(), &index)?;
                return Ok(IterationResult::Continue);
            }
            let ctx = self.stage_ctx();
            planning::run_iteration(&ctx, &mut index, &spec, &mut in_flight).await?;
            InFlightRegistry::save(&in_flight, &self.paths.in_flight_json())?;
            governator_store::index::save(&self.paths.index_json(), &index)?;
            return Ok(IterationResult::Continue);
        }

        if governator_store::index::count_backlog(&index) > 0 {
            if !in_flight.is_empty() {
                self.drain(&mut in_flight, &mut index).await?;
            } else {
                triage::run_cycle(&mut index, &self.paths.dag_json(), &self.paths.triage_state_json(), self.vcs.repo_root())?;
            }
            InFlightRegistry::save(&in_flight, &self.paths.in_flight_json())?;
            governator_store::index::save(&self.paths.index_json(), &index)?;
            return Ok(IterationResult::Continue);
        }

        if governator_store::index::execution_complete(&index) && in_flight.is_empty() {
            return Ok(IterationResult::Complete);
        }

        if mode == DispatchMode::Normal {
            self.run_sweep(&mut index, &mut in_flight).await?;
        } else {
            self.drain(&mut in_flight, &mut index).await?;
        }

        InFlightRegistry::save(&in_flight, &self.paths.in_flight_json())?;
        governator_store::index::save(&self.paths.index_json(), &index)?;
        Ok(IterationResult::Continue)
    }

    /// Planning drift handling (spec.md §4.10, step 2). Inside supervisor
    /// mode drift is never fatal: if work is in-flight, drain it; once
    /// empty, reset planning to the replanning entry step.
    fn handle_drift(&self, index: &mut Index, in_flight: &InFlightRegistry, drift: &digest::DriftReport) -> Result<DispatchMode> {
        if !in_flight.is_empty() {
            println!("planning=drift status=drain reason=\"{}\" next_step=\"governator start\"", drift.message);
            return Ok(DispatchMode::DrainOnly);
        }
        println!("planning=drift status=blocked reason=\"{}\" next_step=\"governator start\"", drift.message);
        governator_store::index::update_planning_state(index, Some("gap-analysis"))?;
        Ok(DispatchMode::Normal)
    }

    /// Run one execution sweep: plan, dispatch, collect, merge (spec.md
    /// §4.7).
    async fn run_sweep(&self, index: &mut Index, in_flight: &mut InFlightRegistry) -> Result<()> {
        let ctx = self.stage_ctx();

        stages::resume_blocked_tasks(&ctx, index).await?;

        for task_id in scheduler::mergeable_tasks(index, in_flight).iter().map(|t| t.id.clone()).collect::<Vec<_>>() {
            if let Some(task) = governator_store::index::find_by_id_mut(index, &task_id) {
                stages::run_merge_stage(&ctx, task).await?;
            }
        }

        self.collect_in_flight(index, in_flight).await?;

        let plan = scheduler::plan_sweep(index, in_flight, &self.config.concurrency);
        let dispatches: Vec<(String, Stage)> = plan.into_iter().map(|e| (e.task.id.clone(), e.stage)).collect();
        for (task_id, stage) in dispatches {
            let Some(task) = governator_store::index::find_by_id(index, &task_id) else { continue };
            let task_snapshot = task.clone();
            if let Err(e) = stages::dispatch_task(&ctx, &task_snapshot, stage, in_flight).await {
                warn!(event = "dispatch.error", task = %task_id, error = %e);
            }
        }

        Ok(())
    }

    /// Collect every in-flight task whose stage is currently being swept
    /// (spec.md §4.7 "Collection path").
    async fn collect_in_flight(&self, index: &mut Index, in_flight: &mut InFlightRegistry) -> Result<()> {
        let ctx = self.stage_ctx();
        let ids: Vec<String> = in_flight.task_ids().map(str::to_string).collect();
        for task_id in ids {
            let Some(entry) = in_flight.entry(&task_id).cloned() else { continue };
            let attempt = entry.attempt;
            let stage_name = entry.stage.env_value().unwrap_or("merge");
            let Some(task) = governator_store::index::find_by_id(index, &task_id) else { continue };
            let worker_state_dir = self.paths.worker_state_dir(&task_id, attempt, stage_name, &task.role);

            let outcome = stages::collect_task(&ctx, &task_id, entry.stage, &entry, &worker_state_dir)?;
            if outcome == CollectOutcome::StillRunning {
                continue;
            }
            if let Some(task) = governator_store::index::find_by_id_mut(index, &task_id) {
                stages::apply_outcome(&ctx, task, entry.stage, outcome, &worker_state_dir).await?;
            }
            in_flight.remove(&task_id);
        }
        Ok(())
    }

    /// Drain every in-flight task without dispatching new work (spec.md
    /// §4.10 step 2, `DisableDispatch=true`).
    async fn drain(&self, in_flight: &mut InFlightRegistry, index: &mut Index) -> Result<()> {
        self.collect_in_flight(index, in_flight).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationResult {
    Continue,
    Complete,
}

/// Hard-fail entry point used outside supervisor mode (spec.md §4.5:
/// "hard-fail with `ErrPlanningDrift` when called outside a supervisor").
pub fn check_drift_or_fail(repo_root: &std::path::Path, index: &Index) -> Result<()> {
    let report = digest::detect(repo_root, &index.digests)?;
    if report.has_drift {
        return Err(EngineError::PlanningDrift(report.message).into());
    }
    Ok(())
}
