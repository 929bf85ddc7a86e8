//! Top-level engine entry point (spec.md §4.11, §6 "Run entry point").
//!
//! Wires `RepoPaths`, `EngineConfig`, the self-run guard, and the
//! supervisor loop together the way `lifecycle::run_agent_lifecycle`
//! wires the teacher's pool/harness/isolation/token pieces into one
//! callable sequence.

use std::path::PathBuf;

use anyhow::{Context, Result};
use governator_store::{EngineConfig, RepoPaths};

use crate::audit::{AuditSink, TracingAuditSink};
use crate::error::EngineError;
use crate::guard::{self, GuardDecision};
use crate::supervisor::{self, Supervisor};

/// Governator run entry point for one repository. Constructed once per
/// invocation of `governator start`.
pub struct Engine {
    repo_root: PathBuf,
    config: EngineConfig,
    audit: Box<dyn AuditSink>,
}

impl Engine {
    /// Load config from `<repo>/_governator/_durable-state/config.json`
    /// and build an engine using the default tracing audit sink.
    pub fn open(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        let paths = RepoPaths::new(&repo_root);
        let config = EngineConfig::from_file(&paths.config_json())
            .with_context(|| format!("failed to load engine config for {}", repo_root.display()))?;
        Ok(Self { repo_root, config, audit: Box::new(TracingAuditSink) })
    }

    pub fn with_audit_sink(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Run the self-run guard, then drive the supervisor loop to
    /// completion or until a shutdown signal arrives (spec.md §4.11:
    /// "the guard wraps the supervisor's entire run").
    pub async fn run(self) -> Result<()> {
        let paths = RepoPaths::new(&self.repo_root);
        let cooldown_seconds = self.config.auto_rerun.cooldown_seconds;

        let (decision, lock) = guard::ensure_allowed(
            &paths.run_lock(),
            &paths.guard_timestamp(),
            cooldown_seconds,
            self.audit.as_ref(),
        )
        .await?;

        match decision {
            GuardDecision::LockHeld => return Err(EngineError::SupervisorLockHeld.into()),
            GuardDecision::Cooldown { remaining_seconds } => {
                return Err(EngineError::GuardCooldown { remaining_seconds }.into());
            }
            GuardDecision::Allowed => {}
        }
        let _lock = lock.expect("guard decision Allowed always carries the acquired lock");

        // Preflight drift check (spec.md §4.5: the Run orchestrator
        // hard-fails with `ErrPlanningDrift` when called outside a
        // supervisor, as opposed to the supervisor loop's own drain +
        // replan handling once it is running).
        let index = governator_store::index::load(&paths.index_json())
            .context("failed to load index for preflight drift check")?
            .context("index not found; repo has not been scaffolded")?;
        supervisor::check_drift_or_fail(&self.repo_root, &index)?;

        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(wait_for_shutdown_signal(cancel_tx));

        let supervisor = Supervisor::new(self.repo_root.clone(), self.config, self.audit);
        supervisor.run(cancel_rx).await
    }
}

/// Resolve once either SIGINT or (on unix) SIGTERM arrives, and flip the
/// cancellation watch so the supervisor loop exits at its next check.
async fn wait_for_shutdown_signal(cancel_tx: tokio::sync::watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    let _ = cancel_tx.send(true);
}
