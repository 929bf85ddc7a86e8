//! Audit log sink (spec.md §1, "excluded and treated as external
//! collaborators: the audit log sink ... each appears only through its
//! interface"; spec.md §6, "Audit events").
//!
//! Modeled as an object-safe `async_trait`, the same pattern the teacher
//! uses for `Harness` (`gator-core::harness::trait_def`), so that a test
//! harness can substitute a recording sink without touching call sites.

use async_trait::async_trait;
use tracing::info;

/// The fixed vocabulary of audit events (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    AgentInvoke { task_id: String, role: String, stage: String },
    AgentOutcome { task_id: String, status: AgentOutcomeStatus, exit_code: i32 },
    TaskTransition { task_id: String, from: String, to: String },
    BranchCreate { branch: String },
    BranchDelete { branch: String },
    BranchCleanupWarning { branch: String, reason: String },
    WorkerTimeout { task_id: String, timeout_seconds: u64 },
    RunGuard { status: String, reason: String, cooldown_seconds: u64, seconds_since_last_run: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcomeStatus {
    Success,
    Failed,
    Timeout,
}

impl AgentOutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentOutcomeStatus::Success => "success",
            AgentOutcomeStatus::Failed => "failed",
            AgentOutcomeStatus::Timeout => "timeout",
        }
    }
}

/// Sink interface for audit events. Object-safe so it can be stored as
/// `Box<dyn AuditSink>` and substituted in tests (spec.md treats the
/// audit log sink as contract-only, external to the engine's core).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Default sink: structured `tracing` events with `key=value` fields,
/// matching the teacher's logging idiom throughout `gator-core`.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::AgentInvoke { task_id, role, stage } => {
                info!(event = "agent.invoke", task = %task_id, role = %role, stage = %stage);
            }
            AuditEvent::AgentOutcome { task_id, status, exit_code } => {
                info!(event = "agent.outcome", task = %task_id, status = status.as_str(), exit_code);
            }
            AuditEvent::TaskTransition { task_id, from, to } => {
                info!(event = "task.transition", task = %task_id, from = %from, to = %to);
            }
            AuditEvent::BranchCreate { branch } => {
                info!(event = "branch.create", branch = %branch);
            }
            AuditEvent::BranchDelete { branch } => {
                info!(event = "branch.delete", branch = %branch);
            }
            AuditEvent::BranchCleanupWarning { branch, reason } => {
                tracing::warn!(event = "branch.cleanup.warning", branch = %branch, reason = %reason);
            }
            AuditEvent::WorkerTimeout { task_id, timeout_seconds } => {
                tracing::warn!(event = "worker.timeout", task = %task_id, timeout_seconds);
            }
            AuditEvent::RunGuard { status, reason, cooldown_seconds, seconds_since_last_run } => {
                info!(
                    event = "run.guard",
                    status = %status,
                    reason = %reason,
                    cooldown_seconds,
                    seconds_since_last_run
                );
            }
        }
    }
}

/// An in-memory sink used by tests to assert on emitted events without
/// parsing log output.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: tokio::sync::Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_captures_events_in_order() {
        let sink = RecordingAuditSink::new();
        sink.record(AuditEvent::TaskTransition {
            task_id: "t-1".into(),
            from: "triaged".into(),
            to: "implemented".into(),
        })
        .await;
        sink.record(AuditEvent::BranchDelete { branch: "t-1".into() }).await;
        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            AuditEvent::TaskTransition { task_id: "t-1".into(), from: "triaged".into(), to: "implemented".into() }
        );
    }

    #[tokio::test]
    async fn tracing_sink_does_not_panic() {
        let sink = TracingAuditSink;
        sink.record(AuditEvent::AgentOutcome {
            task_id: "t-1".into(),
            status: AgentOutcomeStatus::Timeout,
            exit_code: -1,
        })
        .await;
    }
}
