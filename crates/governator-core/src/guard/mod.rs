//! Self-Run Guard (spec.md §4.11, component C11).
//!
//! Acquires an exclusive advisory lock on `run.lock` before anything
//! else in the run entry point, then consults a cooldown timestamp file.
//! The lock pattern follows the same `fs2::FileExt::try_lock_exclusive`
//! idiom the pack uses for single-instance daemon startup (grounded on
//! `alfredjeanlab-oddjobs::daemon::lifecycle::startup`), swapped from a
//! PID lock file to a held `File` handle since this guard's lock only
//! needs to live for the process lifetime, not be inspected externally.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;

use crate::audit::{AuditEvent, AuditSink};

/// Holds the exclusive lock for the lifetime of the run; dropping it
/// releases the lock.
pub struct RunLock {
    _file: File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    LockHeld,
    Cooldown { remaining_seconds: u64 },
}

/// Try to acquire `run.lock`. Returns `Ok(None)` (not an error) if
/// another process already holds it (spec.md §4.11: "returns a
/// `lock_held` outcome when busy").
fn try_acquire_lock(lock_path: &Path) -> Result<Option<RunLock>> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

    if file.try_lock_exclusive().is_err() {
        return Ok(None);
    }

    let mut file = file;
    file.set_len(0).ok();
    let _ = writeln!(file, "{}", std::process::id());
    Ok(Some(RunLock { _file: file }))
}

/// Read the cooldown timestamp file, compare against `now`, and write a
/// fresh timestamp when the run is allowed (spec.md §4.11: "writes an
/// RFC3339 timestamp after each allowed run").
fn check_cooldown(guard_timestamp_path: &Path, cooldown_seconds: u64, now: DateTime<Utc>) -> Result<GuardDecision> {
    let last_run: Option<DateTime<Utc>> = std::fs::read_to_string(guard_timestamp_path)
        .ok()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc));

    if let Some(last) = last_run {
        let elapsed = (now - last).num_seconds().max(0) as u64;
        if elapsed < cooldown_seconds {
            return Ok(GuardDecision::Cooldown { remaining_seconds: cooldown_seconds - elapsed });
        }
    }

    if let Some(parent) = guard_timestamp_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(guard_timestamp_path, now.to_rfc3339())
        .with_context(|| format!("failed to write {}", guard_timestamp_path.display()))?;
    Ok(GuardDecision::Allowed)
}

/// Run the guard: acquire the lock, then check the cooldown. Returns the
/// held lock alongside the decision so the caller can hold it for the
/// run's duration; the lock is released (and should be discarded) unless
/// the decision is `Allowed`.
pub async fn ensure_allowed(
    lock_path: &Path,
    guard_timestamp_path: &Path,
    cooldown_seconds: u64,
    audit: &dyn AuditSink,
) -> Result<(GuardDecision, Option<RunLock>)> {
    let Some(lock) = try_acquire_lock(lock_path)? else {
        audit
            .record(AuditEvent::RunGuard {
                status: "blocked".to_string(),
                reason: "lock_held".to_string(),
                cooldown_seconds,
                seconds_since_last_run: 0,
            })
            .await;
        return Ok((GuardDecision::LockHeld, None));
    };

    let decision = check_cooldown(guard_timestamp_path, cooldown_seconds, Utc::now())?;
    match &decision {
        GuardDecision::Allowed => {
            audit
                .record(AuditEvent::RunGuard {
                    status: "allowed".to_string(),
                    reason: String::new(),
                    cooldown_seconds,
                    seconds_since_last_run: cooldown_seconds,
                })
                .await;
            Ok((decision, Some(lock)))
        }
        GuardDecision::Cooldown { remaining_seconds } => {
            audit
                .record(AuditEvent::RunGuard {
                    status: "blocked".to_string(),
                    reason: format!("cooldown: try again in {remaining_seconds}s"),
                    cooldown_seconds,
                    seconds_since_last_run: cooldown_seconds.saturating_sub(*remaining_seconds),
                })
                .await;
            Ok((decision, None))
        }
        GuardDecision::LockHeld => unreachable!("lock was just acquired"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditSink;
    use tempfile::TempDir;

    #[tokio::test]
    async fn first_run_is_allowed_second_is_cooldown() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("run.lock");
        let ts_path = dir.path().join("guard.timestamp");
        let sink = RecordingAuditSink::new();

        let (decision1, lock1) = ensure_allowed(&lock_path, &ts_path, 5, &sink).await.unwrap();
        assert_eq!(decision1, GuardDecision::Allowed);
        drop(lock1);

        let (decision2, _lock2) = ensure_allowed(&lock_path, &ts_path, 5, &sink).await.unwrap();
        assert!(matches!(decision2, GuardDecision::Cooldown { .. }));
    }

    #[tokio::test]
    async fn held_lock_blocks_concurrent_run() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("run.lock");
        let ts_path = dir.path().join("guard.timestamp");
        let sink = RecordingAuditSink::new();

        let held = try_acquire_lock(&lock_path).unwrap().expect("should acquire");
        let (decision, lock) = ensure_allowed(&lock_path, &ts_path, 5, &sink).await.unwrap();
        assert_eq!(decision, GuardDecision::LockHeld);
        assert!(lock.is_none());
        drop(held);
    }

    #[test]
    fn cooldown_expires_after_elapsed_time() {
        let dir = TempDir::new().unwrap();
        let ts_path = dir.path().join("guard.timestamp");
        let earlier = Utc::now() - chrono::Duration::seconds(10);
        check_cooldown(&ts_path, 5, earlier).unwrap();
        let decision = check_cooldown(&ts_path, 5, Utc::now()).unwrap();
        assert_eq!(decision, GuardDecision::Allowed);
    }
}
