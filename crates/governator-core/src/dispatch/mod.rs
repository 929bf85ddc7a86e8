//! Agent Dispatcher (spec.md §4.3, component C3).
//!
//! Spawns agent processes against a per-task worktree, tracks their PID,
//! and reads back a fixed exit-status artifact. Spawning itself follows
//! the teacher's `ClaudeCodeAdapter::spawn` (`gator-core::harness::claude_code`):
//! build a `tokio::process::Command`, set `current_dir`, merge extra env
//! vars, pipe stdout/stderr. Unlike the teacher (which streams JSONL
//! events back to a database), this engine owns no event model — it
//! only needs the wrapper's `exit.json` artifact, so the "wrapper" is a
//! `tokio::spawn` task that awaits the child and writes the artifact,
//! rather than a separate OS process (see DESIGN.md).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use governator_store::{EngineConfig, Stage, Task};

/// Written before the child enters the worker state directory (spec.md
/// §4.3, step 3).
#[derive(Debug, Serialize, Deserialize)]
struct DispatchRecord {
    wrapper_pid: u32,
}

/// Written by the wrapper task when the child exits (spec.md §4.3,
/// step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitRecord {
    pub exit_code: i32,
    pub finished_at: chrono::DateTime<Utc>,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub pid: u32,
    pub started_at: chrono::DateTime<Utc>,
    pub worker_state_dir: PathBuf,
}

/// Extra environment variables the Resolve stage injects (spec.md §4.8:
/// "configures `GOVERNATOR_CONFLICT_BRANCH` and
/// `GOVERNATOR_CONFLICT_TASK_PATH`").
#[derive(Debug, Clone, Default)]
pub struct ConflictEnv {
    pub conflict_branch: Option<String>,
    pub conflict_task_path: Option<String>,
}

/// Resolve the command template for `role` from config, substituting
/// `{task_path}` (spec.md §4.3, step 2).
pub fn resolve_command(config: &EngineConfig, role: &str, task_path: &str) -> Result<Vec<String>> {
    let template = config
        .workers
        .command_for(role)
        .with_context(|| format!("no command configured for role {role:?} and no default command"))?;
    if template.is_empty() {
        anyhow::bail!("empty command template for role {role:?}");
    }
    Ok(template.iter().map(|arg| arg.replace("{task_path}", task_path)).collect())
}

/// Spawn an agent process for `task` at `stage` (spec.md §4.3).
///
/// `worktree_root` is the CWD the child runs in; `worker_state_dir` must
/// already exist. Stdout/stderr are captured to `stdout.log`/`stderr.log`
/// in that directory; a background task awaits the child and writes
/// `exit.json` on completion.
pub async fn spawn(
    worktree_root: &Path,
    worker_state_dir: &Path,
    task: &Task,
    stage: Stage,
    command: &[String],
    conflict_env: &ConflictEnv,
) -> Result<DispatchOutcome> {
    std::fs::create_dir_all(worker_state_dir)
        .with_context(|| format!("failed to create worker state dir {}", worker_state_dir.display()))?;

    let (program, args) = command
        .split_first()
        .context("command template has no program")?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.current_dir(worktree_root);

    let mut env: BTreeMap<&str, String> = BTreeMap::new();
    if let Some(stage_value) = stage.env_value() {
        env.insert("GOVERNATOR_STAGE", stage_value.to_string());
    }
    env.insert("GOVERNATOR_WORKER_STATE_PATH", worker_state_dir.display().to_string());
    if let Some(branch) = &conflict_env.conflict_branch {
        env.insert("GOVERNATOR_CONFLICT_BRANCH", branch.clone());
    }
    if let Some(path) = &conflict_env.conflict_task_path {
        env.insert("GOVERNATOR_CONFLICT_TASK_PATH", path.clone());
    }
    for (key, value) in &env {
        cmd.env(key, value);
    }

    let stdout_log = std::fs::File::create(worker_state_dir.join("stdout.log"))
        .with_context(|| "failed to create stdout.log")?;
    let stderr_log = std::fs::File::create(worker_state_dir.join("stderr.log"))
        .with_context(|| "failed to create stderr.log")?;
    cmd.stdout(std::process::Stdio::from(stdout_log));
    cmd.stderr(std::process::Stdio::from(stderr_log));
    cmd.stdin(std::process::Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn agent command for task {}", task.id))?;
    let pid = child.id().context("spawned child has no pid")?;
    let started_at = Utc::now();

    let dispatch_record = DispatchRecord { wrapper_pid: pid };
    governator_store::atomic::save_json(&worker_state_dir.join("dispatch.json"), &dispatch_record)?;

    info!(event = "agent.invoke", task = %task.id, role = %task.role, stage = %stage);

    let exit_path = worker_state_dir.join("exit.json");
    let task_id = task.id.clone();
    tokio::spawn(async move {
        let status = child.wait().await;
        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(task = %task_id, error = %e, "failed to wait for spawned agent");
                -1
            }
        };
        let record = ExitRecord { exit_code, finished_at: Utc::now(), pid };
        if let Err(e) = governator_store::atomic::save_json(&exit_path, &record) {
            warn!(task = %task_id, error = %e, "failed to write exit.json");
        }
    });

    Ok(DispatchOutcome { pid, started_at, worker_state_dir: worker_state_dir.to_path_buf() })
}

/// Read `exit.json` from `worker_state_dir` (spec.md §4.3, "Collection
/// contract"). Returns `None` if not yet written.
pub fn read_exit_status(worker_state_dir: &Path) -> Result<Option<ExitRecord>> {
    governator_store::atomic::load_json(&worker_state_dir.join("exit.json"))
}

/// Read the recorded wrapper PID from `dispatch.json`.
pub fn read_dispatch_pid(worker_state_dir: &Path) -> Result<Option<u32>> {
    let record: Option<DispatchRecord> = governator_store::atomic::load_json(&worker_state_dir.join("dispatch.json"))?;
    Ok(record.map(|r| r.wrapper_pid))
}

/// Signal-0 liveness probe (spec.md §9: "treat EPERM as alive, ESRCH as
/// dead"). Any other errno is conservatively treated as dead.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    matches!(std::io::Error::last_os_error().raw_os_error(), Some(libc::EPERM))
}

#[cfg(not(unix))]
pub fn is_pid_alive(_pid: u32) -> bool {
    false
}

/// Send SIGKILL to `pid` (spec.md §4.7 collection path: "on timeout send
/// SIGKILL to the agent PID when known, otherwise to the wrapper PID").
#[cfg(unix)]
pub fn kill_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) {}
