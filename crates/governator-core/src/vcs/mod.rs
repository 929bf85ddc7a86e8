//! VCS Coordinator (spec.md §4.4, component C4).
//!
//! Branch-per-task, isolated merge worktree, rebase+squash+fast-forward
//! merges. Adapted from the teacher's `WorktreeManager`
//! (`gator-core::worktree::mod`): same idempotent create/remove
//! worktree discipline and the same serializing git-lock-per-manager
//! pattern, generalized from plan/task branch names to the spec's
//! `branch == task id` convention and from a simple `--no-ff` merge to
//! the spec's isolated rebase+squash flow.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::{VcsError, classify_merge_output};

/// Canonical commit author for stage-success commits and merge commits
/// (spec.md §4.4: "Author/committer are set to `Governator CLI
/// <governator@localhost>`").
pub const COMMIT_AUTHOR_NAME: &str = "Governator CLI";
pub const COMMIT_AUTHOR_EMAIL: &str = "governator@localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Conflict { details: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Coordinates git operations against a single repository. All mutating
/// operations are serialized through `git_lock`, matching the teacher's
/// rationale: git's own lock file on the shared object store makes
/// concurrent worktree mutation unsafe without in-process serialization.
#[derive(Debug, Clone)]
pub struct VcsCoordinator {
    repo_root: PathBuf,
    base_branch: String,
    git_lock: Arc<Mutex<()>>,
}

fn run(repo: &Path, args: &[&str]) -> Result<Output, VcsError> {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(|e| VcsError::Command { message: format!("failed to run git {}", args.join(" ")), source: e })
}

fn ok_or_exit(command: &str, output: Output) -> Result<Output, VcsError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(VcsError::GitExit {
            command: command.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

impl VcsCoordinator {
    pub fn new(repo_root: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self { repo_root: repo_root.into(), base_branch: base_branch.into(), git_lock: Arc::new(Mutex::new(())) }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// Branch name for a task: equal to the task ID (spec.md §4.4).
    pub fn branch_name(task_id: &str) -> String {
        task_id.to_string()
    }

    fn configure_identity(&self, worktree: &Path) {
        let _ = Command::new("git")
            .args(["config", "user.email", COMMIT_AUTHOR_EMAIL])
            .current_dir(worktree)
            .output();
        let _ = Command::new("git")
            .args(["config", "user.name", COMMIT_AUTHOR_NAME])
            .current_dir(worktree)
            .output();
    }

    /// Checkout the base branch; fail if the main worktree has
    /// uncommitted changes outside the local-state subtree and the
    /// planning index file (spec.md §4.4: "Ensure base").
    pub fn ensure_base(&self) -> Result<(), VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let status = ok_or_exit("status", run(&self.repo_root, &["status", "--porcelain"])?)?;
        let stdout = String::from_utf8_lossy(&status.stdout).to_string();
        let dirty: Vec<&str> = stdout
            .lines()
            .filter(|line| {
                let path = line.get(3..).unwrap_or("");
                !path.starts_with("_governator/_local-state/") && path != "_governator/index.json"
            })
            .collect();
        if !dirty.is_empty() {
            return Err(VcsError::GitExit {
                command: "status".into(),
                code: -1,
                stderr: format!("repository has uncommitted changes outside local-state: {dirty:?}"),
            });
        }

        ok_or_exit("checkout", run(&self.repo_root, &["checkout", &self.base_branch])?)?;
        Ok(())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool, VcsError> {
        let output = run(&self.repo_root, &["rev-parse", "--verify", &format!("refs/heads/{branch}")])?;
        Ok(output.status.success())
    }

    /// Create a task branch off base without checking it out. Idempotent.
    pub fn create_task_branch(&self, task_id: &str) -> Result<(), VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let branch = Self::branch_name(task_id);
        if self.branch_exists(&branch)? {
            return Ok(());
        }
        ok_or_exit(
            "branch",
            run(&self.repo_root, &["branch", &branch, &self.base_branch])?,
        )?;
        info!(event = "branch.create", branch = %branch);
        Ok(())
    }

    fn worktrees_dir(&self) -> PathBuf {
        self.repo_root.join("_governator/_local-state/worktrees")
    }

    /// Ensure a stable worktree for `task_id` exists, reused across
    /// attempts (spec.md §4.4: "Ensure worktree").
    pub fn ensure_worktree(&self, task_id: &str) -> Result<WorktreeInfo, VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let branch = Self::branch_name(task_id);
        let path = self.worktrees_dir().join(task_id);

        if path.exists() {
            return Ok(WorktreeInfo { path, branch: Some(branch) });
        }

        std::fs::create_dir_all(self.worktrees_dir()).map_err(|e| VcsError::Command {
            message: "failed to create worktrees directory".into(),
            source: e,
        })?;

        ok_or_exit(
            "worktree add",
            run(&self.repo_root, &["worktree", "add", path.to_str().unwrap_or_default(), &branch])?,
        )?;
        self.configure_identity(&path);
        Ok(WorktreeInfo { path, branch: Some(branch) })
    }

    /// Whether a worktree for `task_id` is still present on disk, without
    /// creating one (spec.md §7 class 7: resumption is conditioned on the
    /// worktree having survived).
    pub fn worktree_exists(&self, task_id: &str) -> bool {
        self.worktrees_dir().join(task_id).exists()
    }

    pub fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let output = run(&self.repo_root, &["worktree", "remove", "--force", path.to_str().unwrap_or_default()])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(VcsError::GitExit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> Result<(), VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let output = run(&self.repo_root, &["branch", "-D", branch])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not found") {
                return Ok(());
            }
            return Err(VcsError::GitExit {
                command: "branch -D".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.to_string(),
            });
        }
        info!(event = "branch.delete", branch = %branch);
        Ok(())
    }

    /// Stage-success commit semantics (spec.md §4.4, non-merge commits):
    /// `git status --untracked-files=all` captured to `git-changes.txt`;
    /// if non-empty, `git add -A` then commit with subject
    /// `[<state>] <title>` and body = first 8000 chars of `stdout.log`.
    pub fn commit_stage_changes(
        &self,
        worktree: &Path,
        state_label: &str,
        title: &str,
        stdout_log: &str,
        git_changes_out: &Path,
    ) -> Result<bool, VcsError> {
        let status = ok_or_exit("status", run(worktree, &["status", "--untracked-files=all", "--porcelain"])?)?;
        let changes = String::from_utf8_lossy(&status.stdout).to_string();
        std::fs::write(git_changes_out, &changes).map_err(|e| VcsError::Command {
            message: "failed to write git-changes.txt".into(),
            source: e,
        })?;

        if changes.trim().is_empty() {
            return Ok(false);
        }

        self.configure_identity(worktree);
        ok_or_exit("add", run(worktree, &["add", "-A"])?)?;

        let body: String = stdout_log.chars().take(8000).collect();
        let subject = format!("[{state_label}] {title}");
        let message = if body.is_empty() { subject } else { format!("{subject}\n\n{body}") };

        ok_or_exit("commit", run(worktree, &["commit", "-m", &message])?)?;
        Ok(true)
    }

    /// Merge `branch` into base with `--no-ff --no-edit` (spec.md §4.6:
    /// planning steps merge directly, unlike the squash+rebase execution
    /// merge flow). Runs on the main worktree, not an isolated one —
    /// planning never runs concurrently with anything else that touches
    /// base.
    pub fn merge_planning_branch(&self, branch: &str) -> Result<MergeOutcome, VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        ok_or_exit("checkout base", run(&self.repo_root, &["checkout", &self.base_branch])?)?;

        let merge = run(&self.repo_root, &["merge", "--no-ff", "--no-edit", branch])?;
        if !merge.status.success() {
            let stdout = String::from_utf8_lossy(&merge.stdout).to_string();
            let stderr = String::from_utf8_lossy(&merge.stderr).to_string();
            let _ = run(&self.repo_root, &["merge", "--abort"]);
            return match classify_merge_output(&stdout, &stderr) {
                Some(VcsError::Conflict { details }) => Ok(MergeOutcome::Conflict { details }),
                _ => Err(VcsError::GitExit { command: "merge --no-ff".into(), code: merge.status.code().unwrap_or(-1), stderr }),
            };
        }
        Ok(MergeOutcome::Merged)
    }

    /// Isolated merge (spec.md §4.4): rebase the task branch onto
    /// `origin/<base>` in a throwaway worktree, squash-merge into the
    /// base worktree, reset `--hard` to the merge commit, then clean up
    /// the task worktree and branch. Always cleans the temporary
    /// worktree/branch, even on fatal error.
    pub fn isolated_merge(&self, task_id: &str, title: &str, task_worktree: &Path) -> Result<MergeOutcome, VcsError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        let task_branch = Self::branch_name(task_id);
        let temp_branch = format!("governator-merge-{task_id}");
        let temp_worktree = self.worktrees_dir().join(format!("__merge-{task_id}"));

        let result = self.isolated_merge_inner(&task_branch, &temp_branch, &temp_worktree, title);

        let _ = run(&self.repo_root, &["worktree", "remove", "--force", temp_worktree.to_str().unwrap_or_default()]);
        let _ = run(&self.repo_root, &["branch", "-D", &temp_branch]);

        match result {
            Ok(MergeOutcome::Merged) => {
                let _ = self.remove_worktree(task_worktree);
                self.delete_branch(&task_branch)?;
                Ok(MergeOutcome::Merged)
            }
            other => other,
        }
    }

    fn isolated_merge_inner(
        &self,
        task_branch: &str,
        temp_branch: &str,
        temp_worktree: &Path,
        title: &str,
    ) -> Result<MergeOutcome, VcsError> {
        let _ = run(&self.repo_root, &["fetch", "origin", &self.base_branch]);
        let remote_base = format!("origin/{}", self.base_branch);

        ok_or_exit(
            "worktree add",
            run(
                &self.repo_root,
                &["worktree", "add", "-b", temp_branch, temp_worktree.to_str().unwrap_or_default(), &remote_base],
            )?,
        )?;

        let rebase = run(temp_worktree, &["rebase", &remote_base, task_branch])?;
        if !rebase.status.success() {
            let stdout = String::from_utf8_lossy(&rebase.stdout).to_string();
            let stderr = String::from_utf8_lossy(&rebase.stderr).to_string();
            let _ = run(temp_worktree, &["rebase", "--abort"]);
            return match classify_merge_output(&stdout, &stderr) {
                Some(VcsError::Conflict { details }) => Ok(MergeOutcome::Conflict { details }),
                _ => Err(VcsError::GitExit { command: "rebase".into(), code: rebase.status.code().unwrap_or(-1), stderr }),
            };
        }

        let merge = run(temp_worktree, &["merge", "--squash", task_branch])?;
        if !merge.status.success() {
            let stdout = String::from_utf8_lossy(&merge.stdout).to_string();
            let stderr = String::from_utf8_lossy(&merge.stderr).to_string();
            let _ = run(temp_worktree, &["merge", "--abort"]);
            return match classify_merge_output(&stdout, &stderr) {
                Some(VcsError::Conflict { details }) => Ok(MergeOutcome::Conflict { details }),
                _ => Err(VcsError::GitExit { command: "merge --squash".into(), code: merge.status.code().unwrap_or(-1), stderr }),
            };
        }

        self.configure_identity(temp_worktree);
        let message = format!("governator: {} - {}", task_branch, title);
        ok_or_exit("commit", run(temp_worktree, &["commit", "-m", &message])?)?;

        let head = ok_or_exit("rev-parse", run(temp_worktree, &["rev-parse", "HEAD"])?)?;
        let merge_commit = String::from_utf8_lossy(&head.stdout).trim().to_string();

        ok_or_exit("checkout base", run(&self.repo_root, &["checkout", &self.base_branch])?)?;
        ok_or_exit("reset --hard", run(&self.repo_root, &["reset", "--hard", &merge_commit])?)?;

        Ok(MergeOutcome::Merged)
    }
}

/// Log a non-fatal cleanup failure the way the teacher logs best-effort
/// cleanup in `cleanup_partial` (`gator-core::worktree::mod`).
pub fn warn_cleanup_failed(branch: &str, reason: &str) {
    warn!(event = "branch.cleanup.warning", branch = %branch, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            StdCommand::new("git").args(args).current_dir(dir.path()).output().unwrap()
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-m", "init"]);
        dir
    }

    #[test]
    fn branch_name_equals_task_id() {
        assert_eq!(VcsCoordinator::branch_name("t-42"), "t-42");
    }

    #[test]
    fn create_task_branch_is_idempotent() {
        let dir = init_repo();
        let vcs = VcsCoordinator::new(dir.path(), "main");
        vcs.create_task_branch("t-1").unwrap();
        vcs.create_task_branch("t-1").unwrap();
        assert!(vcs.branch_exists("t-1").unwrap());
    }

    #[test]
    fn ensure_worktree_creates_then_reuses() {
        let dir = init_repo();
        let vcs = VcsCoordinator::new(dir.path(), "main");
        vcs.create_task_branch("t-1").unwrap();
        let info1 = vcs.ensure_worktree("t-1").unwrap();
        assert!(info1.path.exists());
        let info2 = vcs.ensure_worktree("t-1").unwrap();
        assert_eq!(info1.path, info2.path);
    }

    #[test]
    fn commit_stage_changes_returns_false_when_clean() {
        let dir = init_repo();
        let vcs = VcsCoordinator::new(dir.path(), "main");
        let changes_out = dir.path().join("git-changes.txt");
        let committed = vcs.commit_stage_changes(dir.path(), "implemented", "T-1", "", &changes_out).unwrap();
        assert!(!committed);
    }

    #[test]
    fn merge_planning_branch_fast_forwards_clean_branch() {
        let dir = init_repo();
        let vcs = VcsCoordinator::new(dir.path(), "main");
        vcs.create_task_branch("planning").unwrap();
        let worktree = vcs.ensure_worktree("planning").unwrap();
        std::fs::write(worktree.path.join("plan.md"), "plan").unwrap();
        StdCommand::new("git").args(["add", "-A"]).current_dir(&worktree.path).output().unwrap();
        StdCommand::new("git").args(["commit", "-m", "plan"]).current_dir(&worktree.path).output().unwrap();

        let outcome = vcs.merge_planning_branch("planning").unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert!(dir.path().join("plan.md").exists());
    }

    #[test]
    fn commit_stage_changes_commits_when_dirty() {
        let dir = init_repo();
        let vcs = VcsCoordinator::new(dir.path(), "main");
        std::fs::write(dir.path().join("new.txt"), "content").unwrap();
        let changes_out = dir.path().join("git-changes.txt");
        let committed = vcs
            .commit_stage_changes(dir.path(), "implemented", "T-1 does a thing", "agent output", &changes_out)
            .unwrap();
        assert!(committed);
        assert!(changes_out.exists());
    }
}
