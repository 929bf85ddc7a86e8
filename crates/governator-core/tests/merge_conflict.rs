//! End-to-end scenario 4 (spec.md §8, "Merge conflict -> resolve"): a
//! Reviewed task whose branch conflicts with base on merge is routed to
//! Conflict with the branch left intact and no commit landing on base;
//! a successful Resolve dispatch then lets the next merge attempt
//! succeed.

use std::process::Command;

use governator_core::audit::RecordingAuditSink;
use governator_core::stages::{self, CollectOutcome, MergeStageResult, StageContext};
use governator_core::vcs::VcsCoordinator;
use governator_store::{EngineConfig, InFlightRegistry, Stage, Task, TaskState, WorkersConfig};
use governator_test_utils::GovernatorFixture;

fn git(repo: &std::path::Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(repo).output().expect("git should run");
    assert!(output.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr));
}

/// A resolve command that does what the conflict prompt asks: rebase the
/// branch onto base, preferring the branch's own content where the two
/// sides disagree (a deterministic stand-in for an agent's manual fix).
fn resolve_command() -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "git fetch origin main && git rebase origin/main -X theirs".to_string(),
    ]
}

#[tokio::test]
async fn conflicting_merge_routes_to_conflict_then_resolves_on_retry() {
    let fixture = GovernatorFixture::seeded().expect("fixture should scaffold");
    let mut task = Task::new_execution("t-c", "worker", "_governator/tasks/t-c-do-thing-worker.md", 0, 3);
    fixture.add_execution_task(task.clone(), "do the conflicting thing\n").expect("seed execution task");

    let vcs = VcsCoordinator::new(fixture.repo_root(), "main");
    vcs.create_task_branch("t-c").expect("branch create should succeed");
    let worktree = vcs.ensure_worktree("t-c").expect("worktree ensure should succeed");

    // Task branch touches shared.md.
    std::fs::write(worktree.path.join("shared.md"), "task version\n").unwrap();
    git(&worktree.path, &["add", "-A"]);
    git(&worktree.path, &["commit", "-m", "[implemented] t-c"]);

    // Base diverges on the same file after the branch was cut.
    std::fs::write(fixture.repo_root().join("shared.md"), "base version\n").unwrap();
    git(fixture.repo_root(), &["add", "-A"]);
    git(fixture.repo_root(), &["commit", "-m", "conflicting base change"]);
    fixture.push_base().expect("push base");

    task.state = TaskState::Reviewed;

    let config = EngineConfig {
        workers: WorkersConfig { default: resolve_command(), roles: Default::default() },
        ..Default::default()
    };
    let audit = RecordingAuditSink::new();
    let ctx = StageContext { paths: fixture.paths(), vcs: &vcs, config: &config, audit: &audit };

    let first_merge = stages::run_merge_stage(&ctx, &mut task).await.expect("merge stage should not error");
    assert_eq!(first_merge, MergeStageResult::Conflict);
    assert_eq!(task.state, TaskState::Conflict);
    assert!(task.merge_conflict);
    assert!(vcs.branch_exists("t-c").expect("branch_exists should not error"), "task branch must survive a conflict");

    let log = Command::new("git").args(["log", "--oneline", "main"]).current_dir(fixture.repo_root()).output().unwrap();
    let log = String::from_utf8_lossy(&log.stdout);
    assert!(!log.contains("governator: t-c"), "a conflicting merge must not land a commit on base: {log}");

    // Resolve stage: dispatch, collect, apply.
    let mut in_flight = InFlightRegistry::empty();
    stages::dispatch_task(&ctx, &task, Stage::Resolve, &mut in_flight).await.expect("resolve dispatch should succeed");
    let entry = in_flight.entry(&task.id).cloned().expect("resolve entry must be in-flight");
    let worker_state_dir = ctx.paths.worker_state_dir(&task.id, entry.attempt, "resolve", &task.role);

    let outcome = loop {
        let outcome = stages::collect_task(&ctx, &task.id, Stage::Resolve, &entry, &worker_state_dir).expect("collect should not error");
        if outcome != CollectOutcome::StillRunning {
            break outcome;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    };
    assert_eq!(outcome, CollectOutcome::Success, "resolve command should exit 0");
    stages::apply_outcome(&ctx, &mut task, Stage::Resolve, outcome, &worker_state_dir).await.expect("apply_outcome should not error");
    assert_eq!(task.state, TaskState::Resolved);

    let second_merge = stages::run_merge_stage(&ctx, &mut task).await.expect("merge stage should not error");
    assert_eq!(second_merge, MergeStageResult::Merged);
    assert_eq!(task.state, TaskState::Merged);

    let log = Command::new("git").args(["log", "--oneline", "main"]).current_dir(fixture.repo_root()).output().unwrap();
    let log = String::from_utf8_lossy(&log.stdout);
    assert!(log.contains("governator: t-c"), "the resolved merge should land on base: {log}");
    assert!(!vcs.branch_exists("t-c").expect("branch_exists should not error"), "task branch should be deleted after a successful merge");
}
