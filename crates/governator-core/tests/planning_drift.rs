//! End-to-end scenario 5 (spec.md §8, "Planning drift while running"):
//! with an execution task in-flight, a planning doc edited on disk is
//! detected as drift on the next iteration; the supervisor refuses to
//! dispatch further work and drains the in-flight task to completion
//! before resetting the planning cursor back to the replanning entry
//! step.

use governator_core::audit::RecordingAuditSink;
use governator_core::supervisor::{IterationResult, Supervisor};
use governator_store::{EngineConfig, Task, TaskState, WorkersConfig};
use governator_test_utils::GovernatorFixture;

#[tokio::test]
async fn drift_mid_sweep_drains_in_flight_then_resets_planning_cursor() {
    let fixture = GovernatorFixture::seeded().expect("fixture should scaffold");

    // Planning already complete, one execution task ready to dispatch.
    let mut index = fixture.load_index().expect("index should load");
    for task in index.tasks.iter_mut() {
        if task.id == governator_store::PLANNING_TASK_ID {
            task.state = TaskState::PlanningComplete;
        }
    }
    let mut t1 = Task::new_execution("t-1", "worker", "_governator/tasks/t-1-do-thing-worker.md", 0, 3);
    t1.state = TaskState::Triaged;
    index.tasks.push(t1);
    index.digests = governator_core::digest::compute(fixture.repo_root()).expect("digest compute should succeed");
    fixture.save_index(&index).expect("index save should succeed");
    std::fs::create_dir_all(fixture.repo_root().join("_governator/tasks")).expect("tasks dir should create");
    std::fs::write(
        fixture.repo_root().join("_governator/tasks/t-1-do-thing-worker.md"),
        "do the thing\n",
    )
    .expect("task prompt should write");

    let config = EngineConfig {
        workers: WorkersConfig {
            default: vec!["/bin/sh".to_string(), "-c".to_string(), "sleep 0.3 && echo worked >> worked.md".to_string()],
            roles: Default::default(),
        },
        ..Default::default()
    };
    let supervisor = Supervisor::new(fixture.repo_root(), config, Box::new(RecordingAuditSink::new()));

    // Iteration 1: no drift yet, dispatches Work(t-1).
    let result = supervisor.run_iteration().await.expect("iteration 1 should not error");
    assert_eq!(result, IterationResult::Continue);
    let in_flight = governator_store::InFlightRegistry::load(&fixture.paths().in_flight_json())
        .expect("in-flight load should succeed");
    assert!(in_flight.contains("t-1"), "t-1 should be dispatched and in-flight");

    // A planning doc changes on disk while t-1 is still running.
    std::fs::create_dir_all(fixture.repo_root().join("_governator/planning")).expect("planning dir should create");
    std::fs::write(
        fixture.repo_root().join("_governator/planning/gap-analysis.md"),
        "revised gap analysis\n",
    )
    .expect("planning doc edit should write");

    // Iteration 2: drift is detected; t-1 is still in-flight (0.3s sleep),
    // so the supervisor drains rather than resetting planning yet.
    let result = supervisor.run_iteration().await.expect("iteration 2 should not error");
    assert_eq!(result, IterationResult::Continue);

    // Wait out the worker, then drain it to completion across however
    // many iterations it takes (each iteration only polls once).
    let mut drained = false;
    for _ in 0..50 {
        let in_flight = governator_store::InFlightRegistry::load(&fixture.paths().in_flight_json())
            .expect("in-flight load should succeed");
        if in_flight.is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        supervisor.run_iteration().await.expect("drain iteration should not error");
    }
    assert!(drained, "t-1 should drain out of the in-flight set once its worker exits");

    let index = fixture.load_index().expect("index should load");
    let t1 = governator_store::index::find_by_id(&index, "t-1").expect("t-1 must still be indexed");
    assert_eq!(t1.state, TaskState::Implemented, "the in-flight task should finish its stage during drain");

    // Next iteration: in-flight is empty and drift is still outstanding,
    // so planning resets to the replanning entry step instead of
    // dispatching further execution work.
    let result = supervisor.run_iteration().await.expect("reset iteration should not error");
    assert_eq!(result, IterationResult::Continue);
    let index = fixture.load_index().expect("index should load");
    let planning = governator_store::index::find_by_id(&index, governator_store::PLANNING_TASK_ID)
        .expect("planning task must still be indexed");
    assert_eq!(planning.state, TaskState::PlanningStep { step_id: "gap-analysis".to_string() });
}
