//! On-disk data model: tasks, task state, and the stage taxonomy shared by
//! the scheduler and stage handlers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sentinel task ID for the single, well-known planning task.
pub const PLANNING_TASK_ID: &str = "planning";

/// What kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Planning,
    Execution,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Execution => "execution",
        };
        f.write_str(s)
    }
}

/// One of the five dispatchable pipeline stages. `Merge` is synchronous and
/// never spawns an agent; the other four map 1:1 onto `GOVERNATOR_STAGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Merge,
    Resolve,
    Review,
    Test,
    Work,
}

impl Stage {
    /// Stages in right-to-left priority order (spec.md §4.7): advancing an
    /// in-progress task always outranks starting a new one.
    pub const PRIORITY_ORDER: [Stage; 5] = [
        Stage::Merge,
        Stage::Resolve,
        Stage::Review,
        Stage::Test,
        Stage::Work,
    ];

    /// The value written into `GOVERNATOR_STAGE` for agent-dispatching
    /// stages. `Merge` has no agent and is never passed to the dispatcher.
    pub fn env_value(self) -> Option<&'static str> {
        match self {
            Stage::Work => Some("work"),
            Stage::Test => Some("test"),
            Stage::Review => Some("review"),
            Stage::Resolve => Some("resolve"),
            Stage::Merge => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Merge => "merge",
            Stage::Resolve => "resolve",
            Stage::Review => "review",
            Stage::Test => "test",
            Stage::Work => "work",
        };
        f.write_str(s)
    }
}

/// The closed sum of task states (spec.md §9): execution lifecycle states,
/// the three failure/conflict side states, and the planning task's own
/// three-state workstream cursor. Kept as a single enum so `Task::state`
/// has one type regardless of `TaskKind`; invariants about which variants
/// are legal for which kind are enforced at the ingestion boundary, not by
/// the type system, exactly as spec.md §9 directs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskState {
    // Execution lifecycle.
    Backlog,
    Triaged,
    Open,
    Implemented,
    Tested,
    Reviewed,
    Mergeable,
    Merged,
    // Side states.
    Blocked,
    Conflict,
    Resolved,
    // Planning workstream cursor (only ever set on the `planning` task).
    PlanningNotStarted,
    PlanningStep { step_id: String },
    PlanningComplete,
}

impl TaskState {
    /// True for the three states spec.md §4.1 treats as terminal when
    /// computing `ExecutionComplete`.
    pub fn is_execution_terminal(&self) -> bool {
        matches!(self, TaskState::Merged | TaskState::Blocked | TaskState::Conflict)
    }

    /// True when a dependency on this task can be considered satisfied
    /// (spec.md §4.7 eligibility rule: dependencies must be `Merged`).
    pub fn is_merged(&self) -> bool {
        matches!(self, TaskState::Merged)
    }

    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            TaskState::PlanningNotStarted | TaskState::PlanningStep { .. } | TaskState::PlanningComplete
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Backlog => f.write_str("backlog"),
            TaskState::Triaged => f.write_str("triaged"),
            TaskState::Open => f.write_str("open"),
            TaskState::Implemented => f.write_str("implemented"),
            TaskState::Tested => f.write_str("tested"),
            TaskState::Reviewed => f.write_str("reviewed"),
            TaskState::Mergeable => f.write_str("mergeable"),
            TaskState::Merged => f.write_str("merged"),
            TaskState::Blocked => f.write_str("blocked"),
            TaskState::Conflict => f.write_str("conflict"),
            TaskState::Resolved => f.write_str("resolved"),
            TaskState::PlanningNotStarted => f.write_str("planning_not_started"),
            TaskState::PlanningStep { step_id } => write!(f, "planning_step({step_id})"),
            TaskState::PlanningComplete => f.write_str("planning_complete"),
        }
    }
}

/// Retry bookkeeping (spec.md §3: "retries (max attempts, current totals
/// {total, failed})").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounters {
    pub max_attempts: u32,
    pub total: u32,
    pub failed: u32,
}

impl RetryCounters {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, total: 0, failed: 0 }
    }

    pub fn exhausted(&self) -> bool {
        self.total >= self.max_attempts
    }

    pub fn record_attempt(&mut self) {
        self.total += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }
}

/// A unit of work tracked by a stable string ID (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub state: TaskState,
    /// Free-form string selecting an agent command.
    pub role: String,
    /// Prompt file, repo-relative, forward-slash.
    pub path: String,
    /// Ordered sequence of task IDs this task depends on.
    pub dependencies: Vec<String>,
    pub retries: RetryCounters,
    /// Integer used for stable sort within a stage (ascending).
    pub order: i64,
    /// Task IDs this task may run concurrently with regardless of deps.
    pub overlap: BTreeSet<String>,
    /// Set when the merge stage has routed this task to `Conflict`.
    pub merge_conflict: bool,
    /// The state to resume this task into once `Blocked`, captured from
    /// whatever state it was dispatched from (spec.md §7 class 7: "moved
    /// back to their input state with attempts preserved"). Cleared once
    /// consumed by a resume.
    #[serde(default)]
    pub resume_state: Option<TaskState>,
}

impl Task {
    /// Construct a new execution task in `Backlog`.
    pub fn new_execution(id: impl Into<String>, role: impl Into<String>, path: impl Into<String>, order: i64, max_attempts: u32) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Execution,
            state: TaskState::Backlog,
            role: role.into(),
            path: path.into(),
            dependencies: Vec::new(),
            retries: RetryCounters::new(max_attempts),
            order,
            overlap: BTreeSet::new(),
            merge_conflict: false,
            resume_state: None,
        }
    }

    /// Construct the single well-known planning task.
    pub fn new_planning(role: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: PLANNING_TASK_ID.to_string(),
            kind: TaskKind::Planning,
            state: TaskState::PlanningNotStarted,
            role: role.into(),
            path: path.into(),
            dependencies: Vec::new(),
            retries: RetryCounters::new(1),
            order: 0,
            overlap: BTreeSet::new(),
            merge_conflict: false,
            resume_state: None,
        }
    }

    /// Whether `dep_id`'s completion is satisfied for this task: either the
    /// dependency is `Merged`, or it is listed in this task's `overlap` set
    /// (spec.md §4.7 eligibility rule).
    pub fn dependency_satisfied(&self, dep_id: &str, dep_state: &TaskState) -> bool {
        dep_state.is_merged() || self.overlap.contains(dep_id)
    }
}

/// Parse error for free-form role strings is intentionally absent: roles
/// are opaque, validated only against the configured command table
/// (governator-core's domain-specific-content boundary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStage(pub String);

impl fmt::Display for InvalidStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid stage: {:?}", self.0)
    }
}

impl std::error::Error for InvalidStage {}

impl FromStr for Stage {
    type Err = InvalidStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Stage::Merge),
            "resolve" => Ok(Stage::Resolve),
            "review" => Ok(Stage::Review),
            "test" => Ok(Stage::Test),
            "work" => Ok(Stage::Work),
            other => Err(InvalidStage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_right_to_left() {
        assert_eq!(
            Stage::PRIORITY_ORDER,
            [Stage::Merge, Stage::Resolve, Stage::Review, Stage::Test, Stage::Work]
        );
    }

    #[test]
    fn retry_counters_exhaustion() {
        let mut rc = RetryCounters::new(2);
        assert!(!rc.exhausted());
        rc.record_attempt();
        assert!(!rc.exhausted());
        rc.record_attempt();
        assert!(rc.exhausted());
    }

    #[test]
    fn dependency_satisfied_via_overlap() {
        let mut task = Task::new_execution("t-2", "worker", "_governator/tasks/t-2.md", 0, 3);
        task.overlap.insert("t-1".to_string());
        assert!(task.dependency_satisfied("t-1", &TaskState::Open));
        assert!(!task.dependency_satisfied("t-3", &TaskState::Open));
        assert!(task.dependency_satisfied("t-3", &TaskState::Merged));
    }

    #[test]
    fn task_state_roundtrips_through_json() {
        let s = TaskState::PlanningStep { step_id: "gap-analysis".to_string() };
        let json = serde_json::to_string(&s).unwrap();
        let back: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(s, back);
    }

    #[test]
    fn new_planning_task_has_well_known_id() {
        let t = Task::new_planning("planner", "_governator/roles/planner.md");
        assert_eq!(t.id, PLANNING_TASK_ID);
        assert_eq!(t.state, TaskState::PlanningNotStarted);
    }
}
