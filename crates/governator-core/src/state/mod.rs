//! Task state transition validation (spec.md §9: "illegal transitions are
//! rejected at the ingestion boundary, not inside handlers").
//!
//! Mirrors the teacher's `TaskStateMachine::is_valid_transition`
//! (`gator-core::state::mod`): a single table of legal `(from, to)`
//! edges, consulted before any stage handler writes a new state back
//! into the index.
//!
//! **Open question resolution** (spec.md §9): the source is
//! inconsistent about whether a failed review routes `Tested -> Open`
//! or `Tested -> Triaged`. This engine follows the per-stage contract
//! table in spec.md §4.8 literally, which names `Triaged` as the Review
//! failure state; see DESIGN.md for the full writeup. `Open` is instead
//! reached only from a failed Test (as §4.8 names it for that stage),
//! and is treated as a second, retry-flavored entry point into the Work
//! stage alongside `Triaged`.

use governator_store::{Stage, TaskState};

/// Legal `(from, to)` edges for execution-task states, independent of
/// the planning-task's own three-state cursor (which is validated
/// separately by `governator_store::index::update_planning_state`).
pub fn is_valid_transition(from: &TaskState, to: &TaskState) -> bool {
    use TaskState::*;
    matches!(
        (from, to),
        (Backlog, Triaged)
            | (Triaged, Implemented)
            | (Triaged, Blocked)
            | (Open, Implemented)
            | (Open, Blocked)
            | (Implemented, Tested)
            | (Implemented, Open)
            | (Implemented, Blocked)
            | (Tested, Reviewed)
            | (Tested, Triaged)
            | (Tested, Blocked)
            | (Conflict, Resolved)
            | (Conflict, Blocked)
            | (Reviewed, Merged)
            | (Reviewed, Conflict)
            | (Reviewed, Blocked)
            | (Resolved, Merged)
            | (Resolved, Conflict)
            | (Resolved, Blocked)
            | (Mergeable, Merged)
            | (Mergeable, Conflict)
            | (Mergeable, Blocked)
            // Resumption (spec.md §7 class 7): a Blocked task whose
            // worktree is preserved can be moved back to its input state
            // with attempts preserved.
            | (Blocked, Triaged)
            | (Blocked, Implemented)
            | (Blocked, Tested)
            | (Blocked, Conflict)
    )
}

/// The state(s) eligible to be picked up by `stage` (spec.md §4.7
/// eligibility rule, generalized per the Open/Mergeable resolution
/// above).
pub fn eligible_states(stage: Stage) -> &'static [TaskState] {
    use TaskState::*;
    match stage {
        Stage::Work => &[Triaged, Open],
        Stage::Test => &[Implemented],
        Stage::Review => &[Tested],
        Stage::Resolve => &[Conflict],
        Stage::Merge => &[Reviewed, Resolved, Mergeable],
    }
}

pub fn is_eligible_state(stage: Stage, state: &TaskState) -> bool {
    eligible_states(stage).contains(state)
}

/// Success state for `stage` (spec.md §4.8).
pub fn success_state(stage: Stage) -> TaskState {
    match stage {
        Stage::Work => TaskState::Implemented,
        Stage::Test => TaskState::Tested,
        Stage::Review => TaskState::Reviewed,
        Stage::Resolve => TaskState::Resolved,
        Stage::Merge => TaskState::Merged,
    }
}

/// Non-exhausted failure state for `stage` (spec.md §4.8); callers must
/// substitute `Blocked` when the task's retry budget is exhausted,
/// except for Resolve and Merge, whose failure state is always Blocked
/// (Resolve) or Conflict/Blocked (Merge) regardless of retries.
pub fn retry_failure_state(stage: Stage) -> TaskState {
    match stage {
        Stage::Work => TaskState::Triaged,
        Stage::Test => TaskState::Open,
        Stage::Review => TaskState::Triaged,
        Stage::Resolve => TaskState::Blocked,
        Stage::Merge => TaskState::Conflict,
    }
}
