//! Flat-file, atomically-written persistence for the governator engine
//! (spec.md §3, §4.1, §4.2, §6). No database: the repository itself is
//! the store, and every write goes through [`atomic::save_json`].

pub mod atomic;
pub mod config;
pub mod index;
pub mod inflight;
pub mod models;
pub mod paths;
pub mod planning_spec;
pub mod supervisor_state;
pub mod triage_state;

pub use config::{
    AutoRerunConfig, BranchesConfig, ConcurrencyConfig, EngineConfig, ReasoningEffortConfig,
    RetriesConfig, TimeoutsConfig, WorkersConfig,
};
pub use index::{Digests, Index};
pub use inflight::{InFlightEntry, InFlightRegistry};
pub use models::{PLANNING_TASK_ID, RetryCounters, Stage, Task, TaskKind, TaskState};
pub use paths::RepoPaths;
pub use planning_spec::{PlanningSpec, PlanningStep, Validation};
pub use supervisor_state::{RunState, SupervisorState};
pub use triage_state::TriageState;
