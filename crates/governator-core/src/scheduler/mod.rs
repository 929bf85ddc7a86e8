//! Execution Scheduler (spec.md §4.7, component C7) — the heart of the
//! engine.
//!
//! Pure decision logic: given an index snapshot and the in-flight
//! registry, compute which tasks to dispatch this sweep, in right-to-
//! left stage priority order, under concurrency caps. No I/O happens
//! here; `stages::run_sweep` consumes the plan this module produces.
//! Modeled after the teacher's `run_orchestrator` concurrency-limiting
//! loop (`gator-core::orchestrator::mod`), but single-threaded and
//! cooperative rather than semaphore-gated, per spec.md §5.

use std::collections::BTreeMap;

use governator_store::{ConcurrencyConfig, Index, InFlightRegistry, Stage, Task};

use crate::state::is_eligible_state;

/// One task selected for dispatch at a given stage this sweep.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPlanEntry<'a> {
    pub stage: Stage,
    pub task: &'a Task,
}

/// Tasks eligible for `stage` (spec.md §4.7 eligibility rule): execution
/// kind, state matches the stage's eligible set, dependencies satisfied
/// (Merged or overlap), not already in-flight. Sorted by `(order, id)`
/// ascending (spec.md §4.7 tie-breaks).
pub fn eligible_tasks<'a>(index: &'a Index, in_flight: &InFlightRegistry, stage: Stage) -> Vec<&'a Task> {
    let mut eligible: Vec<&Task> = index
        .tasks
        .iter()
        .filter(|t| t.kind == governator_store::TaskKind::Execution)
        .filter(|t| is_eligible_state(stage, &t.state))
        .filter(|t| !in_flight.contains(&t.id))
        .filter(|t| {
            t.dependencies.iter().all(|dep_id| {
                index
                    .tasks
                    .iter()
                    .find(|d| &d.id == dep_id)
                    .is_some_and(|dep| t.dependency_satisfied(dep_id, &dep.state))
            })
        })
        .collect();
    eligible.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
    eligible
}

/// Starting per-role cap for `stage`'s sweep, adjusted down by tasks
/// already in-flight for that role (spec.md §4.7: "Caps are adjusted
/// down by currently in-flight tasks ... clamped at zero").
fn adjusted_role_caps(config: &ConcurrencyConfig, index: &Index, in_flight: &InFlightRegistry) -> BTreeMap<String, u32> {
    let mut caps = BTreeMap::new();
    let roles: std::collections::BTreeSet<&str> = index.tasks.iter().map(|t| t.role.as_str()).collect();
    for role in roles {
        let cap = config.cap_for_role(role);
        let in_flight_for_role = index
            .tasks
            .iter()
            .filter(|t| t.role == role && in_flight.contains(&t.id))
            .count() as u32;
        caps.insert(role.to_string(), cap.saturating_sub(in_flight_for_role));
    }
    caps
}

/// Compute the dispatch plan for one sweep across the four agent-
/// dispatching stages (Merge is handled separately and synchronously,
/// spec.md §4.7: "Merge stage ... runs before LLM stages and is
/// synchronous").
pub fn plan_sweep<'a>(index: &'a Index, in_flight: &InFlightRegistry, config: &ConcurrencyConfig) -> Vec<DispatchPlanEntry<'a>> {
    let mut global_cap = config.global.saturating_sub(in_flight.len() as u32);
    let mut role_caps = adjusted_role_caps(config, index, in_flight);
    let mut plan = Vec::new();

    for stage in [Stage::Resolve, Stage::Review, Stage::Test, Stage::Work] {
        if global_cap == 0 {
            break;
        }
        for task in eligible_tasks(index, in_flight, stage) {
            if global_cap == 0 {
                break;
            }
            let role_cap = role_caps.entry(task.role.clone()).or_insert_with(|| config.cap_for_role(&task.role));
            if *role_cap == 0 {
                continue;
            }
            plan.push(DispatchPlanEntry { stage, task });
            global_cap -= 1;
            *role_cap -= 1;
        }
    }

    plan
}

/// Tasks eligible for the synchronous Merge stage (spec.md §4.7), not
/// subject to concurrency caps since Merge never spawns an agent.
pub fn mergeable_tasks<'a>(index: &'a Index, in_flight: &InFlightRegistry) -> Vec<&'a Task> {
    eligible_tasks(index, in_flight, Stage::Merge)
}
