//! In-flight registry (spec.md §4.2): tracks which tasks currently have a
//! dispatched agent process, keyed by task ID, so the supervisor never
//! double-dispatches the same task across sweeps.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::{load_json, save_json};
use crate::models::Stage;

/// One active dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightEntry {
    pub stage: Stage,
    pub attempt: u32,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// `{task_id -> InFlightEntry}`, persisted whole-file (spec.md §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InFlightRegistry {
    entries: BTreeMap<String, InFlightEntry>,
}

impl InFlightRegistry {
    pub fn empty() -> Self {
        Self { entries: BTreeMap::new() }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(load_json::<Self>(path)?.unwrap_or_else(Self::empty))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    pub fn entry(&self, task_id: &str) -> Option<&InFlightEntry> {
        self.entries.get(task_id)
    }

    pub fn started_at(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(task_id).map(|e| e.started_at)
    }

    pub fn add(&mut self, task_id: impl Into<String>, entry: InFlightEntry) {
        self.entries.insert(task_id.into(), entry);
    }

    pub fn remove(&mut self, task_id: &str) -> Option<InFlightEntry> {
        self.entries.remove(task_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of currently in-flight tasks dispatched to `stage`, used by
    /// the scheduler to enforce per-stage concurrency caps (spec.md §4.7).
    pub fn count_in_stage(&self, stage: Stage) -> usize {
        self.entries.values().filter(|e| e.stage == stage).count()
    }
}
