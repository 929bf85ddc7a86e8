//! Planning spec schema (spec.md §4.6): `_governator/planning.json`. This
//! is a contract-only loader — governator-core's planning controller
//! interprets the steps, this module just parses and validates shape.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// One of the three validation kinds a planning step may require before
/// it is considered finished (spec.md §4.6: "validations (command /
/// file-regex / prompt)").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validation {
    Command { run: String },
    FileRegex { path: String, pattern: String },
    Prompt { role: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningStep {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub role: String,
    #[serde(default)]
    pub validations: Vec<Validation>,
}

/// `{version, steps[]}` (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningSpec {
    pub version: u32,
    pub steps: Vec<PlanningStep>,
}

impl PlanningSpec {
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            bail!("planning spec has no steps");
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                bail!("duplicate planning step id: {}", step.id);
            }
        }
        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&PlanningStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The step that follows `id` in declaration order, or `None` if `id`
    /// is the final step.
    pub fn step_after(&self, id: &str) -> Option<&PlanningStep> {
        let idx = self.steps.iter().position(|s| s.id == id)?;
        self.steps.get(idx + 1)
    }

    pub fn is_final_step(&self, id: &str) -> bool {
        self.steps.last().is_some_and(|s| s.id == id)
    }

    pub fn first_step(&self) -> Option<&PlanningStep> {
        self.steps.first()
    }
}

pub fn load(path: &Path) -> Result<PlanningSpec> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read planning spec at {}", path.display()))?;
    let spec: PlanningSpec = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse planning spec at {}", path.display()))?;
    spec.validate()?;
    Ok(spec)
}
