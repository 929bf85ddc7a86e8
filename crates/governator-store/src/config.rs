//! Engine configuration (spec.md §6, "Config (recognized options)").
//!
//! Read from `_governator/_durable-state/config.json`. Mirrors the
//! teacher's `DbConfig::from_env`/`Default` split (`gator-db::config`),
//! except the source here is a checked-in JSON file rather than an
//! environment variable, since config is part of the versioned repo
//! layout (spec.md §6 file-system layout), not a per-invocation secret.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_worker_timeout() -> u64 {
    1800
}

fn default_max_attempts() -> u32 {
    3
}

fn default_global_concurrency() -> u32 {
    4
}

fn default_default_role_concurrency() -> u32 {
    2
}

fn default_cooldown_seconds() -> u64 {
    60
}

/// `workers.commands` (spec.md §6): the argv used to invoke an agent for
/// a role, before `{task_path}` substitution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub default: Vec<String>,
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,
}

impl WorkersConfig {
    /// Resolve the command argv for `role`, falling back to `default`.
    pub fn command_for(&self, role: &str) -> Option<&[String]> {
        self.roles
            .get(role)
            .map(Vec::as_slice)
            .or(if self.default.is_empty() { None } else { Some(self.default.as_slice()) })
    }
}

/// `concurrency.*` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_global_concurrency")]
    pub global: u32,
    #[serde(default = "default_default_role_concurrency")]
    pub default_role: u32,
    #[serde(default)]
    pub roles: BTreeMap<String, u32>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            global: default_global_concurrency(),
            default_role: default_default_role_concurrency(),
            roles: BTreeMap::new(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn cap_for_role(&self, role: &str) -> u32 {
        self.roles.get(role).copied().unwrap_or(self.default_role)
    }
}

/// `timeouts.*` (spec.md §6): a global worker timeout plus optional
/// per-stage overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_worker_timeout")]
    pub worker_seconds: u64,
    #[serde(default)]
    pub per_stage: BTreeMap<String, u64>,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self { worker_seconds: default_worker_timeout(), per_stage: BTreeMap::new() }
    }
}

impl TimeoutsConfig {
    pub fn seconds_for_stage(&self, stage: &str) -> u64 {
        self.per_stage.get(stage).copied().unwrap_or(self.worker_seconds)
    }
}

/// `retries.*` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetriesConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts() }
    }
}

/// `branches.*` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchesConfig {
    #[serde(default = "default_base_branch")]
    pub base: String,
}

impl Default for BranchesConfig {
    fn default() -> Self {
        Self { base: default_base_branch() }
    }
}

/// `auto_rerun.*` (spec.md §6): governs the self-run guard's cooldown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRerunConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for AutoRerunConfig {
    fn default() -> Self {
        Self { enabled: false, cooldown_seconds: default_cooldown_seconds() }
    }
}

/// Reasoning effort level requested per role, passed through to the
/// agent command unchanged; the engine does not interpret its values.
pub type ReasoningEffortConfig = BTreeMap<String, String>;

/// Top-level engine configuration (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub retries: RetriesConfig,
    #[serde(default)]
    pub branches: BranchesConfig,
    #[serde(default)]
    pub auto_rerun: AutoRerunConfig,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffortConfig,
}

impl EngineConfig {
    /// Load config from `path`. Missing file is a configuration error
    /// (spec.md §7 class 1): callers must scaffold a config before the
    /// engine can run, there is no silent-default fallback once a repo
    /// has been initialized.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config at {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse engine config at {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers.default.is_empty() && self.workers.roles.is_empty() {
            anyhow::bail!("config.workers must define at least one command (default or per-role)");
        }
        if self.retries.max_attempts == 0 {
            anyhow::bail!("config.retries.max_attempts must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_concurrency_matches_spec_defaults() {
        let cfg = ConcurrencyConfig::default();
        assert_eq!(cfg.global, 4);
        assert_eq!(cfg.default_role, 2);
    }

    #[test]
    fn cap_for_role_falls_back_to_default() {
        let mut cfg = ConcurrencyConfig::default();
        cfg.roles.insert("reviewer".to_string(), 1);
        assert_eq!(cfg.cap_for_role("reviewer"), 1);
        assert_eq!(cfg.cap_for_role("worker"), cfg.default_role);
    }

    #[test]
    fn timeout_per_stage_falls_back_to_worker_seconds() {
        let mut cfg = TimeoutsConfig::default();
        cfg.per_stage.insert("review".to_string(), 600);
        assert_eq!(cfg.seconds_for_stage("review"), 600);
        assert_eq!(cfg.seconds_for_stage("work"), cfg.worker_seconds);
    }

    #[test]
    fn command_for_role_falls_back_to_default_command() {
        let mut workers = WorkersConfig::default();
        workers.default = vec!["claude".to_string(), "{task_path}".to_string()];
        assert_eq!(workers.command_for("worker"), Some(workers.default.as_slice()));
    }

    #[test]
    fn validate_rejects_empty_workers() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn from_file_parses_and_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"workers":{"default":["claude","{task_path}"]}}"#,
        )
        .unwrap();
        let cfg = EngineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.branches.base, "main");
        assert_eq!(cfg.retries.max_attempts, 3);
    }

    #[test]
    fn from_file_missing_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");
        assert!(EngineConfig::from_file(&path).is_err());
    }
}
