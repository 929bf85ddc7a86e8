//! Shared test utilities for governator integration tests.
//!
//! The teacher's equivalent crate spins up a shared PostgreSQL container
//! per test binary, since starting Postgres is expensive enough to be
//! worth amortizing. Governator has no database: the repository itself
//! is the store, so the equivalent throwaway fixture is a freshly
//! `git init`-ed directory with a populated `_governator/` tree. That is
//! cheap enough to build fresh per test, so there is no shared/lazy
//! singleton here, just a builder.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use governator_store::{EngineConfig, Index, PlanningSpec, PlanningStep, RepoPaths, Task, Validation};
use tempfile::TempDir;

/// A throwaway git repository scaffolded with a minimal `_governator/`
/// tree, held alive for the duration of a test. Carries a bare `origin`
/// remote too: `governator-core::vcs::isolated_merge` rebases task
/// branches onto `origin/<base>`, so a fixture with no remote can never
/// exercise the merge stage.
pub struct GovernatorFixture {
    _dir: TempDir,
    _origin_dir: TempDir,
    paths: RepoPaths,
}

fn run_git(repo: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .with_context(|| format!("failed to run git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

impl GovernatorFixture {
    /// Create a bare repository on `main` with one empty commit, no
    /// `_governator/` tree yet. Use [`GovernatorFixture::seeded`] for a
    /// repo scaffolded the way `governator init` would leave it.
    pub fn bare() -> Result<Self> {
        let dir = TempDir::new().context("failed to create temp dir")?;
        let root = dir.path();
        run_git(root, &["init", "--initial-branch=main"])?;
        run_git(root, &["config", "user.email", "governator-test@localhost"])?;
        run_git(root, &["config", "user.name", "Governator Test"])?;
        std::fs::write(root.join(".gitkeep"), "")?;
        run_git(root, &["add", "-A"])?;
        run_git(root, &["commit", "-m", "initial commit"])?;

        let origin_dir = TempDir::new().context("failed to create origin temp dir")?;
        run_git(origin_dir.path(), &["init", "--bare", "--initial-branch=main"])?;
        run_git(root, &["remote", "add", "origin", origin_dir.path().to_str().unwrap_or_default()])?;
        run_git(root, &["push", "origin", "main"])?;

        Ok(Self { paths: RepoPaths::new(root), _dir: dir, _origin_dir: origin_dir })
    }

    /// Push the current base branch to `origin`, keeping `origin/<base>`
    /// in sync after commits land directly on base.
    pub fn push_base(&self) -> Result<()> {
        run_git(self.repo_root(), &["push", "origin", "main"])
    }

    /// Create a repository pre-populated with an empty index (one
    /// planning task), a single-step planning spec, and a valid config,
    /// mirroring what `governator init` writes to a fresh repo.
    pub fn seeded() -> Result<Self> {
        let fixture = Self::bare()?;
        let mut index = Index::empty();
        index.tasks.push(Task::new_planning("planner", "_governator/roles/planner.md"));
        governator_store::index::save(&fixture.paths.index_json(), &index)?;

        let spec = PlanningSpec {
            version: 1,
            steps: vec![PlanningStep {
                id: "gap-analysis".to_string(),
                name: "Gap analysis".to_string(),
                prompt: "_governator/planning/gap-analysis.md".to_string(),
                role: "planner".to_string(),
                validations: vec![Validation::Command { run: "true".to_string() }],
            }],
        };
        std::fs::create_dir_all(fixture.paths.repo_root().join("_governator"))?;
        std::fs::write(fixture.paths.planning_json(), serde_json::to_string_pretty(&spec)?)?;

        let config = EngineConfig {
            workers: governator_store::WorkersConfig {
                default: vec!["true".to_string(), "{task_path}".to_string()],
                roles: Default::default(),
            },
            ..Default::default()
        };
        std::fs::write(fixture.paths.config_json(), serde_json::to_string_pretty(&config)?)?;

        std::fs::create_dir_all(fixture.paths.tasks_dir())?;
        std::fs::create_dir_all(fixture.paths.roles_dir())?;
        std::fs::write(fixture.paths.role_prompt("planner"), "You are the planner.\n")?;
        run_git(fixture.repo_root(), &["add", "-A"])?;
        run_git(fixture.repo_root(), &["commit", "-m", "seed _governator tree"])?;
        fixture.push_base()?;

        Ok(fixture)
    }

    pub fn repo_root(&self) -> &Path {
        self.paths.repo_root()
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    /// Load the current index, failing the test if the file is missing
    /// or invalid.
    pub fn load_index(&self) -> Result<Index> {
        governator_store::index::load(&self.paths.index_json())?.context("index not seeded")
    }

    pub fn save_index(&self, index: &Index) -> Result<()> {
        governator_store::index::save(&self.paths.index_json(), index)
    }

    /// Add an execution task to the index and write its prompt file,
    /// then commit both so a stage handler operating against this repo
    /// sees a consistent tree.
    pub fn add_execution_task(&self, task: Task, prompt_body: &str) -> Result<PathBuf> {
        let mut index = self.load_index()?;
        let prompt_path = self.paths.repo_root().join(&task.path);
        if let Some(parent) = prompt_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&prompt_path, prompt_body)?;
        index.tasks.push(task);
        self.save_index(&index)?;
        run_git(self.repo_root(), &["add", "-A"])?;
        run_git(self.repo_root(), &["commit", "-m", "add task"])?;
        self.push_base()?;
        Ok(prompt_path)
    }
}
