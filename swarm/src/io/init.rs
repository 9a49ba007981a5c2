//! Initialization helpers for `.swarm/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{SwarmConfig, write_config};

/// All canonical paths within `.swarm/` for a target root.
#[derive(Debug, Clone)]
pub struct SwarmPaths {
    pub root: PathBuf,
    pub swarm_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    /// Staged candidates awaiting a verdict.
    pub staging_dir: PathBuf,
    /// Scratch directories for isolated test runs.
    pub judge_dir: PathBuf,
    /// Generated test files, one directory per run.
    pub specs_dir: PathBuf,
    /// Presence of this file asks running batches to stop between iterations.
    pub stop_path: PathBuf,
}

impl SwarmPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let swarm_dir = root.join(".swarm");
        Self {
            root: root.clone(),
            swarm_dir: swarm_dir.clone(),
            gitignore_path: swarm_dir.join(".gitignore"),
            config_path: swarm_dir.join("config.toml"),
            staging_dir: swarm_dir.join("staging"),
            judge_dir: swarm_dir.join("judge"),
            specs_dir: swarm_dir.join("specs"),
            stop_path: swarm_dir.join("STOP"),
        }
    }

    /// Directory of the generated test files of `run_id`.
    pub fn run_specs_dir(&self, run_id: &str) -> PathBuf {
        self.specs_dir.join(run_id)
    }

    /// Experiment log directory for `config`, resolved against the root.
    pub fn log_dir(&self, config: &SwarmConfig) -> PathBuf {
        self.root.join(&config.log_dir)
    }
}

/// Options for `init_swarm`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing swarm-owned files.
    pub force: bool,
}

/// Create `.swarm/` scaffolding in `root`.
///
/// Fails if `.swarm/` already exists unless `options.force` is set.
pub fn init_swarm(root: &Path, options: &InitOptions) -> Result<SwarmPaths> {
    let paths = SwarmPaths::new(root);
    if paths.swarm_dir.exists() && !paths.swarm_dir.is_dir() {
        return Err(anyhow!("swarm init: .swarm exists but is not a directory"));
    }
    if paths.swarm_dir.exists() && !options.force {
        return Err(anyhow!(
            "swarm init: .swarm already exists (use --force to overwrite)"
        ));
    }

    let config = SwarmConfig::default();
    create_dir(&paths.swarm_dir)?;
    create_dir(&paths.staging_dir)?;
    create_dir(&paths.judge_dir)?;
    create_dir(&paths.specs_dir)?;
    create_dir(&paths.log_dir(&config))?;

    write_file(&paths.gitignore_path, SWARM_GITIGNORE)?;
    write_config(&paths.config_path, &config)?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const SWARM_GITIGNORE: &str = "staging/\njudge/\nSTOP\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_swarm(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.swarm_dir.is_dir());
        assert!(paths.staging_dir.is_dir());
        assert!(paths.judge_dir.is_dir());
        assert!(paths.specs_dir.is_dir());
        assert!(temp.path().join(".swarm/logs").is_dir());
        assert_eq!(
            fs::read_to_string(&paths.gitignore_path).expect("read gitignore"),
            SWARM_GITIGNORE
        );
        assert_eq!(
            load_config(&paths.config_path).expect("load config"),
            SwarmConfig::default()
        );
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_swarm(temp.path(), &InitOptions { force: false }).expect("init");
        let err = init_swarm(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_restores_default_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_swarm(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.config_path, "max_iterations = 2\n").expect("customize");

        init_swarm(temp.path(), &InitOptions { force: true }).expect("re-init");
        assert_eq!(
            load_config(&paths.config_path).expect("load config"),
            SwarmConfig::default()
        );
    }
}
