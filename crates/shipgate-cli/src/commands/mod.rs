//! CLI command implementations.

pub mod plan;
pub mod run;

use anyhow::{Context, Result};
use shipgate_config::{Manifest, VariableContextBuilder};
use shipgate_core::{BuildPlan, RunId};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::changes;

/// The repository root: `--workdir`, or the top level of the git repository
/// holding the manifest. Outside a repository the manifest's directory is used.
pub async fn resolve_workdir(config: &Path, workdir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = workdir {
        return dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve working directory: {}", dir.display()));
    }

    let dir = config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .canonicalize()
        .with_context(|| format!("Failed to resolve manifest directory: {}", config.display()))?;

    match changes::repo_root(&dir).await {
        Ok(root) => root
            .canonicalize()
            .with_context(|| format!("Failed to resolve repository root: {}", root.display())),
        Err(e) => {
            debug!(error = %e, dir = %dir.display(), "Not a git repository; using manifest directory");
            Ok(dir)
        }
    }
}

/// Read the manifest, apply environment overrides and resolve the build plan.
///
/// Reading the file and querying git block, so this runs on the blocking pool.
pub async fn load_plan(config: &Path, workdir: &Path, run_id: RunId) -> Result<BuildPlan> {
    let config = config.to_path_buf();
    let workdir = workdir.to_path_buf();
    tokio::task::spawn_blocking(move || load_plan_blocking(&config, &workdir, run_id))
        .await
        .context("Manifest loading task failed")?
}

fn load_plan_blocking(config: &Path, workdir: &Path, run_id: RunId) -> Result<BuildPlan> {
    let manifest = Manifest::from_path(config)
        .with_context(|| format!("Failed to parse manifest: {}", config.display()))?;

    let mut settings = manifest.settings.clone();
    settings.apply_process_env();
    debug!(?settings, "Effective settings");

    let mut ctx = VariableContextBuilder::new()
        .with_settings(settings)
        .with_run(run_id.to_string())
        .build();
    ctx.populate_git_from_env();
    ctx.populate_git_from_repo(&workdir.to_string_lossy());
    ctx.populate_env();

    manifest
        .resolve(&ctx)
        .with_context(|| format!("Invalid manifest: {}", config.display()))
}

pub async fn validate(config: &Path, workdir: &Path) -> Result<()> {
    match load_plan(config, workdir, RunId::new()).await {
        Ok(plan) => {
            println!(
                "Configuration is valid ({} targets, {} relays)",
                plan.targets().len(),
                plan.relays().len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
