//! Build, push and relay images for the current change set.

use anyhow::{Context, Result, bail};
use clap::Args;
use shipgate_core::RunId;
use shipgate_core::outcome::{RunReport, TargetState};
use shipgate_executor::{DockerCliBuilder, DockerRegistry, EnvCredentialStore};
use shipgate_scheduler::{Orchestrator, RunEvent, RunOptions};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::changes::{self, ChangeArgs};

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Build affected targets but do not push them; relays are skipped
    #[arg(long)]
    pub no_push: bool,

    /// Build this target even if nothing under it changed (repeatable)
    #[arg(long, value_name = "TARGET")]
    pub force: Vec<String>,

    /// Only consider these targets (repeatable)
    #[arg(long, value_name = "TARGET")]
    pub only: Vec<String>,

    /// Do not relay upstream images
    #[arg(long)]
    pub skip_relays: bool,

    /// Classify and report without touching Docker
    #[arg(long)]
    pub dry_run: bool,

    /// Exit successfully when some, but not all, steps failed
    #[arg(long)]
    pub allow_partial: bool,

    /// Write the JSON run report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

impl RunArgs {
    fn to_options(&self, run_id: RunId) -> RunOptions {
        RunOptions {
            run_id,
            push: !self.no_push,
            force: self.force.iter().cloned().collect(),
            only: (!self.only.is_empty()).then(|| self.only.iter().cloned().collect::<BTreeSet<_>>()),
            skip_relays: self.skip_relays,
            dry_run: self.dry_run,
        }
    }
}

pub async fn run(config: &Path, workdir: &Path, changes: &ChangeArgs, args: RunArgs) -> Result<()> {
    let run_id = RunId::new();
    let plan = super::load_plan(config, workdir, run_id).await?;
    let changes = changes::collect(changes, workdir).await?;

    println!("Run {}", run_id);
    println!("Working directory: {}", workdir.display());
    println!("{} changed paths\n", changes.len());

    let credentials = Arc::new(EnvCredentialStore::from_env());
    if !credentials.is_configured() {
        info!("No registry credentials configured; pushing anonymously");
    }
    let builder = Arc::new(DockerCliBuilder::new(workdir));
    let registry = Arc::new(DockerRegistry::new(credentials).context("Failed to connect to Docker")?);
    let orchestrator = Orchestrator::new(builder, registry);

    let (mut rx, handle) = match orchestrator.execute(&plan, &changes, args.to_options(run_id)) {
        Ok(started) => started,
        Err(e) if e.is_fatal() => bail!("Run aborted before any build: {}", e),
        Err(e) => return Err(e).context("Failed to start run"),
    };

    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    let report = handle.await.context("Run task failed")?;

    println!("\n--- Summary ---");
    for outcome in &report.outcomes {
        println!("  {} - {}", outcome.name, describe(&outcome.state));
    }
    let summary = report.summary();
    println!(
        "\n{} pushed, {} built, {} skipped, {} failed",
        summary.pushed, summary.built, summary.skipped, summary.failed
    );

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
    }

    if exit_ok(&report, args.allow_partial) {
        Ok(())
    } else {
        bail!("{} of {} steps failed", summary.failed, report.outcomes.len());
    }
}

/// Whether the process should exit successfully for this report.
fn exit_ok(report: &RunReport, allow_partial: bool) -> bool {
    report.success || (allow_partial && !report.all_failed())
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::Classified { affected } => {
            if affected.is_empty() {
                println!("No targets affected\n");
            } else {
                println!("Affected: {}\n", affected.join(", "));
            }
        }
        RunEvent::TargetSkipped { target, reason } => {
            println!("⊘ Target '{}' skipped: {}", target, reason);
        }
        RunEvent::TargetStarted { target } => {
            println!("▶ Target '{}' building", target);
        }
        RunEvent::TargetCompleted { target, state } => {
            print_completed("Target", target, state);
        }
        RunEvent::RelaySkipped { relay, reason } => {
            println!("⊘ Relay '{}' skipped: {}", relay, reason);
        }
        RunEvent::RelayStarted { relay } => {
            println!("▶ Relay '{}' started", relay);
        }
        RunEvent::RelayCompleted { relay, state } => {
            print_completed("Relay", relay, state);
        }
        RunEvent::RunCompleted { success } => {
            if *success {
                println!("\n--- Run completed successfully ---");
            } else {
                println!("\n--- Run completed with failures ---");
            }
        }
    }
}

fn print_completed(kind: &str, name: &str, state: &TargetState) {
    if state.is_failure() {
        println!("✗ {} '{}' {}", kind, name, describe(state));
    } else {
        println!("✓ {} '{}' {}", kind, name, describe(state));
    }
}

fn describe(state: &TargetState) -> String {
    match state {
        TargetState::Pending => "○ pending".to_string(),
        TargetState::Building { .. } => "▶ building".to_string(),
        TargetState::Skipped { reason } => format!("⊘ skipped: {}", reason),
        TargetState::Built { .. } => "✓ built".to_string(),
        TargetState::Pushed { tag } => format!("✓ pushed {}", tag),
        TargetState::Failed { stage, message } => format!("✗ {} failed: {}", stage, message),
    }
}
