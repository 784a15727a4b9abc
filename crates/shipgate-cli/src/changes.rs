//! Change set discovery.
//!
//! Sources, in order of precedence: `--changed` arguments, a changes file
//! (`-` for stdin), every tracked file (`--all`), or a git diff.

use anyhow::{Context, Result, bail};
use clap::Args;
use shipgate_core::ChangeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Args)]
pub struct ChangeArgs {
    /// A changed path (repeatable); skips git entirely
    #[arg(long = "changed", value_name = "PATH")]
    pub changed: Vec<String>,

    /// File with one changed path per line ("-" reads stdin)
    #[arg(long, value_name = "FILE", conflicts_with = "changed")]
    pub changes_file: Option<PathBuf>,

    /// Treat every tracked file as changed
    #[arg(long, conflicts_with_all = ["changed", "changes_file"])]
    pub all: bool,

    /// Git revision to diff from (default HEAD~1); an all-zero SHA means every file changed
    #[arg(long, env = "SHIPGATE_GIT_BASE")]
    pub base: Option<String>,

    /// Git revision to diff to
    #[arg(long, env = "SHIPGATE_GIT_HEAD", default_value = "HEAD")]
    pub head: String,
}

/// Base used when none is given: the previous commit.
const DEFAULT_BASE: &str = "HEAD~1";

/// Whether a revision is the all-zero SHA CI systems send for new branches.
pub fn is_null_revision(rev: &str) -> bool {
    !rev.is_empty() && rev.chars().all(|c| c == '0')
}

/// Top-level directory of the git repository containing `dir`.
pub async fn repo_root(dir: &Path) -> Result<PathBuf> {
    let output = git(dir, &["rev-parse", "--show-toplevel"]).await?;
    let root = output.trim();
    if root.is_empty() {
        bail!("git did not report a top-level directory for {}", dir.display());
    }
    Ok(PathBuf::from(root))
}

/// Collect the change set described by `args`.
///
/// Git paths are always relative to the repository root, whichever
/// directory inside the repository `repo` points at.
pub async fn collect(args: &ChangeArgs, repo: &Path) -> Result<ChangeSet> {
    if !args.changed.is_empty() {
        return Ok(args.changed.iter().collect());
    }

    if let Some(file) = &args.changes_file {
        let text = if file.as_os_str() == "-" {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read changes from stdin")?;
            text
        } else {
            tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read changes file: {}", file.display()))?
        };
        return Ok(ChangeSet::from_lines(&text));
    }

    let root = repo_root(repo).await?;
    let base = args.base.as_deref().unwrap_or(DEFAULT_BASE);
    if args.all || is_null_revision(base) {
        info!(root = %root.display(), "Treating every tracked file as changed");
        let output = git(&root, &["ls-files", "-z"]).await?;
        return Ok(split_nul(&output));
    }

    info!(base = %base, head = %args.head, "Diffing revisions");
    // Without rename detection a move reports both the old and the new path.
    let output = git(
        &root,
        &["diff", "--name-only", "-z", "--no-renames", base, &args.head],
    )
    .await?;
    Ok(split_nul(&output))
}

/// Paths from `-z` output, which git never quotes.
fn split_nul(output: &str) -> ChangeSet {
    output.split('\0').collect()
}

async fn git(repo: &Path, args: &[&str]) -> Result<String> {
    debug!(?args, repo = %repo.display(), "Running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to run git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
