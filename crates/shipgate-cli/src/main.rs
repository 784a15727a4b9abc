//! Shipgate CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod changes;
mod commands;

use changes::ChangeArgs;

#[derive(Parser)]
#[command(name = "shipgate")]
#[command(about = "Build and push container images for the parts of a repository that changed", long_about = None)]
struct Cli {
    /// Path to the manifest
    #[arg(long, short, env = "SHIPGATE_CONFIG", default_value = "shipgate.kdl")]
    config: PathBuf,

    /// Repository root that path globs and build contexts are relative to
    /// (defaults to the git top level of the manifest's directory)
    #[arg(long, env = "SHIPGATE_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which targets the current changes affect
    Plan {
        #[command(flatten)]
        changes: ChangeArgs,
        /// Print the classification as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build and push affected targets, then relay upstream images
    Run {
        #[command(flatten)]
        changes: ChangeArgs,
        #[command(flatten)]
        options: commands::run::RunArgs,
    },
    /// Validate the manifest
    Validate,
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let workdir = commands::resolve_workdir(&cli.config, cli.workdir.as_deref()).await?;

    match cli.command {
        Commands::Plan { changes, json } => {
            commands::plan::plan(&cli.config, &workdir, &changes, json).await?;
        }
        Commands::Run { changes, options } => {
            commands::run::run(&cli.config, &workdir, &changes, options).await?;
        }
        Commands::Validate => {
            commands::validate(&cli.config, &workdir).await?;
        }
    }

    Ok(())
}
