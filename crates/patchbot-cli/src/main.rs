//! Patchbot worker CLI.

use clap::{Args, Parser, Subcommand};
use patchbot_config::{ConfigOverrides, ConfigSource};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "patchbot")]
#[command(about = "Test Sage tickets and report the results", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, env = "PATCHBOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Values that take precedence over the configuration file.
#[derive(Args)]
struct OverrideArgs {
    /// Sage checkout to test in
    #[arg(long, global = true)]
    sage_root: Option<PathBuf>,

    /// Collector URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Name shown as the owner of this worker
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Only build changes that are safe to build in place
    #[arg(long, global = true)]
    safe_only: Option<bool>,

    /// Do not submit final reports
    #[arg(long, global = true)]
    dry_run: bool,

    /// Run plugins only, no doctests
    #[arg(long, global = true)]
    plugin_only: bool,

    /// Do not test or advance the baseline
    #[arg(long, global = true)]
    skip_base: bool,

    /// Remove leftover isolated clones
    #[arg(long, global = true)]
    cleanup: bool,
}

impl OverrideArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            sage_root: self.sage_root,
            server: self.server,
            owner: self.owner,
            safe_only: self.safe_only,
            dry_run: self.dry_run,
            plugin_only: self.plugin_only,
            skip_base: self.skip_base,
            cleanup: self.cleanup,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Test tickets until stopped
    Run {
        /// Test these tickets instead of selecting
        #[arg(long = "ticket", value_name = "ID")]
        tickets: Vec<u64>,
        /// Stop after this many iterations
        #[arg(long)]
        count: Option<usize>,
    },
    /// Print the rating of every candidate ticket
    List,
    /// Print the effective configuration
    Config,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let source = ConfigSource::new(cli.config, cli.overrides.into_overrides());

    match cli.command {
        Commands::Run { tickets, count } => {
            commands::run::run(source, tickets, count).await?;
        }
        Commands::List => {
            commands::list::list(source).await?;
        }
        Commands::Config => {
            commands::show_config(&source)?;
        }
        Commands::Validate => {
            commands::validate(&source)?;
        }
    }

    Ok(())
}
