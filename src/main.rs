use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quasar::cmd::{cmd_cockpit, cmd_nebula_apply, cmd_nebula_plan, cmd_nebula_show, cmd_nebula_status, cmd_run, cmd_validate};
use quasar::config::{CliOverrides, GateMode, LogFormat, QuasarConfig};

#[derive(Parser)]
#[command(name = "quasar")]
#[command(version, about = "Nebula Orchestrator: schedules coder/reviewer agent fleets through a dependency-aware DAG")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `nebula.toml` and phase files. Defaults to the project directory.
    #[arg(long, global = true)]
    pub nebula_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    #[arg(long, global = true)]
    pub max_review_cycles: Option<u32>,

    #[arg(long, global = true)]
    pub max_budget_usd: Option<f64>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true)]
    pub gate: Option<GateMode>,

    /// External issue-tracker CLI used by `nebula apply` (e.g. `bead`).
    #[arg(long, global = true, default_value = "bead")]
    pub tracker_cmd: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a nebula's dependency graph and scopes without running anything.
    Validate,
    /// Dispatch the Worker Pool against a validated nebula until completion,
    /// manual stop, or deadlock.
    Run,
    /// Tracker-integration and inspection verbs for a nebula.
    Nebula {
        #[command(subcommand)]
        command: NebulaCommands,
    },
    /// Print the data a cockpit TUI would render.
    Cockpit,
}

#[derive(Subcommand)]
pub enum NebulaCommands {
    /// Diff desired phases against tracked beads.
    Plan,
    /// Create missing beads and persist their ids to `nebula.state.toml`.
    Apply,
    /// Show every phase's resolved settings and tracked status.
    Show,
    /// Show aggregate cost and telemetry counters.
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    let overrides = CliOverrides {
        max_workers: cli.max_workers,
        max_review_cycles: cli.max_review_cycles,
        max_budget_usd: cli.max_budget_usd,
        model: cli.model.clone(),
        gate: cli.gate,
        verbose: cli.verbose,
    };
    let config = QuasarConfig::resolve(project_dir.clone(), overrides)?;
    init_tracing(cli.verbose, config.log_format);
    let nebula_dir = cli.nebula_dir.clone().unwrap_or_else(|| project_dir.clone());

    let code = match &cli.command {
        Commands::Validate => {
            cmd_validate(&nebula_dir, &config)?;
            0
        }
        Commands::Run => cmd_run(&nebula_dir, &config).await?,
        Commands::Nebula { command } => {
            match command {
                NebulaCommands::Plan => cmd_nebula_plan(&nebula_dir, &config)?,
                NebulaCommands::Apply => cmd_nebula_apply(&nebula_dir, &config, &cli.tracker_cmd).await?,
                NebulaCommands::Show => cmd_nebula_show(&nebula_dir, &config)?,
                NebulaCommands::Status => cmd_nebula_status(&nebula_dir, &config)?,
            }
            0
        }
        Commands::Cockpit => {
            cmd_cockpit(&nebula_dir, &config)?;
            0
        }
    };

    Ok(ExitCode::from(code as u8))
}

fn init_tracing(verbose: bool, log_format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("QUASAR_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match log_format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
