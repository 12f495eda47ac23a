use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::actions::commands;
use crate::config::BoxConfig;

#[derive(Debug, Parser)]
#[command(name = "boxup")]
#[command(about = "Brings up, provisions and tears down a single EC2 box", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output, repeat for more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Bring the box up and provision it
    It {
        /// Plan to run instead of the bundled data-platform plan
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Also write remote output to timestamped files here
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Start the existing box or launch a new one
    Up {
        /// Return once EC2 accepts the request
        #[arg(long)]
        no_wait: bool,
    },

    /// Stop the box
    #[command(alias = "halt")]
    Down,

    /// Show the box's details
    Status,

    /// Open a shell on the box, or run the given command there
    Ssh {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run a plan file against the box
    Plan {
        file: PathBuf,

        /// Also write remote output to timestamped files here
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Sync a local directory into the box user's home
    Rsync {
        #[arg(long, env = "SOURCE_PATH")]
        source: Option<PathBuf>,
    },

    /// List every AWS resource carrying the box's Name tag
    Tagged,

    /// Terminate the box and delete its volumes
    #[command(alias = "terminate")]
    Destroy,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(u8::try_from(status).unwrap_or(1))
}

pub async fn run() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let bc = BoxConfig::from_env()?;
    debug!("\n{}", bc);

    match args.command {
        Commands::It { plan, log_dir } => {
            commands::cmd_it(&bc, plan.as_deref(), log_dir.as_deref()).await?
        }
        Commands::Up { no_wait } => {
            commands::cmd_up(&bc, no_wait).await?;
        }
        Commands::Down => commands::cmd_down(&bc).await?,
        Commands::Status => commands::cmd_status(&bc).await?,
        Commands::Ssh { command } => {
            let status = commands::cmd_ssh(&bc, &command).await?;
            return Ok(exit_code(status));
        }
        Commands::Plan { file, log_dir } => {
            commands::cmd_plan(&bc, &file, log_dir.as_deref()).await?
        }
        Commands::Rsync { source } => commands::cmd_rsync(&bc, source).await?,
        Commands::Tagged => commands::cmd_tagged(&bc).await?,
        Commands::Destroy => commands::cmd_destroy(&bc).await?,
    }

    Ok(ExitCode::SUCCESS)
}
