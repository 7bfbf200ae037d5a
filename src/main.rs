use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "changeflow")]
#[command(
    version,
    about = "Run a change through lane-selected stages with hooks, checkpoints and resumable state"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer prompts with their default (resume an interrupted run)
    #[arg(long, global = true)]
    pub yes: bool,

    /// Change root (defaults to the current directory)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Console log format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a change through its lane
    Run(RunArgs),
    /// Recover an interrupted workflow
    Resume {
        change: String,
        /// Decide without prompting
        #[arg(long, value_parser = ["resume", "restart", "cancel"])]
        decision: Option<String>,
        /// Print the workflow report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the workflow ledger of a change
    Status {
        change: String,
        #[arg(long)]
        json: bool,
    },
    /// Show lane plans and thresholds
    Lanes {
        /// Only this lane
        lane: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Manage checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Run the hooks of one stage without running the stage
    Hooks {
        change: String,
        #[arg(short, long)]
        stage: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Change identifier
    pub change: String,

    /// Lane: docs, standard or heavy (defaults to flow.toml, then standard)
    #[arg(short, long)]
    pub lane: Option<String>,

    /// Resolve and print the plan without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Skip every hook
    #[arg(long)]
    pub force_hooks: bool,

    /// Maximum concurrent stages in the parallel group
    #[arg(long)]
    pub workers: Option<usize>,

    /// Per-stage timeout in seconds
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Start at this stage (name or number)
    #[arg(long)]
    pub from: Option<String>,

    /// Resume an interrupted run without prompting
    #[arg(long, conflicts_with = "restart")]
    pub resume: bool,

    /// Discard an interrupted run and start over
    #[arg(long)]
    pub restart: bool,

    /// Print the workflow report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// List checkpoints, oldest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Snapshot the working files now
    Create {
        /// Stage the snapshot belongs to (name or number)
        #[arg(short, long)]
        stage: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Restore the working files of a checkpoint
    Rollback { id: String },
    /// Delete all but the newest checkpoints
    Cleanup {
        #[arg(long, default_value = "5")]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let root = match cli.dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let logging = cmd::logging_section(&root);
    let json_logs = cli.log_format == LogFormat::Json || logging.json;
    let file_log_dir = cmd::file_log_dir(&root, &logging);
    let _log_guard =
        changeflow::logging::init_tracing(cli.verbose, json_logs, file_log_dir.as_deref());

    let success = match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&cli, root, args).await?,
        Commands::Resume {
            change,
            decision,
            json,
        } => cmd::cmd_resume(&cli, root, change, decision.as_deref(), *json).await?,
        Commands::Status { change, json } => cmd::cmd_status(&cli, root, change, *json)?,
        Commands::Lanes { lane, json } => cmd::cmd_lanes(&cli, root, lane.as_deref(), *json)?,
        Commands::Checkpoint { command } => cmd::cmd_checkpoint(&cli, root, command)?,
        Commands::Hooks {
            change,
            stage,
            json,
        } => cmd::cmd_hooks(&cli, root, change, stage, *json).await?,
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
