use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "shepherd")]
#[command(
    version,
    about = "Drive coding agents from a task spec to a reviewed pull request"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run (or resume) a session for a task spec
    Run(RunArgs),
    /// Inspect and maintain saved sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
    /// Show executor policies and their fallback chains
    Policies,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Task specification (PRD) to implement
    pub task_spec: Option<PathBuf>,

    /// Repository to work in (defaults to the project directory)
    #[arg(long)]
    pub repo: Option<PathBuf>,

    /// Phases to run, comma-separated: local, pr, review_fix
    #[arg(long, default_value = "local,pr,review_fix")]
    pub phases: String,

    /// Executor policy name
    #[arg(long)]
    pub policy: Option<String>,

    /// Resume the latest matching session without asking
    #[arg(long, conflicts_with = "force_new")]
    pub resume: bool,

    /// Resume a specific session by id
    #[arg(long, value_name = "ID", conflicts_with = "force_new")]
    pub resume_session: Option<String>,

    /// Always start a new session
    #[arg(long)]
    pub force_new: bool,

    /// List saved sessions and exit
    #[arg(long)]
    pub list_sessions: bool,

    /// Base branch for the pull request (defaults to origin's default branch)
    #[arg(long)]
    pub base_branch: Option<String>,

    /// Feature branch (defaults to shepherd/<task spec name>)
    #[arg(long)]
    pub branch: Option<String>,

    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Seconds between review polls (minimum 30)
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    #[arg(long, value_name = "MINUTES")]
    pub idle_grace_minutes: Option<u64>,

    /// Keep polling until the reviewer posts an all-clear
    #[arg(long)]
    pub infinite: bool,

    /// Seconds to wait before the first review poll
    #[arg(long, value_name = "SECS")]
    pub initial_delay: Option<u64>,

    /// Pin an agent for a phase, e.g. --agent-for review_fix=codex
    #[arg(long, value_name = "PHASE=AGENT")]
    pub agent_for: Vec<String>,

    /// Answer yes to prompts (resume an existing session automatically)
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand, Clone)]
pub enum SessionsCommands {
    /// List saved sessions
    List,
    /// Show one session in detail
    Show { id: String },
    /// Delete a session and its logs
    Delete {
        id: String,
        #[arg(long)]
        force: bool,
    },
    /// Delete completed sessions older than N days
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run(args) => cmd::cmd_run(&cli, project_dir, args).await?,
        Commands::Sessions { command } => {
            let _guard = shepherd::logging::init(None, cli.verbose)?;
            cmd::cmd_sessions(&project_dir, command)?
        }
        Commands::Policies => {
            let _guard = shepherd::logging::init(None, cli.verbose)?;
            cmd::cmd_policies(&project_dir)?
        }
    }
    Ok(())
}
