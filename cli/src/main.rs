//! `jeeves`: the operator-facing CLI for the Jeeves execution engine —
//! start runs, tail progress, inspect state directories, and manage
//! workflow definitions.
mod commands;
mod http;
mod issue_ref;

use clap::{Parser, Subcommand};
use issue_ref::IssueRef;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "jeeves", about = "Operator CLI for the Jeeves execution engine", version)]
struct Cli {
    /// Path to `jeeves.toml`; defaults to `$JEEVES_CONFIG` then built-in
    /// defaults (jeeves-core's own precedence).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon control API address, e.g. `127.0.0.1`.
    #[arg(long, global = true, default_value = "127.0.0.1")]
    daemon_addr: String,

    /// Daemon control API port.
    #[arg(long, global = true, default_value_t = 4590)]
    daemon_port: u16,

    /// Daemon WebSocket viewer-stream port (used by `attach`).
    #[arg(long, global = true, default_value_t = 4591)]
    ws_port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a `jeeves.toml`, data dir, and workflows dir.
    Init {
        /// Directory to initialize into (defaults to the current directory).
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Start a run for an issue through the daemon.
    Run {
        /// `owner/repo#issue`.
        issue: IssueRef,
        /// Workflow name override; defaults to the issue record's own
        /// `workflow` field.
        #[arg(long)]
        workflow: Option<String>,
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Show an issue's current phase and status mapping.
    Status { issue: IssueRef },

    /// Tail `last-run.log` for an issue.
    Logs {
        issue: IssueRef,
        #[arg(short, long)]
        follow: bool,
    },

    /// List or show tasks for an issue.
    Tasks {
        issue: IssueRef,
        /// Show one task's detail instead of the summary list.
        #[arg(long)]
        id: Option<String>,
    },

    /// Validate or print a workflow definition.
    Workflow {
        #[command(subcommand)]
        action: commands::workflow::WorkflowAction,
    },

    /// List runs currently active on the daemon.
    Ps,

    /// Cancel an in-flight run.
    Kill { run_id: String },

    /// Check local environment health (config, data dir, git, workflows).
    Doctor,

    /// Attach to the daemon's live event stream for one issue.
    Attach { issue: IssueRef },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let daemon = http::DaemonClient::new(&cli.daemon_addr, cli.daemon_port);

    match cli.command {
        Commands::Init { dir } => commands::init::execute(dir).await,
        Commands::Run { issue, workflow, max_iterations } => {
            commands::run::execute(&daemon, issue, workflow, max_iterations).await
        }
        Commands::Status { issue } => commands::status::execute(cli.config.as_deref(), issue).await,
        Commands::Logs { issue, follow } => commands::logs::execute(cli.config.as_deref(), issue, follow).await,
        Commands::Tasks { issue, id } => commands::tasks::execute(cli.config.as_deref(), issue, id).await,
        Commands::Workflow { action } => commands::workflow::execute(cli.config.as_deref(), action).await,
        Commands::Ps => commands::ps::execute(&daemon).await,
        Commands::Kill { run_id } => commands::kill::execute(&daemon, &run_id).await,
        Commands::Doctor => commands::doctor::execute(cli.config.as_deref()).await,
        Commands::Attach { issue } => commands::attach::execute(&cli.daemon_addr, cli.ws_port, issue).await,
    }
}
