//! `jeeves-worker`: runs a single tool command inside an already-materialized
//! worker sandbox (spec.md §4.4), independent of the in-process provider
//! event pump. A phase's prompt instructs the agent to invoke tool commands
//! (e.g. a test runner) through this binary when it wants OS-level process
//! isolation distinct from the provider subprocess itself — mirroring the
//! teacher's split between "the long-lived agent loop" and "one-shot
//! command execution" (SPEC_FULL.md §2.1, §9).
//!
//! The sandbox directory passed via `--sandbox-dir` is a worker state dir
//! produced by `jeeves_core::sandbox_manager::SandboxManager::create`; its
//! sibling worktree (linked back via `.jeeves`) is where the command
//! actually runs.
use clap::Parser;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "jeeves-worker", about = "Run one tool command inside a worker sandbox")]
struct Args {
    /// Worker sandbox state dir (contains `.jeeves` back-link information
    /// alongside the worktree it runs the command in).
    #[arg(long)]
    sandbox_dir: PathBuf,

    /// Working directory the command actually executes in; defaults to the
    /// worktree directory the sandbox's `.jeeves` link points back from.
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Task id this sandbox belongs to (surfaced in the result document and
    /// log lines only; not interpreted).
    #[arg(long)]
    task_id: String,

    /// Command and arguments to execute, e.g. `-- cargo test`.
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
struct ToolResult {
    task_id: String,
    command: Vec<String>,
    exit_code: Option<i32>,
    duration_ms: u128,
    stdout_lines: usize,
    stderr_lines: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let working_dir = args.working_dir.clone().unwrap_or_else(|| args.sandbox_dir.clone());
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("no command given"))?;

    info!(task_id = %args.task_id, program, ?rest, dir = %working_dir.display(), "running tool command");

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(rest)
        .current_dir(&working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow::anyhow!("failed to spawn {program}: {e}"))?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut count = 0usize;
        while let Ok(Some(line)) = lines.next_line().await {
            println!("[stdout] {line}");
            count += 1;
        }
        count
    });
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut count = 0usize;
        while let Ok(Some(line)) = lines.next_line().await {
            eprintln!("[stderr] {line}");
            count += 1;
        }
        count
    });

    let status = child.wait().await.map_err(|e| anyhow::anyhow!("command wait failed: {e}"))?;
    let stdout_lines = stdout_task.await.unwrap_or(0);
    let stderr_lines = stderr_task.await.unwrap_or(0);

    let result = ToolResult {
        task_id: args.task_id,
        command: args.command,
        exit_code: status.code(),
        duration_ms: start.elapsed().as_millis(),
        stdout_lines,
        stderr_lines,
    };

    let result_path = args.sandbox_dir.join("tool-result.json");
    if let Err(e) = std::fs::write(&result_path, serde_json::to_vec_pretty(&result)?) {
        error!(path = %result_path.display(), error = %e, "failed to write tool result");
    }

    std::process::exit(status.code().unwrap_or(1));
}
