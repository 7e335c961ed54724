//! `jeeves ps`: list the daemon's currently active runs (`GET /runs`).
use crate::http::DaemonClient;
use anyhow::Result;
use colored::Colorize;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ActiveRunsResponse {
    active_runs: Vec<String>,
}

pub async fn execute(daemon: &DaemonClient) -> Result<()> {
    let response: ActiveRunsResponse = daemon.get("/runs").await?;
    if response.active_runs.is_empty() {
        println!("no active runs");
        return Ok(());
    }
    println!("{}", "active runs".dimmed());
    for run_id in &response.active_runs {
        println!("  {}", run_id.bold());
    }
    Ok(())
}
