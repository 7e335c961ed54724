//! `jeeves kill`: cancel a running run (`POST /runs/:id/cancel`).
use crate::http::DaemonClient;
use anyhow::Result;
use colored::Colorize;
use serde_json::json;

pub async fn execute(daemon: &DaemonClient, run_id: &str) -> Result<()> {
    let _: serde_json::Value = daemon.post(&format!("/runs/{run_id}/cancel"), &json!({})).await?;
    println!("{} cancellation requested for {}", "✓".green(), run_id.bold());
    Ok(())
}
