//! `jeeves run`: ask the daemon to start a run for an issue via the HTTP
//! control API's `POST /runs`.
use crate::http::DaemonClient;
use crate::issue_ref::IssueRef;
use anyhow::Result;
use colored::Colorize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct StartRunRequest {
    owner: String,
    repo: String,
    issue: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_iterations: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StartRunResponse {
    run_id: String,
    issue_ref: String,
}

pub async fn execute(
    daemon: &DaemonClient,
    issue: IssueRef,
    workflow: Option<String>,
    max_iterations: Option<u32>,
) -> Result<()> {
    let request = StartRunRequest {
        owner: issue.owner.clone(),
        repo: issue.repo.clone(),
        issue: issue.issue,
        workflow,
        max_iterations,
    };
    let response: StartRunResponse = daemon.post("/runs", &request).await?;
    println!(
        "{} started run {} for {}",
        "✓".green(),
        response.run_id.bold(),
        response.issue_ref
    );
    println!("  follow progress with: jeeves logs {} --follow", issue);
    Ok(())
}
