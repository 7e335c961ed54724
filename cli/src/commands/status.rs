//! `jeeves status`: show an issue's current phase and status mapping,
//! read straight from the JSON state tree (no daemon round trip needed —
//! `issue.json` is the authoritative document).
use crate::issue_ref::IssueRef;
use anyhow::Result;
use colored::Colorize;
use jeeves_core::{Config, JsonStateStore};
use std::path::Path;

pub async fn execute(config_path: Option<&Path>, issue: IssueRef) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = JsonStateStore::open(config.data_dir()).await?;
    let record = store.load_issue(&issue.owner, &issue.repo, issue.issue)?;

    println!("{} {}", "issue".dimmed(), issue.to_string().bold());
    println!("  title:    {}", record.title);
    println!("  workflow: {}", record.workflow);
    println!("  phase:    {}", record.phase.cyan());
    println!("  branch:   {}", record.branch);
    if record.status.is_empty() {
        println!("  status:   (empty)");
    } else {
        println!("  status:");
        for (key, value) in &record.status {
            println!("    {key}: {value}");
        }
    }
    Ok(())
}
