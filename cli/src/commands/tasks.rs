//! `jeeves tasks`: list or show the task list for an issue, read straight
//! from `tasks.json`.
use crate::issue_ref::IssueRef;
use anyhow::Result;
use colored::Colorize;
use jeeves_core::{Config, JsonStateStore, TaskStatus};
use std::path::Path;

fn status_label(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Pending => "pending".dimmed(),
        TaskStatus::Running => "running".yellow(),
        TaskStatus::Passed => "passed".green(),
        TaskStatus::Failed => "failed".red(),
    }
}

pub async fn execute(config_path: Option<&Path>, issue: IssueRef, id: Option<String>) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = JsonStateStore::open(config.data_dir()).await?;
    let tasks = store.load_tasks(&issue.owner, &issue.repo, issue.issue)?;

    if let Some(id) = id {
        let task = tasks
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("no task '{id}' in {issue}"))?;
        println!("{} {}", task.id.bold(), task.title);
        println!("  status:   {}", status_label(task.status));
        println!("  summary:  {}", task.summary);
        if !task.depends_on.is_empty() {
            println!("  depends:  {}", task.depends_on.join(", "));
        }
        if !task.files_allowed.is_empty() {
            println!("  files:    {}", task.files_allowed.join(", "));
        }
        if !task.acceptance_criteria.is_empty() {
            println!("  acceptance:");
            for criterion in &task.acceptance_criteria {
                println!("    - {criterion}");
            }
        }
        return Ok(());
    }

    if tasks.tasks.is_empty() {
        println!("no tasks recorded for {issue}");
        return Ok(());
    }
    for task in &tasks.tasks {
        println!("{:<6} {:<8} {}", task.id.bold(), status_label(task.status), task.title);
    }
    Ok(())
}
