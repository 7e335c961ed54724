//! `jeeves workflow`: inspect and validate workflow YAML documents
//! (`jeeves_core::workflow::WorkflowDef`).
use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use jeeves_core::workflow::{PhaseType, WorkflowDef};
use jeeves_core::Config;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// List the workflow definitions available under the configured
    /// workflows directory.
    List,
    /// Print a workflow's phases and transitions.
    Show { name: String },
    /// Parse and structurally validate a workflow YAML file.
    Validate { path: PathBuf },
}

pub async fn execute(config_path: Option<&Path>, action: WorkflowAction) -> Result<()> {
    match action {
        WorkflowAction::List => list(config_path).await,
        WorkflowAction::Show { name } => show(config_path, &name).await,
        WorkflowAction::Validate { path } => validate(&path).await,
    }
}

async fn list(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let dir = config.workflows_dir();
    if !dir.exists() {
        println!("no workflows directory at {}", dir.display());
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "yaml" || ext == "yml"))
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    if entries.is_empty() {
        println!("no workflow definitions found in {}", dir.display());
        return Ok(());
    }
    for entry in entries {
        let stem = entry.path().file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        match WorkflowDef::load(&dir, &stem) {
            Ok(workflow) => println!("{:<20} {} phases, start={}", stem.bold(), workflow.phases.len(), workflow.start),
            Err(err) => println!("{:<20} {}", stem.bold(), format!("invalid: {err}").red()),
        }
    }
    Ok(())
}

async fn show(config_path: Option<&Path>, name: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let workflow = WorkflowDef::load(&config.workflows_dir(), name).map_err(|e| anyhow::anyhow!(e))?;

    println!("{} {} (v{})", "workflow".dimmed(), workflow.name.bold(), workflow.version);
    println!("  start: {}", workflow.start.cyan());
    let mut names: Vec<_> = workflow.phases.keys().collect();
    names.sort();
    for name in names {
        let phase = &workflow.phases[name];
        let marker = if *name == workflow.start { "*" } else { " " };
        let type_label = match phase.phase_type {
            PhaseType::Execute => "execute",
            PhaseType::Evaluate => "evaluate",
            PhaseType::Terminal => "terminal",
        };
        println!("  {}{:<20} {}", marker, name, type_label.dimmed());
        for transition in &phase.transitions {
            let when = transition.when.as_deref().unwrap_or("always");
            println!("      -> {} when {}", transition.to, when);
        }
    }
    Ok(())
}

async fn validate(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    match WorkflowDef::from_yaml(&text) {
        Ok(workflow) => {
            println!("{} {} is valid ({} phases)", "✓".green(), path.display(), workflow.phases.len());
            Ok(())
        }
        Err(err) => {
            println!("{} {}: {}", "✗".red(), path.display(), err);
            anyhow::bail!("workflow validation failed");
        }
    }
}
