//! `jeeves init`: scaffold `jeeves.toml`, the data and workflows
//! directories, and a starter workflow definition.
use anyhow::Result;
use colored::Colorize;
use jeeves_core::Config;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const EXAMPLE_WORKFLOW: &str = r#"workflow:
  name: implement
  version: "1"
  start: implement_task
phases:
  implement_task:
    name: implement_task
    type: execute
    prompt: |
      Implement the current task. Use the MCP state tools to read task
      details and report progress.
    mcp_profile: implement
    permission_mode: full
    transitions:
      - to: task_spec_check
        auto: true

  task_spec_check:
    name: task_spec_check
    type: evaluate
    prompt: |
      Check the most recent diff against the task's acceptance criteria.
      Report pass or fail via the MCP state tools.
    mcp_profile: review
    permission_mode: read_only
    transitions:
      - to: implement_task
        when: 'status.task_spec_check == "fail"'
      - to: done
        when: 'status.task_spec_check == "pass"'

  done:
    name: done
    type: terminal
    prompt: "Workflow complete."
"#;

pub async fn execute(dir: Option<PathBuf>) -> Result<()> {
    let base_dir = dir.unwrap_or_else(|| PathBuf::from("."));
    println!("{}", format!("Initializing jeeves project at {}", base_dir.display()).green().bold());

    // Absolutize so `Config::workflows_dir()` (which nests a *relative*
    // `workflows_dir` under `data_dir`) returns this sibling-of-data path
    // unchanged instead of re-nesting it.
    let base_dir_abs = if base_dir.is_absolute() {
        base_dir.clone()
    } else {
        std::env::current_dir()?.join(&base_dir)
    };

    let config_path = base_dir.join("jeeves.toml");
    let mut config = Config::default();
    config.data_dir = base_dir_abs.join("data").display().to_string();
    config.workflows_dir = base_dir_abs.join("workflows").display().to_string();

    create_dirs(&base_dir, &config)?;
    write_config(&config_path, &config)?;
    write_example_workflow(Path::new(&config.workflows_dir))?;

    println!("\n{}", "Project initialized.".green().bold());
    println!("  config:    {}", config_path.display());
    println!("  data dir:  {}", config.data_dir);
    println!("  workflows: {}", config.workflows_dir);
    println!("\nNext: run {} to check your environment.", "jeeves doctor".cyan());
    Ok(())
}

fn create_dirs(base_dir: &Path, config: &Config) -> Result<()> {
    for dir in [base_dir.to_path_buf(), PathBuf::from(&config.data_dir), PathBuf::from(&config.workflows_dir)] {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!(dir = %dir.display(), "created directory");
        }
    }
    Ok(())
}

fn write_config(config_path: &Path, config: &Config) -> Result<()> {
    if config_path.exists() {
        println!("  {} config already exists at {}, leaving it in place", "!".yellow(), config_path.display());
        return Ok(());
    }
    let text = toml::to_string_pretty(config)?;
    fs::write(config_path, text)?;
    Ok(())
}

fn write_example_workflow(workflows_dir: &Path) -> Result<()> {
    let path = workflows_dir.join("implement.yaml");
    if path.exists() {
        return Ok(());
    }
    fs::write(path, EXAMPLE_WORKFLOW)?;
    Ok(())
}
