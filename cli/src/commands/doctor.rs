//! `jeeves doctor`: environment health check — config, data dir, git
//! binary, workflow definitions, and whether a daemon is reachable.

use anyhow::Result;
use colored::Colorize;
use jeeves_core::workflow::WorkflowDef;
use jeeves_core::Config;
use std::fs;
use std::path::Path;
use std::process::Command;

enum Status {
    Ok,
    Warning,
    Error,
    NotConfigured,
}

impl Status {
    fn symbol(&self) -> String {
        match self {
            Status::Ok => "✓".green().to_string(),
            Status::Warning => "!".yellow().to_string(),
            Status::Error => "✗".red().to_string(),
            Status::NotConfigured => "○".dimmed().to_string(),
        }
    }
}

fn print_check(status: Status, label: &str, value: &str) {
    println!("  {} {}: {}", status.symbol(), label, value);
}

fn print_section(title: &str) {
    println!("\n{}", title.bold());
}

fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

fn check_git() -> (Status, String) {
    match Command::new("git").arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            (Status::Ok, version)
        }
        Ok(_) => (Status::Error, "failed to get version".to_string()),
        Err(_) => (Status::Error, "not found on PATH".to_string()),
    }
}

fn check_data_dir(data_dir: &Path) -> (Status, String) {
    if !data_dir.exists() {
        return (Status::NotConfigured, format!("{} (run 'jeeves init')", data_dir.display()));
    }
    let probe = data_dir.join(".doctor-write-probe");
    match fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            let size: u64 = fs::read_dir(data_dir)
                .map(|entries| {
                    entries
                        .flatten()
                        .filter_map(|e| e.metadata().ok())
                        .map(|m| m.len())
                        .sum()
                })
                .unwrap_or(0);
            (Status::Ok, format!("{} ({})", data_dir.display(), human_size(size)))
        }
        Err(err) => (Status::Error, format!("{} (not writable: {err})", data_dir.display())),
    }
}

fn check_workflows(workflows_dir: &Path) -> (Status, String) {
    if !workflows_dir.exists() {
        return (Status::NotConfigured, format!("{} (run 'jeeves init')", workflows_dir.display()));
    }
    let entries = match fs::read_dir(workflows_dir) {
        Ok(entries) => entries,
        Err(err) => return (Status::Error, format!("unreadable: {err}")),
    };

    let mut valid = 0;
    let mut invalid = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
            continue;
        }
        match fs::read_to_string(&path).ok().and_then(|text| WorkflowDef::from_yaml(&text).ok()) {
            Some(_) => valid += 1,
            None => invalid += 1,
        }
    }

    if valid == 0 && invalid == 0 {
        (Status::Warning, "directory exists but has no workflow definitions".to_string())
    } else if invalid > 0 {
        (Status::Warning, format!("{valid} valid, {invalid} invalid"))
    } else {
        (Status::Ok, format!("{valid} valid workflow definition(s)"))
    }
}

fn check_daemon(addr: &str, port: u16) -> (Status, String) {
    match std::net::TcpStream::connect_timeout(
        &format!("{addr}:{port}").parse().expect("valid socket address"),
        std::time::Duration::from_millis(500),
    ) {
        Ok(_) => (Status::Ok, format!("reachable at {addr}:{port}")),
        Err(_) => (Status::NotConfigured, format!("not reachable at {addr}:{port}")),
    }
}

pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    println!();
    println!("{}", "jeeves doctor".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());

    print_section("Configuration");
    match Config::load(config_path) {
        Ok(config) => {
            print_check(Status::Ok, "Config", "loaded");

            let (status, value) = check_data_dir(&config.data_dir());
            print_check(status, "Data dir", &value);

            let (status, value) = check_workflows(&config.workflows_dir());
            print_check(status, "Workflows", &value);
        }
        Err(err) => {
            print_check(Status::Error, "Config", &err.to_string());
        }
    }

    print_section("Toolchain");
    let (status, value) = check_git();
    print_check(status, "git", &value);

    print_section("Daemon");
    let (status, value) = check_daemon("127.0.0.1", 4590);
    print_check(status, "jeeves-daemon", &value);

    println!("\n{}", "─".repeat(40).dimmed());
    println!();
    Ok(())
}
