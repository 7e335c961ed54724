//! `jeeves logs`: print (or tail) `last-run.log` for an issue directly off
//! disk, matching the file the phase runner itself appends to.
use crate::issue_ref::IssueRef;
use anyhow::Result;
use jeeves_core::{Config, IssuePaths};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn execute(config_path: Option<&Path>, issue: IssueRef, follow: bool) -> Result<()> {
    let config = Config::load(config_path)?;
    let paths = IssuePaths::new(&config.data_dir(), &issue.owner, &issue.repo, issue.issue);
    let log_path = paths.last_run_log();

    if !log_path.exists() {
        println!("no log yet at {}", log_path.display());
        return Ok(());
    }

    print_from(&log_path, 0).await?;

    if !follow {
        return Ok(());
    }

    let mut offset = std::fs::metadata(&log_path)?.len();
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let len = std::fs::metadata(&log_path)?.len();
        if len < offset {
            // Log was rotated/truncated by a new run; restart from the top.
            offset = 0;
        }
        if len > offset {
            offset = print_from(&log_path, offset).await?;
        }
    }
}

/// Print every line from `offset` to EOF, returning the new end-of-file
/// offset.
async fn print_from(path: &std::path::Path, offset: u64) -> Result<u64> {
    let mut std_file = std::fs::File::open(path)?;
    std_file.seek(SeekFrom::Start(offset))?;
    let len = std_file.metadata()?.len();
    let mut file = tokio::fs::File::from_std(std_file);
    let mut reader = BufReader::new(&mut file);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        print!("{line}");
    }
    Ok(len)
}
