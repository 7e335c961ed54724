//! Run records: one process-level execution of an issue through its workflow.
use crate::errors::CompletionReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    ImplementTask,
    TaskSpecCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatusValue {
    Running,
    Passed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub task_id: String,
    pub phase: PhaseKind,
    pub status: WorkerStatusValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub running: bool,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub completion_reason: Option<CompletionReason>,
    pub last_error: Option<String>,
    pub issue_ref: String,
    #[serde(default)]
    pub workers: Vec<WorkerStatus>,
    /// Populated from `CARGO_PKG_VERSION`, never hand-maintained.
    pub engine_version: String,
    pub hostname: String,
}

impl RunRecord {
    pub fn new(run_id: String, issue_ref: String, max_iterations: u32) -> Self {
        Self {
            run_id,
            running: true,
            pid: std::process::id(),
            started_at: Utc::now(),
            ended_at: None,
            iteration: 0,
            max_iterations,
            completion_reason: None,
            last_error: None,
            issue_ref,
            workers: Vec::new(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname_or_unknown(),
        }
    }

    pub fn finish(&mut self, reason: CompletionReason, last_error: Option<String>) {
        self.running = false;
        self.ended_at = Some(Utc::now());
        self.completion_reason = Some(reason);
        self.last_error = last_error;
    }

    pub fn upsert_worker(&mut self, status: WorkerStatus) {
        if let Some(existing) = self
            .workers
            .iter_mut()
            .find(|w| w.task_id == status.task_id && w.phase == status.phase)
        {
            *existing = status;
        } else {
            self.workers.push(status);
        }
    }
}

fn hostname_or_unknown() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// The "short run id" used in worker branch names: the random suffix of
/// `run_id` after the last `.`, or the first 8 characters if no `.` appears.
pub fn short_run_id(run_id: &str) -> &str {
    match run_id.rfind('.') {
        Some(idx) => &run_id[idx + 1..],
        None => {
            let end = run_id.char_indices().nth(8).map(|(i, _)| i).unwrap_or(run_id.len());
            &run_id[..end]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_run_id_uses_suffix_after_dot() {
        assert_eq!(short_run_id("run.2026-01-01.ab12cd34"), "ab12cd34");
    }

    #[test]
    fn short_run_id_falls_back_to_first_eight_chars() {
        assert_eq!(short_run_id("abcdefghijklmnop"), "abcdefgh");
    }

    #[test]
    fn short_run_id_handles_short_input() {
        assert_eq!(short_run_id("abc"), "abc");
    }

    #[test]
    fn worker_upsert_replaces_matching_entry() {
        let mut run = RunRecord::new("r1".into(), "acme/widgets#42".into(), 10);
        run.upsert_worker(WorkerStatus {
            task_id: "T1".into(),
            phase: PhaseKind::ImplementTask,
            status: WorkerStatusValue::Running,
        });
        run.upsert_worker(WorkerStatus {
            task_id: "T1".into(),
            phase: PhaseKind::ImplementTask,
            status: WorkerStatusValue::Passed,
        });
        assert_eq!(run.workers.len(), 1);
        assert_eq!(run.workers[0].status, WorkerStatusValue::Passed);
    }
}
