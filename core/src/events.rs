//! Shared event envelope for the event bus (C5), defined here in core so
//! both the phase runner (which publishes) and the daemon (which
//! broadcasts to subscribers) agree on the wire shape without a dependency
//! from core onto the daemon crate.
//!
//! Wire format: `{ event: <string>, data: <object> }`. The `event`
//! discriminant is one of the fixed kinds below; `data` is kind-specific.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum JeevesEvent {
    /// Full issue/run state snapshot, sent to every subscriber on connect
    /// and again on any subsequent mutation.
    State(StatePayload),
    /// Lines from the run's own log. `reset: true` marks a snapshot
    /// replacing any prior buffer the subscriber held.
    Logs(LogPayload),
    /// Lines intended for the viewer's own log pane, distinct from the
    /// run log (daemon-originated, e.g. connection notices).
    ViewerLogs(LogPayload),
    /// Log lines tagged with the originating worker task id.
    WorkerLogs(WorkerLogPayload),
    /// Worker sandbox lifecycle / SDK event, tagged with task id.
    WorkerSdk(WorkerSdkPayload),
    SdkInit(SdkPayload),
    SdkMessage(SdkPayload),
    SdkToolStart(SdkPayload),
    SdkToolComplete(SdkPayload),
    SdkComplete(SdkPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatePayload {
    pub issue_ref: String,
    pub phase: String,
    pub status: serde_json::Value,
    pub run_id: String,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub lines: Vec<String>,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerLogPayload {
    pub task_id: String,
    pub lines: Vec<String>,
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSdkPayload {
    pub task_id: String,
    pub kind: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkPayload {
    pub run_id: String,
    pub data: serde_json::Value,
}

/// Bound on replayed backlog handed to a late-connecting subscriber.
pub const MAX_REPLAY_LINES: usize = 500;

/// A ring buffer holding at most [`MAX_REPLAY_LINES`] of a single log
/// stream, used by tailers to seed a late subscriber's snapshot.
#[derive(Debug, Default, Clone)]
pub struct LogBacklog {
    lines: std::collections::VecDeque<String>,
}

impl LogBacklog {
    pub fn push(&mut self, line: String) {
        if self.lines.len() >= MAX_REPLAY_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_tag_and_content() {
        let event = JeevesEvent::Logs(LogPayload { lines: vec!["hi".into()], reset: true });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "logs");
        assert_eq!(json["data"]["reset"], true);
    }

    #[test]
    fn backlog_clamps_to_cap() {
        let mut backlog = LogBacklog::default();
        for i in 0..(MAX_REPLAY_LINES + 10) {
            backlog.push(format!("line-{i}"));
        }
        let snapshot = backlog.snapshot();
        assert_eq!(snapshot.len(), MAX_REPLAY_LINES);
        assert_eq!(snapshot[0], "line-10");
    }
}
