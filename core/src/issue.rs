//! The issue record: the root of one issue's persisted state.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Which source-control provider an issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueProvider {
    Github,
    AzureDevops,
}

/// The open-ended status mapping that is the sole medium the agent uses to
/// signal phase transitions. Keys are arbitrary field names (`designApproved`,
/// `taskPassed`, `currentTaskId`, ...); values are JSON scalars.
pub type StatusMap = BTreeMap<String, Value>;

/// The root of one issue's state (`S/issue.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub repo: RepoCoordinate,
    pub issue: u64,
    pub title: String,
    pub provider: IssueProvider,
    pub branch: String,
    pub workflow: String,
    pub phase: String,
    #[serde(default)]
    pub status: StatusMap,
    /// Present for forward-compatible document detection; bumped only on a
    /// breaking on-disk format change.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_schema_version() -> u32 {
    1
}

/// `owner/repo` coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCoordinate {
    pub owner: String,
    pub repo: String,
}

impl RepoCoordinate {
    pub fn as_slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl Issue {
    /// Merge-update the status mapping. Only the keys present in `updates`
    /// are touched; a `null` value deletes the key. An empty `updates` map
    /// is a no-op, so retried status updates are always safe to replay.
    pub fn apply_status_update(&mut self, updates: StatusMap) {
        for (key, value) in updates {
            if value.is_null() {
                self.status.remove(&key);
            } else {
                self.status.insert(key, value);
            }
        }
    }

    /// Convenience accessor used by the workflow interpreter's predicate
    /// evaluator: `status.<field>` lookups bottom out here.
    pub fn status_field(&self, field: &str) -> Option<&Value> {
        self.status.get(field)
    }
}
