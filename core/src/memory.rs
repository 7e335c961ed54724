//! Memory entries: scoped key-value facts reinjected into subsequent prompts.
//!
//! Modeled as a single tagged union table keyed by `(scope, key)` with a
//! JSON-blob value, rather than one Rust type per scope — the scope drives
//! filtering and ordering during prompt assembly (see `phase_runner`), not
//! the storage shape.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    WorkingSet,
    Decisions,
    Session,
    CrossRun,
}

impl MemoryScope {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryScope::WorkingSet => "working_set",
            MemoryScope::Decisions => "decisions",
            MemoryScope::Session => "session",
            MemoryScope::CrossRun => "cross_run",
        }
    }

    /// Fixed prompt-assembly order (spec.md §4.3): Working Set, Decisions,
    /// Session Context, Cross-Run.
    pub fn prompt_order() -> [MemoryScope; 4] {
        [
            MemoryScope::WorkingSet,
            MemoryScope::Decisions,
            MemoryScope::Session,
            MemoryScope::CrossRun,
        ]
    }

    pub fn heading(self) -> &'static str {
        match self {
            MemoryScope::WorkingSet => "### Working Set (active)",
            MemoryScope::Decisions => "### Decisions (active)",
            MemoryScope::Session => "### Session Context",
            MemoryScope::CrossRun => "### Cross-Run Memory (relevant)",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub scope: MemoryScope,
    pub key: String,
    pub value: serde_json::Value,
    pub source_iteration: u64,
    #[serde(default)]
    pub stale: bool,
}

impl MemoryEntry {
    /// Whether this entry survives the scope-specific filter for `phase`
    /// during prompt assembly (spec.md §4.3).
    pub fn is_relevant_for(&self, phase: &str) -> bool {
        match self.scope {
            MemoryScope::WorkingSet | MemoryScope::Decisions => !self.stale,
            MemoryScope::Session => {
                !self.stale
                    && self
                        .key
                        .strip_prefix(phase)
                        .map(|rest| rest.starts_with(':'))
                        .unwrap_or(false)
            }
            MemoryScope::CrossRun => {
                !self.stale
                    && self
                        .value
                        .get("relevantPhases")
                        .and_then(|v| v.as_array())
                        .map(|phases| {
                            phases
                                .iter()
                                .any(|p| p.as_str() == Some(phase))
                        })
                        .unwrap_or(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(scope: MemoryScope, key: &str, value: serde_json::Value, stale: bool) -> MemoryEntry {
        MemoryEntry {
            scope,
            key: key.to_string(),
            value,
            source_iteration: 1,
            stale,
        }
    }

    #[test]
    fn working_set_excludes_stale() {
        let fresh = entry(MemoryScope::WorkingSet, "k", json!({}), false);
        let stale = entry(MemoryScope::WorkingSet, "k", json!({}), true);
        assert!(fresh.is_relevant_for("implement_task"));
        assert!(!stale.is_relevant_for("implement_task"));
    }

    #[test]
    fn session_filters_by_phase_prefix() {
        let mine = entry(MemoryScope::Session, "implement_task:focus", json!({}), false);
        let other = entry(MemoryScope::Session, "design_plan:focus", json!({}), false);
        assert!(mine.is_relevant_for("implement_task"));
        assert!(!other.is_relevant_for("implement_task"));
    }

    #[test]
    fn cross_run_filters_by_relevant_phases() {
        let mine = entry(
            MemoryScope::CrossRun,
            "carry-forward",
            json!({"relevantPhases": ["implement_task"]}),
            false,
        );
        let other = entry(
            MemoryScope::CrossRun,
            "carry-forward",
            json!({"relevantPhases": ["design_review"]}),
            false,
        );
        assert!(mine.is_relevant_for("implement_task"));
        assert!(!other.is_relevant_for("implement_task"));
    }
}
