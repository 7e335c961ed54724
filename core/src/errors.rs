//! Error types for the Jeeves execution engine.
use thiserror::Error;

/// Errors from the JSON/SQLite state store (C1).
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("issue record not found at {0}")]
    IssueNotFound(String),

    #[error("corrupt JSON at {path}: {source}")]
    CorruptJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("relational mirror unavailable: {0}")]
    MirrorUnavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("task id {0} is not present in the task list")]
    UnknownTaskId(String),

    #[error("dependency cycle detected among tasks: {0:?}")]
    CyclicDependency(Vec<String>),
}

pub type StateStoreResult<T> = Result<T, StateStoreError>;

/// Errors from the workflow interpreter (C2).
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error("predicate evaluation failed: {0}")]
    PredicateError(String),

    #[error("workflow definition invalid: {0}")]
    InvalidDefinition(String),

    #[error("run stalled: {consecutive_self_loops} consecutive self-loops on phase {phase} without a status mutation")]
    Stalled {
        phase: String,
        consecutive_self_loops: u32,
    },

    #[error("exceeded max_iterations ({0})")]
    MaxIterations(u32),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors from the phase runner (C3).
#[derive(Error, Debug)]
pub enum PhaseRunnerError {
    #[error("provider process error: {0}")]
    ProviderError(String),

    #[error("required MCP server(s) missing: {0:?}")]
    McpMissing(Vec<String>),

    #[error("inactivity timeout after {0:?}")]
    InactivityTimeout(std::time::Duration),

    #[error("iteration wallclock timeout after {0:?}")]
    IterationTimeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store error: {0}")]
    StateStore(#[from] StateStoreError),
}

pub type PhaseRunnerResult<T> = Result<T, PhaseRunnerError>;

/// Errors from the worker sandbox manager (C4).
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("invalid task id '{0}': {1}")]
    InvalidTaskId(String, &'static str),

    #[error("invalid path-safe id '{0}': {1}")]
    InvalidPathSafeId(String, &'static str),

    #[error("git command failed: {0}")]
    GitCommandFailed(String),

    #[error("worktree attach failed for {0}")]
    WorktreeAttachFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors from the event bus (C5); the bus itself rarely fails, but the
/// tailers that feed it can.
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("IO error watching {path}: {source}")]
    TailerIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON decode error watching {path}: {source}")]
    TailerJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type EventBusResult<T> = Result<T, EventBusError>;

/// Top-level error wrapping every component's error for the run driver.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    PhaseRunner(#[from] PhaseRunnerError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    EventBus(#[from] EventBusError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Completion reason recorded on a run and mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    WorkflowComplete,
    MaxIterations,
    Stalled,
    McpMissing,
    WorkflowInvalid,
    UncaughtError,
}

impl CompletionReason {
    /// Process exit code for this completion reason (spec.md §6).
    pub fn exit_code(self) -> i32 {
        match self {
            CompletionReason::WorkflowComplete => 0,
            CompletionReason::MaxIterations => 1,
            CompletionReason::Stalled => 2,
            CompletionReason::McpMissing => 3,
            CompletionReason::WorkflowInvalid => 4,
            CompletionReason::UncaughtError => 5,
        }
    }
}

/// Truncate and sanitize an error message before it is persisted as
/// `last_error` on the run record. Never leaks secret values; callers are
/// responsible for not passing raw secrets into the message in the first
/// place.
pub fn sanitize_error_message(message: &str) -> String {
    const MAX_LEN: usize = 2048;
    let cleaned: String = message
        .chars()
        .map(|c| if c.is_control() && c != '\n' { ' ' } else { c })
        .collect();
    if cleaned.len() > MAX_LEN {
        let mut truncated = cleaned.chars().take(MAX_LEN).collect::<String>();
        truncated.push_str("...[truncated]");
        truncated
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_messages() {
        let long = "a".repeat(3000);
        let sanitized = sanitize_error_message(&long);
        assert!(sanitized.len() < 3000);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn replaces_control_characters() {
        let msg = "line1\x07line2\ttab\nline3";
        let sanitized = sanitize_error_message(msg);
        assert!(!sanitized.contains('\x07'));
        assert!(sanitized.contains('\n'));
    }

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(CompletionReason::WorkflowComplete.exit_code(), 0);
        assert_ne!(CompletionReason::MaxIterations.exit_code(), 0);
        assert_ne!(CompletionReason::Stalled.exit_code(), 0);
    }
}
