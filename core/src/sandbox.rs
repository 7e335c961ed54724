//! Pure, unit-testable path derivation and validation for worker sandboxes
//! (spec.md §4.4). Kept separate from [`crate::sandbox_manager`] so the
//! naming rules can be tested without spawning git or touching a filesystem.
use crate::errors::SandboxError;
use crate::run::short_run_id;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Task IDs are consumed into filesystem paths and git refs; spec.md §4.4
/// mandates this validation run *before* any path/ref construction.
const TASK_ID_MAX_LEN: usize = 128;
static TASK_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Path-safe ids (run id, wave id) allow ASCII alphanumerics, `-`, `_`, `.`.
const PATH_SAFE_ID_MAX_LEN: usize = 256;
static PATH_SAFE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());

pub fn validate_task_id(task_id: &str) -> Result<(), SandboxError> {
    if task_id.is_empty() {
        return Err(SandboxError::InvalidTaskId(task_id.to_string(), "must be non-empty"));
    }
    if task_id.len() > TASK_ID_MAX_LEN {
        return Err(SandboxError::InvalidTaskId(
            task_id.to_string(),
            "must be at most 128 characters",
        ));
    }
    if task_id.starts_with('-') {
        return Err(SandboxError::InvalidTaskId(task_id.to_string(), "must not start with '-'"));
    }
    if !TASK_ID_RE.is_match(task_id) {
        return Err(SandboxError::InvalidTaskId(
            task_id.to_string(),
            "must match ^[A-Za-z0-9_-]+$",
        ));
    }
    Ok(())
}

pub fn validate_path_safe_id(id: &str) -> Result<(), SandboxError> {
    if id.is_empty() {
        return Err(SandboxError::InvalidPathSafeId(id.to_string(), "must be non-empty"));
    }
    if id.len() > PATH_SAFE_ID_MAX_LEN {
        return Err(SandboxError::InvalidPathSafeId(
            id.to_string(),
            "must be at most 256 characters",
        ));
    }
    if !PATH_SAFE_RE.is_match(id) {
        return Err(SandboxError::InvalidPathSafeId(
            id.to_string(),
            "must match ^[A-Za-z0-9_.-]+$",
        ));
    }
    Ok(())
}

/// Worker state dir: `<canonicalStateDir>/.runs/<runId>/workers/<taskId>`.
pub fn worker_state_dir(canonical_state_dir: &Path, run_id: &str, task_id: &str) -> Result<PathBuf, SandboxError> {
    validate_task_id(task_id)?;
    validate_path_safe_id(run_id)?;
    Ok(canonical_state_dir
        .join(".runs")
        .join(run_id)
        .join("workers")
        .join(task_id))
}

/// Worker worktree dir:
/// `<dataDir>/worktrees/<owner>/<repo>/issue-<N>-workers/<runId>/<taskId>`.
pub fn worktree_path(
    data_dir: &Path,
    owner: &str,
    repo: &str,
    issue_number: u64,
    run_id: &str,
    task_id: &str,
) -> Result<PathBuf, SandboxError> {
    validate_task_id(task_id)?;
    validate_path_safe_id(run_id)?;
    Ok(data_dir
        .join("worktrees")
        .join(owner)
        .join(repo)
        .join(format!("issue-{issue_number}-workers"))
        .join(run_id)
        .join(task_id))
}

/// Branch name for a task's worker sandbox:
/// `issue/<N>-<taskId>-<shortRunId>`.
pub fn branch_name(issue_number: u64, task_id: &str, run_id: &str) -> Result<String, SandboxError> {
    validate_task_id(task_id)?;
    validate_path_safe_id(run_id)?;
    let suffix = short_run_id(run_id);
    Ok(format!("issue/{issue_number}-{task_id}-{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_task_ids() {
        assert!(validate_task_id("T7").is_ok());
        assert!(validate_task_id("T142").is_ok());
        assert!(validate_task_id("task_7-alpha").is_ok());
    }

    #[test]
    fn rejects_malformed_task_ids() {
        assert!(validate_task_id("T7; rm -rf /").is_err());
        assert!(validate_task_id("../../etc").is_err());
        assert!(validate_task_id("").is_err());
        assert!(validate_task_id("-leading-dash").is_err());
    }

    #[test]
    fn task_id_length_boundary() {
        let at_limit = "a".repeat(128);
        assert!(validate_task_id(&at_limit).is_ok());
        let over_limit = "a".repeat(129);
        assert!(validate_task_id(&over_limit).is_err());
    }

    #[test]
    fn path_safe_id_length_boundary() {
        let at_limit = "a".repeat(256);
        assert!(validate_path_safe_id(&at_limit).is_ok());
        let over_limit = "a".repeat(257);
        assert!(validate_path_safe_id(&over_limit).is_err());
    }

    #[test]
    fn worker_state_dir_is_deterministic() {
        let root = Path::new("/data/issues/acme/widgets/7");
        let path = worker_state_dir(root, "run.2026-01-01.ab12cd34", "T7").unwrap();
        assert_eq!(
            path,
            root.join(".runs/run.2026-01-01.ab12cd34/workers/T7")
        );
    }

    #[test]
    fn worker_state_dir_rejects_path_traversal_in_task_id() {
        let root = Path::new("/data/issues/acme/widgets/7");
        assert!(worker_state_dir(root, "run.x.ab12cd34", "../escape").is_err());
    }

    #[test]
    fn worktree_path_matches_spec_layout() {
        let data_dir = Path::new("/data");
        let path = worktree_path(data_dir, "acme", "widgets", 42, "run.2026-01-01.ab12cd34", "T7").unwrap();
        assert_eq!(
            path,
            data_dir.join("worktrees/acme/widgets/issue-42-workers/run.2026-01-01.ab12cd34/T7")
        );
    }

    #[test]
    fn branch_name_includes_issue_task_and_short_run_id() {
        let branch = branch_name(42, "T7", "run.2026-01-01.ab12cd34").unwrap();
        assert_eq!(branch, "issue/42-T7-ab12cd34");
    }
}
