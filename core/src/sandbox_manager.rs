//! Worker sandbox manager (C4): fans a workflow phase out across one git
//! worktree per ready task, running each task's phase in an isolated
//! checkout with its own miniature copy of the canonical state dir.
//!
//! Worktree `add`/`remove` are serialized per repository root behind a
//! [`tokio::sync::Mutex`] — `git worktree` mutates shared repository
//! metadata (`.git/worktrees/`) and two concurrent `add`s racing against
//! the same repo can corrupt that state.
use crate::errors::{SandboxError, SandboxResult};
use crate::git_ops::GitOps;
use crate::issue::Issue;
use crate::run::PhaseKind;
use crate::sandbox::{branch_name, worker_state_dir, worktree_path};
use crate::secrets::SecretsStore;
use crate::state_store::write_json_atomic;
use crate::task::{Task, TaskList};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Status flags cleared on a fresh worker copy of the issue record: the
/// worker's task loop must not inherit the parent run's prior-task outcome.
const TASK_LOOP_STATUS_FLAGS: &[&str] = &[
    "taskPassed",
    "taskFailed",
    "commitFailed",
    "pushFailed",
    "hasMoreTasks",
    "allTasksComplete",
];

/// One task's materialized sandbox: a worktree directory checked out onto a
/// dedicated branch, with its own state dir linked in as `.jeeves`.
#[derive(Debug, Clone)]
pub struct WorkerSandbox {
    pub task_id: String,
    pub run_id: String,
    pub state_dir: PathBuf,
    pub worktree_dir: PathBuf,
    pub branch: String,
}

/// The fixed keys a sandbox's paths are derived from.
pub struct SandboxContext<'a> {
    pub run_id: &'a str,
    pub issue_number: u64,
    pub owner: &'a str,
    pub repo: &'a str,
    pub canonical_state_dir: &'a Path,
    pub canonical_branch: &'a str,
}

impl WorkerSandbox {
    fn completion_marker_path(&self, phase: PhaseKind) -> PathBuf {
        self.state_dir.join(marker_file_name(phase))
    }
}

fn marker_file_name(phase: PhaseKind) -> &'static str {
    match phase {
        PhaseKind::ImplementTask => "implement_task.done",
        PhaseKind::TaskSpecCheck => "task_spec_check.done",
    }
}

pub struct SandboxManager {
    repo_root: PathBuf,
    data_dir: PathBuf,
    repo_lock: Arc<Mutex<()>>,
    secrets: Option<SecretsStore>,
}

impl SandboxManager {
    pub fn new(repo_root: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            repo_root,
            data_dir,
            repo_lock: Arc::new(Mutex::new(())),
            secrets: None,
        }
    }

    /// Attach a PAT source; sandboxes created/reused afterward get
    /// `<worktree>/.env.jeeves` materialized when a PAT is on file for the
    /// issue's `owner/repo`.
    pub fn with_secrets(mut self, secrets: SecretsStore) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Write `.env.jeeves` into `worktree_dir` when a PAT is on file.
    /// Logs only the boolean outcome, never the token.
    fn materialize_secrets(&self, worktree_dir: &Path, owner: &str, repo: &str) -> SandboxResult<()> {
        let Some(secrets) = &self.secrets else { return Ok(()) };
        let has_pat = secrets.materialize_env_file(worktree_dir, owner, repo)?;
        tracing::debug!(owner, repo, has_pat, "materialized worker secrets");
        Ok(())
    }

    fn derive(&self, task_id: &str, ctx: &SandboxContext<'_>) -> SandboxResult<(PathBuf, PathBuf, String)> {
        let state_dir = worker_state_dir(ctx.canonical_state_dir, ctx.run_id, task_id)?;
        let worktree_dir = worktree_path(
            &self.data_dir,
            ctx.owner,
            ctx.repo,
            ctx.issue_number,
            ctx.run_id,
            task_id,
        )?;
        let branch = branch_name(ctx.issue_number, task_id, ctx.run_id)?;
        Ok((state_dir, worktree_dir, branch))
    }

    /// Materialize a state dir for `task`: a modified copy of `issue` with
    /// `currentTaskId` set and the task-loop status flags cleared, plus a
    /// verbatim copy of `tasks`, plus an optional retry feedback note.
    fn write_worker_state(
        &self,
        state_dir: &Path,
        task_id: &str,
        issue: &Issue,
        tasks: &TaskList,
        feedback_note: Option<&str>,
    ) -> SandboxResult<()> {
        std::fs::create_dir_all(state_dir)?;

        let mut worker_issue = issue.clone();
        worker_issue
            .status
            .insert("currentTaskId".to_string(), Value::String(task_id.to_string()));
        for flag in TASK_LOOP_STATUS_FLAGS {
            worker_issue.status.remove(*flag);
        }
        write_json_atomic(&state_dir.join("issue.json"), &worker_issue)?;
        write_json_atomic(&state_dir.join("tasks.json"), tasks)?;

        if let Some(note) = feedback_note {
            let path = state_dir.join("feedback.md");
            let nonce = std::process::id() as u64 ^ (note.len() as u64).wrapping_mul(2654435761);
            let tmp = path.with_extension(format!("tmp.{nonce:x}"));
            std::fs::write(&tmp, note)?;
            std::fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    /// Link `.jeeves` inside the worktree to the worker's state dir and
    /// register it in the worktree's own git exclude file, so it never
    /// shows up as an untracked file.
    fn link_jeeves_dir(&self, worktree_dir: &Path, state_dir: &Path) -> SandboxResult<()> {
        let link_path = worktree_dir.join(".jeeves");
        if link_path.exists() || link_path.symlink_metadata().is_ok() {
            let _ = std::fs::remove_dir_all(&link_path);
            let _ = std::fs::remove_file(&link_path);
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(state_dir, &link_path)?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_dir(state_dir, &link_path)?;

        let ops = GitOps::new(&self.repo_root);
        let exclude_path = ops.exclude_path_for_worktree(worktree_dir)?;
        if let Some(parent) = exclude_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let existing = std::fs::read_to_string(&exclude_path).unwrap_or_default();
        if !existing.lines().any(|l| l.trim() == ".jeeves") {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&exclude_path)?;
            if !existing.is_empty() && !existing.ends_with('\n') {
                writeln!(file)?;
            }
            writeln!(file, ".jeeves")?;
        }
        Ok(())
    }

    /// Create a fresh sandbox for `task`: state dir prepared, worktree
    /// forcibly reset to the canonical branch tip, `.jeeves` linked and
    /// excluded.
    pub async fn create(
        &self,
        task: &Task,
        issue: &Issue,
        tasks: &TaskList,
        ctx: &SandboxContext<'_>,
        feedback_note: Option<&str>,
    ) -> SandboxResult<WorkerSandbox> {
        let (state_dir, worktree_dir, branch) = self.derive(&task.id, ctx)?;
        self.write_worker_state(&state_dir, &task.id, issue, tasks, feedback_note)?;

        let _guard = self.repo_lock.lock().await;
        let repo_root = self.repo_root.clone();
        let worktree_dir_clone = worktree_dir.clone();
        let branch_clone = branch.clone();
        let reset_to = ctx.canonical_branch.to_string();
        tokio::task::spawn_blocking(move || {
            let ops = GitOps::new(&repo_root);
            ops.worktree_create_reset(&worktree_dir_clone, &branch_clone, &reset_to)
        })
        .await
        .map_err(|e| SandboxError::WorktreeAttachFailed(e.to_string()))??;

        self.link_jeeves_dir(&worktree_dir, &state_dir)?;
        self.materialize_secrets(&worktree_dir, ctx.owner, ctx.repo)?;

        Ok(WorkerSandbox {
            task_id: task.id.clone(),
            run_id: ctx.run_id.to_string(),
            state_dir,
            worktree_dir,
            branch,
        })
    }

    /// Reattach an existing sandbox for a subsequent phase on the same
    /// task (e.g. spec-check after implement). Never resets the branch;
    /// reattach failure is always fatal.
    pub async fn reuse(&self, task: &Task, ctx: &SandboxContext<'_>) -> SandboxResult<WorkerSandbox> {
        let (state_dir, worktree_dir, branch) = self.derive(&task.id, ctx)?;
        if !state_dir.is_dir() {
            return Err(SandboxError::WorktreeAttachFailed(format!(
                "worker state dir missing for reuse: {}",
                state_dir.display()
            )));
        }

        let _guard = self.repo_lock.lock().await;
        let repo_root = self.repo_root.clone();
        let worktree_dir_clone = worktree_dir.clone();
        let branch_clone = branch.clone();
        tokio::task::spawn_blocking(move || {
            let ops = GitOps::new(&repo_root);
            ops.worktree_attach_existing(&worktree_dir_clone, &branch_clone)
        })
        .await
        .map_err(|e| SandboxError::WorktreeAttachFailed(e.to_string()))??;

        self.link_jeeves_dir(&worktree_dir, &state_dir)?;
        self.materialize_secrets(&worktree_dir, ctx.owner, ctx.repo)?;

        Ok(WorkerSandbox {
            task_id: task.id.clone(),
            run_id: ctx.run_id.to_string(),
            state_dir,
            worktree_dir,
            branch,
        })
    }

    /// Create every ready task's sandbox concurrently, returning those that
    /// succeeded keyed by task id. A task whose create fails is omitted,
    /// not fatal to the others — the caller decides how to react to a
    /// partial fan-out.
    pub async fn create_all<'a>(
        &self,
        tasks: &'a [&'a Task],
        issue: &Issue,
        task_list: &TaskList,
        ctx: &SandboxContext<'_>,
    ) -> HashMap<String, SandboxResult<WorkerSandbox>> {
        let mut results = HashMap::new();
        let futures = tasks
            .iter()
            .map(|task| async move { (task.id.clone(), self.create(task, issue, task_list, ctx, None).await) });
        for (task_id, result) in futures::future::join_all(futures).await {
            results.insert(task_id, result);
        }
        results
    }

    /// Write this phase's completion marker atomically (write-temp +
    /// rename), zero bytes.
    pub fn mark_complete(&self, sandbox: &WorkerSandbox, phase: PhaseKind) -> SandboxResult<()> {
        let path = sandbox.completion_marker_path(phase);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let nonce = std::process::id() as u64 ^ (phase as u64).wrapping_mul(2654435761) ^ 0xA5A5;
        let tmp = path.with_extension(format!("tmp.{nonce:x}"));
        std::fs::File::create(&tmp)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn is_complete(&self, sandbox: &WorkerSandbox, phase: PhaseKind) -> bool {
        sandbox.completion_marker_path(phase).exists()
    }

    /// A parent phase succeeds only if every sandbox produced its marker.
    pub fn all_complete(&self, sandboxes: &[WorkerSandbox], phase: PhaseKind) -> bool {
        !sandboxes.is_empty() && sandboxes.iter().all(|s| self.is_complete(s, phase))
    }

    /// Success cleanup: forcibly remove the worktree, delete the worker
    /// branch, retain the state dir for observability.
    pub async fn cleanup_success(&self, sandbox: &WorkerSandbox) -> SandboxResult<()> {
        let _guard = self.repo_lock.lock().await;
        let repo_root = self.repo_root.clone();
        let worktree_dir = sandbox.worktree_dir.clone();
        let branch = sandbox.branch.clone();
        tokio::task::spawn_blocking(move || {
            let ops = GitOps::new(&repo_root);
            ops.worktree_remove(&worktree_dir)?;
            ops.delete_branch(&branch)
        })
        .await
        .map_err(|e| SandboxError::WorktreeAttachFailed(e.to_string()))??;
        Ok(())
    }

    /// Failure/timeout cleanup: retain everything for debugging. Exists so
    /// call sites can express intent explicitly rather than simply
    /// skipping the success path.
    pub async fn cleanup_failure(&self, _sandbox: &WorkerSandbox) -> SandboxResult<()> {
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
