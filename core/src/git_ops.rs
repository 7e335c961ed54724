//! Mutating git operations for worker sandbox isolation (C4).
//!
//! Worktree and branch administration shells out to the `git` binary rather
//! than going through `gix`: `gix` has no worktree-administration plumbing,
//! and the repository being mutated here is the user's own checkout, not a
//! library-managed object store. Read-only inspection (current commit,
//! branch name) lives in [`crate::git_inspect`] and does use `gix`.
use crate::errors::{SandboxError, SandboxResult};
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct GitOps {
    repo_root: PathBuf,
}

impl GitOps {
    pub fn new(repo_root: impl AsRef<Path>) -> Self {
        Self {
            repo_root: repo_root.as_ref().to_path_buf(),
        }
    }

    fn run(&self, args: &[&str]) -> SandboxResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(SandboxError::GitCommandFailed(format!(
                "git {}: {stderr}",
                args.join(" ")
            )))
        }
    }

    /// Create a branch at the current HEAD without checking it out.
    pub fn create_branch(&self, branch: &str) -> SandboxResult<()> {
        self.run(&["branch", branch])?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> SandboxResult<()> {
        self.run(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Add a worktree at `path` checked out to a new `branch`.
    pub fn worktree_add(&self, path: &Path, branch: &str) -> SandboxResult<()> {
        self.run(&[
            "worktree",
            "add",
            "-b",
            branch,
            &path.to_string_lossy(),
        ])
        .map_err(|_| SandboxError::WorktreeAttachFailed(path.display().to_string()))?;
        Ok(())
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.repo_root)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Create a fresh worker sandbox worktree on `branch`, forcibly reset to
    /// `reset_to`'s tip. Removes any pre-existing
    /// worktree at `path` first so a stale sandbox from a failed prior run
    /// never aliases the new one.
    pub fn worktree_create_reset(&self, path: &Path, branch: &str, reset_to: &str) -> SandboxResult<()> {
        if path.exists() {
            let _ = self.run(&["worktree", "remove", "--force", &path.to_string_lossy()]);
            let _ = std::fs::remove_dir_all(path);
        }
        if self.branch_exists(branch) {
            let _ = self.run(&["branch", "-D", branch]);
        }
        self.run(&["worktree", "add", "-B", branch, &path.to_string_lossy(), reset_to])
            .map_err(|_| SandboxError::WorktreeAttachFailed(path.display().to_string()))?;
        Ok(())
    }

    /// Reattach a worktree for a subsequent phase on the same task, *without*
    /// resetting the branch: `worktree add <dir> <branch>` with no `-B`.
    /// Reattachment failure is always fatal.
    pub fn worktree_attach_existing(&self, path: &Path, branch: &str) -> SandboxResult<()> {
        if !self.branch_exists(branch) {
            return Err(SandboxError::WorktreeAttachFailed(format!(
                "branch '{branch}' does not exist for reuse"
            )));
        }
        if path.exists() {
            let _ = self.run(&["worktree", "remove", "--force", &path.to_string_lossy()]);
            let _ = std::fs::remove_dir_all(path);
        }
        self.run(&["worktree", "add", &path.to_string_lossy(), branch])
            .map_err(|_| SandboxError::WorktreeAttachFailed(path.display().to_string()))?;
        Ok(())
    }

    /// Remove a worktree, forcing removal even with uncommitted changes
    /// (the sandbox is disposable scratch space, not a place a human works).
    pub fn worktree_remove(&self, path: &Path) -> SandboxResult<()> {
        self.run(&["worktree", "remove", "--force", &path.to_string_lossy()])?;
        Ok(())
    }

    pub fn worktree_prune(&self) -> SandboxResult<()> {
        self.run(&["worktree", "prune"])?;
        Ok(())
    }

    /// Absolute path to this worktree's own `info/exclude` file, used to
    /// register the `.jeeves` state-dir link so it never shows up as an
    /// untracked file.
    pub fn exclude_path_for_worktree(&self, worktree_dir: &Path) -> SandboxResult<PathBuf> {
        let output = Command::new("git")
            .args(["rev-parse", "--git-path", "info/exclude"])
            .current_dir(worktree_dir)
            .output()?;
        if !output.status.success() {
            return Err(SandboxError::GitCommandFailed(
                "rev-parse --git-path info/exclude".to_string(),
            ));
        }
        let rel = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(worktree_dir.join(rel))
    }

    pub fn commit_all(&self, message: &str) -> SandboxResult<Option<String>> {
        if !self.has_changes()? {
            return Ok(None);
        }
        self.run(&["add", "-A"])?;
        self.run(&["commit", "-m", message])?;
        Ok(Some(self.run(&["rev-parse", "HEAD"])?))
    }

    pub fn has_changes(&self) -> SandboxResult<bool> {
        let output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&self.repo_root)
            .output()?;
        Ok(output.status.success() && !output.stdout.is_empty())
    }

    pub fn diff(&self, from: &str, to: &str) -> SandboxResult<String> {
        self.run(&["diff", from, to])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        fs::write(dir.path().join("README.md"), "hello").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn worktree_add_and_remove_round_trips() {
        let repo = init_repo();
        let ops = GitOps::new(repo.path());
        let worktree_dir = std::fs::canonicalize(repo.path())
            .unwrap()
            .parent()
            .unwrap()
            .join("sandbox-worktree");

        ops.worktree_add(&worktree_dir, "task/T1-run").unwrap();
        assert!(worktree_dir.join("README.md").exists());

        ops.worktree_remove(&worktree_dir).unwrap();
        assert!(!worktree_dir.exists());

        ops.delete_branch("task/T1-run").unwrap();
    }

    #[test]
    fn commit_all_is_noop_with_no_changes() {
        let repo = init_repo();
        let ops = GitOps::new(repo.path());
        assert_eq!(ops.commit_all("no-op checkpoint").unwrap(), None);
    }

    #[test]
    fn commit_all_commits_pending_changes() {
        let repo = init_repo();
        let ops = GitOps::new(repo.path());
        fs::write(repo.path().join("new.txt"), "data").unwrap();
        let commit = ops.commit_all("checkpoint").unwrap();
        assert!(commit.is_some());
        assert!(!ops.has_changes().unwrap());
    }
}
