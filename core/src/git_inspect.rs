//! Read-only git introspection via `gix`: current commit, current branch,
//! and basic commit metadata. Mutating operations (worktrees, branches,
//! commits) live in [`crate::git_ops`] and shell out to the `git` binary —
//! `gix` is used here only where a library call suffices.
use crate::errors::{SandboxError, SandboxResult};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: i64,
}

pub struct GitInspector {
    repo: gix::Repository,
}

impl GitInspector {
    pub fn open(repo_path: &Path) -> SandboxResult<Self> {
        let repo = gix::open(repo_path)
            .map_err(|e| SandboxError::GitCommandFailed(format!("not a git repository: {e}")))?;
        Ok(Self { repo })
    }

    pub fn current_commit(&self) -> SandboxResult<String> {
        let head = self
            .repo
            .head_id()
            .map_err(|e| SandboxError::GitCommandFailed(format!("no HEAD commit: {e}")))?;
        Ok(head.to_string())
    }

    pub fn current_branch(&self) -> SandboxResult<Option<String>> {
        let head_ref = self
            .repo
            .head_name()
            .map_err(|e| SandboxError::GitCommandFailed(format!("failed to read HEAD: {e}")))?;
        Ok(head_ref.map(|name| name.shorten().to_string()))
    }

    pub fn commit_info(&self, commit_hash: &str) -> SandboxResult<CommitInfo> {
        let oid = self
            .repo
            .rev_parse_single(commit_hash)
            .map_err(|e| SandboxError::GitCommandFailed(format!("unknown revision '{commit_hash}': {e}")))?;
        let commit = oid
            .object()
            .map_err(|e| SandboxError::GitCommandFailed(e.to_string()))?
            .try_into_commit()
            .map_err(|e| SandboxError::GitCommandFailed(e.to_string()))?;
        let message = commit
            .message()
            .map_err(|e| SandboxError::GitCommandFailed(e.to_string()))?
            .title
            .to_string();
        let author = commit
            .author()
            .map_err(|e| SandboxError::GitCommandFailed(e.to_string()))?;
        let hash = commit.id.to_string();
        Ok(CommitInfo {
            short_hash: hash.chars().take(8).collect(),
            hash,
            message,
            author_name: author.name.to_string(),
            author_email: author.email.to_string(),
            timestamp: author.time()
                .map(|t| t.seconds)
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
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
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-m", "initial commit"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn reads_current_commit_and_branch() {
        let repo = init_repo();
        let inspector = GitInspector::open(repo.path()).unwrap();
        let commit = inspector.current_commit().unwrap();
        assert_eq!(commit.len(), 40);
        assert!(inspector.current_branch().unwrap().is_some());
    }

    #[test]
    fn reads_commit_metadata() {
        let repo = init_repo();
        let inspector = GitInspector::open(repo.path()).unwrap();
        let head = inspector.current_commit().unwrap();
        let info = inspector.commit_info(&head).unwrap();
        assert_eq!(info.message, "initial commit");
        assert_eq!(info.author_email, "test@example.com");
    }
}
