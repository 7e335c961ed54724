//! PAT materialization into worker worktrees (spec.md §6): a provider's
//! environment gets `<worktree>/.env.jeeves` with whatever PAT is on file
//! for the issue's `owner/repo`. Secret values never appear in logs, events,
//! or status records — only `has_pat` and timestamps are observable.
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::errors::SandboxError;

/// Reads PATs from flat files under a configured directory (the
/// `[secrets]` table's `dir`, §6). One file per `owner/repo`, content is the
/// token verbatim with surrounding whitespace trimmed.
pub struct SecretsStore {
    dir: PathBuf,
}

/// What a caller is allowed to observe about a secret lookup: never the
/// value itself.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SecretPresence {
    pub has_pat: bool,
}

impl SecretsStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn pat_path(&self, owner: &str, repo: &str) -> PathBuf {
        self.dir.join(owner).join(format!("{repo}.pat"))
    }

    /// Read the PAT on file for `owner/repo`, if any. Missing file is not an
    /// error — most repos run without one.
    pub fn load_pat(&self, owner: &str, repo: &str) -> std::io::Result<Option<String>> {
        match std::fs::read_to_string(self.pat_path(owner, repo)) {
            Ok(contents) => {
                let trimmed = contents.trim();
                Ok(if trimmed.is_empty() { None } else { Some(trimmed.to_string()) })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn presence(&self, owner: &str, repo: &str) -> std::io::Result<SecretPresence> {
        Ok(SecretPresence { has_pat: self.load_pat(owner, repo)?.is_some() })
    }

    /// Write `<worktree>/.env.jeeves` for a provider that reads its PAT from
    /// the environment. No file is written when there is no PAT on file, so
    /// a worktree without one simply has no `.env.jeeves`. Returns whether a
    /// PAT was present — never the token itself, so callers can log/report
    /// `has_pat` without risking the value.
    pub fn materialize_env_file(&self, worktree_dir: &Path, owner: &str, repo: &str) -> Result<bool, SandboxError> {
        let Some(pat) = self.load_pat(owner, repo)? else {
            return Ok(false);
        };

        let path = worktree_dir.join(".env.jeeves");
        let nonce = std::process::id() as u64 ^ (pat.len() as u64).wrapping_mul(2654435761);
        let tmp = path.with_extension(format!("tmp.{nonce:x}"));
        std::fs::write(&tmp, format!("JEEVES_GITHUB_PAT={pat}\n"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_pat_file_reports_no_pat() {
        let dir = tempdir().unwrap();
        let store = SecretsStore::new(dir.path().to_path_buf());
        assert!(!store.presence("acme", "widgets").unwrap().has_pat);
    }

    #[test]
    fn materializes_env_file_when_pat_present() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("acme")).unwrap();
        std::fs::write(dir.path().join("acme/widgets.pat"), "ghp_secretvalue\n").unwrap();
        let store = SecretsStore::new(dir.path().to_path_buf());

        let worktree = tempdir().unwrap();
        let wrote = store.materialize_env_file(worktree.path(), "acme", "widgets").unwrap();
        assert!(wrote);

        let contents = std::fs::read_to_string(worktree.path().join(".env.jeeves")).unwrap();
        assert_eq!(contents, "JEEVES_GITHUB_PAT=ghp_secretvalue\n");
        assert!(store.presence("acme", "widgets").unwrap().has_pat);
    }

    #[test]
    fn no_env_file_written_without_a_pat_on_file() {
        let dir = tempdir().unwrap();
        let store = SecretsStore::new(dir.path().to_path_buf());
        let worktree = tempdir().unwrap();
        let wrote = store.materialize_env_file(worktree.path(), "acme", "widgets").unwrap();
        assert!(!wrote);
        assert!(!worktree.path().join(".env.jeeves").exists());
    }
}
