//! JSON-file state store (C1): JSON-on-disk is authoritative, SQLite is a
//! disposable relational mirror rebuilt from the JSON tree on open.
//!
//! This inverts the usual relationship seen in most of our services (SQLite
//! as the durable store, JSON as wire format): the JSON tree under
//! `data_dir` is the thing a human or a git diff can inspect directly, with
//! SQLite existing purely to make cross-issue queries (list running runs,
//! search tasks) cheap. Losing the mirror is never data loss; it is
//! rebuilt lazily the next time it's opened.
use crate::errors::{StateStoreError, StateStoreResult};
use crate::issue::Issue;
use crate::memory::MemoryEntry;
use crate::run::RunRecord;
use crate::task::TaskList;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Atomically write `value` as pretty JSON to `path`: serialize to a
/// sibling temp file, fsync it, then rename over the target. A reader never
/// observes a partially-written file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StateStoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StateStoreError::CorruptJson {
        path: path.display().to_string(),
        source,
    })?;
    let nonce: u64 = std::process::id() as u64 ^ (bytes.len() as u64).wrapping_mul(2654435761);
    let tmp_path = path.with_extension(format!("tmp.{nonce:x}"));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> StateStoreResult<T> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| StateStoreError::CorruptJson {
        path: path.display().to_string(),
        source,
    })
}

/// Remove any `*.tmp.*` files left behind by a writer that crashed between
/// `File::create` and `rename`. Safe to call at any time; a stale temp file
/// never aliases a live write because the nonce is derived from content.
pub fn sweep_stale_temp_files(dir: &Path) -> StateStoreResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            sweep_stale_temp_files(&path)?;
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.contains(".tmp.") {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
    Ok(())
}

/// Layout of one issue's JSON documents under `data_dir/issues/<owner>/<repo>/<issue>/`.
pub struct IssuePaths {
    root: PathBuf,
}

impl IssuePaths {
    pub fn new(data_dir: &Path, owner: &str, repo: &str, issue: u64) -> Self {
        Self {
            root: data_dir
                .join("issues")
                .join(owner)
                .join(repo)
                .join(issue.to_string()),
        }
    }

    pub fn issue_json(&self) -> PathBuf {
        self.root.join("issue.json")
    }

    pub fn tasks_json(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    pub fn memory_json(&self) -> PathBuf {
        self.root.join("memory.json")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn last_run_log(&self) -> PathBuf {
        self.root.join("last-run.log")
    }

    pub fn sdk_output_json(&self) -> PathBuf {
        self.root.join("sdk-output.json")
    }

    pub fn task_plan_md(&self) -> PathBuf {
        self.root.join("task-plan.md")
    }

    pub fn progress_txt(&self) -> PathBuf {
        self.root.join("progress.txt")
    }
}

/// JSON-backed state store for one `data_dir`. Owns the disposable SQLite
/// mirror alongside it.
pub struct JsonStateStore {
    data_dir: PathBuf,
    mirror: SqliteStateStore,
}

impl JsonStateStore {
    pub async fn open(data_dir: PathBuf) -> StateStoreResult<Self> {
        std::fs::create_dir_all(&data_dir)?;
        sweep_stale_temp_files(&data_dir)?;
        let mirror = SqliteStateStore::open(&data_dir.join("mirror.sqlite3")).await?;
        Ok(Self { data_dir, mirror })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn load_issue(&self, owner: &str, repo: &str, issue: u64) -> StateStoreResult<Issue> {
        let path = IssuePaths::new(&self.data_dir, owner, repo, issue).issue_json();
        if !path.exists() {
            return Err(StateStoreError::IssueNotFound(path.display().to_string()));
        }
        read_json(&path)
    }

    pub async fn save_issue(&self, owner: &str, repo: &str, issue: &Issue) -> StateStoreResult<()> {
        let paths = IssuePaths::new(&self.data_dir, owner, repo, issue.issue);
        write_json_atomic(&paths.issue_json(), issue)?;
        self.mirror.upsert_issue(issue).await?;
        Ok(())
    }

    pub fn load_tasks(&self, owner: &str, repo: &str, issue: u64) -> StateStoreResult<TaskList> {
        let path = IssuePaths::new(&self.data_dir, owner, repo, issue).tasks_json();
        if !path.exists() {
            return Ok(TaskList::new());
        }
        read_json(&path)
    }

    pub async fn save_tasks(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        tasks: &TaskList,
    ) -> StateStoreResult<()> {
        tasks
            .validate()
            .map_err(|e| StateStoreError::Database(e.to_string()))?;
        let paths = IssuePaths::new(&self.data_dir, owner, repo, issue);
        write_json_atomic(&paths.tasks_json(), tasks)?;
        self.mirror.upsert_tasks(owner, repo, issue, tasks).await?;
        Ok(())
    }

    pub fn load_memory(&self, owner: &str, repo: &str, issue: u64) -> StateStoreResult<Vec<MemoryEntry>> {
        let path = IssuePaths::new(&self.data_dir, owner, repo, issue).memory_json();
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path)
    }

    pub fn save_memory(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        entries: &[MemoryEntry],
    ) -> StateStoreResult<()> {
        let paths = IssuePaths::new(&self.data_dir, owner, repo, issue);
        write_json_atomic(&paths.memory_json(), entries)
    }

    /// Insert or replace the entry at `(scope, key)`, refreshing
    /// `source_iteration` and clearing `stale` (spec.md §4.1).
    pub fn upsert_memory(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        scope: crate::memory::MemoryScope,
        key: &str,
        value: serde_json::Value,
        source_iteration: u64,
    ) -> StateStoreResult<()> {
        let mut entries = self.load_memory(owner, repo, issue)?;
        match entries.iter_mut().find(|e| e.scope == scope && e.key == key) {
            Some(existing) => {
                existing.value = value;
                existing.source_iteration = source_iteration;
                existing.stale = false;
            }
            None => entries.push(MemoryEntry {
                scope,
                key: key.to_string(),
                value,
                source_iteration,
                stale: false,
            }),
        }
        self.save_memory(owner, repo, issue, &entries)
    }

    /// Idempotent: a second call on an already-stale entry leaves
    /// `source_iteration` untouched. A no-op if the key is absent.
    pub fn mark_memory_stale(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        scope: crate::memory::MemoryScope,
        key: &str,
    ) -> StateStoreResult<()> {
        let mut entries = self.load_memory(owner, repo, issue)?;
        if let Some(existing) = entries.iter_mut().find(|e| e.scope == scope && e.key == key) {
            existing.stale = true;
        }
        self.save_memory(owner, repo, issue, &entries)
    }

    pub fn delete_memory(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        scope: crate::memory::MemoryScope,
        key: &str,
    ) -> StateStoreResult<()> {
        let mut entries = self.load_memory(owner, repo, issue)?;
        entries.retain(|e| !(e.scope == scope && e.key == key));
        self.save_memory(owner, repo, issue, &entries)
    }

    /// Read memory entries, optionally restricted to one `scope` and
    /// optionally excluding stale entries (the prompt-assembly path always
    /// loads everything and lets [`crate::phase_runner::assemble_prompt`]
    /// apply the scope-specific relevance filter instead).
    pub fn get_memory(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        scope: Option<crate::memory::MemoryScope>,
        include_stale: bool,
    ) -> StateStoreResult<Vec<MemoryEntry>> {
        let entries = self.load_memory(owner, repo, issue)?;
        Ok(entries
            .into_iter()
            .filter(|e| scope.map(|s| s == e.scope).unwrap_or(true))
            .filter(|e| include_stale || !e.stale)
            .collect())
    }

    pub fn progress_txt_path(&self, owner: &str, repo: &str, issue: u64) -> PathBuf {
        IssuePaths::new(&self.data_dir, owner, repo, issue).progress_txt()
    }

    /// Append one entry to `progress.txt`: a leading newline is written
    /// first only if the file is already non-empty, and the file is never
    /// rewritten in place (spec.md §4.1).
    pub fn append_progress(&self, owner: &str, repo: &str, issue: u64, entry: &str) -> StateStoreResult<()> {
        use std::io::Write;
        let path = self.progress_txt_path(owner, repo, issue);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let needs_leading_newline = path.exists() && path.metadata().map(|m| m.len() > 0).unwrap_or(false);
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
        if needs_leading_newline {
            file.write_all(b"\n")?;
        }
        file.write_all(entry.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn run_json_path(&self, run_id: &str) -> PathBuf {
        self.data_dir.join("runs").join(format!("{run_id}.json"))
    }

    pub fn load_run(&self, run_id: &str) -> StateStoreResult<RunRecord> {
        read_json(&self.run_json_path(run_id))
    }

    pub async fn save_run(&self, run: &RunRecord) -> StateStoreResult<()> {
        write_json_atomic(&self.run_json_path(&run.run_id), run)?;
        self.mirror.upsert_run(run).await?;
        Ok(())
    }

    pub async fn list_running(&self) -> StateStoreResult<Vec<String>> {
        self.mirror.list_running_run_ids().await
    }
}

/// Disposable SQLite mirror. Every table is derived from the JSON tree and
/// may be dropped and rebuilt without loss.
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn open(db_path: &Path) -> StateStoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let connect_options = SqliteConnectOptions::from_str(&db_path.to_string_lossy())
            .map_err(|e| StateStoreError::MirrorUnavailable(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_with(connect_options)
            .await
            .map_err(|e| StateStoreError::MirrorUnavailable(e.to_string()))?;
        let store = Self { pool };
        store.apply_migrations().await?;
        Ok(store)
    }

    async fn apply_migrations(&self) -> StateStoreResult<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS migrations (
                version INTEGER PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                applied_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::Database(e.to_string()))?;

        let max_version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StateStoreError::Database(e.to_string()))?;

        let migrations: Vec<(i64, &str, &[&str])> = vec![(
            1,
            "create_mirror_tables",
            &[
                r#"CREATE TABLE IF NOT EXISTS issues (
                    coordinate TEXT PRIMARY KEY NOT NULL,
                    owner TEXT NOT NULL,
                    repo TEXT NOT NULL,
                    issue INTEGER NOT NULL,
                    phase TEXT NOT NULL,
                    workflow TEXT NOT NULL,
                    status_json TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"#,
                r#"CREATE TABLE IF NOT EXISTS tasks (
                    coordinate TEXT NOT NULL,
                    task_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    PRIMARY KEY (coordinate, task_id)
                )"#,
                r#"CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY NOT NULL,
                    issue_ref TEXT NOT NULL,
                    running INTEGER NOT NULL,
                    iteration INTEGER NOT NULL,
                    completion_reason TEXT,
                    updated_at INTEGER NOT NULL
                )"#,
                r#"CREATE INDEX IF NOT EXISTS idx_runs_running ON runs(running)"#,
            ],
        )];

        for (version, name, statements) in migrations {
            if version > max_version {
                for statement in statements {
                    sqlx::query(statement)
                        .execute(&self.pool)
                        .await
                        .map_err(|e| StateStoreError::Database(e.to_string()))?;
                }
                sqlx::query("INSERT INTO migrations (version, name, applied_at) VALUES (?, ?, ?)")
                    .bind(version)
                    .bind(name)
                    .bind(chrono::Utc::now().timestamp())
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StateStoreError::Database(e.to_string()))?;
            }
        }
        Ok(())
    }

    pub async fn upsert_issue(&self, issue: &Issue) -> StateStoreResult<()> {
        let coordinate = format!("{}#{}", issue.repo.as_slug(), issue.issue);
        let status_json = serde_json::to_string(&issue.status)
            .map_err(|source| StateStoreError::CorruptJson { path: coordinate.clone(), source })?;
        sqlx::query(
            r#"INSERT INTO issues (coordinate, owner, repo, issue, phase, workflow, status_json, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(coordinate) DO UPDATE SET
                 phase = excluded.phase, workflow = excluded.workflow,
                 status_json = excluded.status_json, updated_at = excluded.updated_at"#,
        )
        .bind(&coordinate)
        .bind(&issue.repo.owner)
        .bind(&issue.repo.repo)
        .bind(issue.issue as i64)
        .bind(&issue.phase)
        .bind(&issue.workflow)
        .bind(status_json)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn upsert_tasks(
        &self,
        owner: &str,
        repo: &str,
        issue: u64,
        tasks: &TaskList,
    ) -> StateStoreResult<()> {
        let coordinate = format!("{owner}/{repo}#{issue}");
        sqlx::query("DELETE FROM tasks WHERE coordinate = ?")
            .bind(&coordinate)
            .execute(&self.pool)
            .await
            .map_err(|e| StateStoreError::Database(e.to_string()))?;
        for task in &tasks.tasks {
            sqlx::query(
                "INSERT INTO tasks (coordinate, task_id, status) VALUES (?, ?, ?)",
            )
            .bind(&coordinate)
            .bind(&task.id)
            .bind(format!("{:?}", task.status))
            .execute(&self.pool)
            .await
            .map_err(|e| StateStoreError::Database(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn upsert_run(&self, run: &RunRecord) -> StateStoreResult<()> {
        let completion_reason = run
            .completion_reason
            .map(|r| serde_json::to_value(r).unwrap_or_default().as_str().unwrap_or("").to_string());
        sqlx::query(
            r#"INSERT INTO runs (run_id, issue_ref, running, iteration, completion_reason, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id) DO UPDATE SET
                 running = excluded.running, iteration = excluded.iteration,
                 completion_reason = excluded.completion_reason, updated_at = excluded.updated_at"#,
        )
        .bind(&run.run_id)
        .bind(&run.issue_ref)
        .bind(run.running)
        .bind(run.iteration as i64)
        .bind(completion_reason)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| StateStoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn list_running_run_ids(&self) -> StateStoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT run_id FROM runs WHERE running = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StateStoreError::Database(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get::<String, _>("run_id")).collect())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{IssueProvider, RepoCoordinate};
    use tempfile::tempdir;

    fn sample_issue() -> Issue {
        Issue {
            repo: RepoCoordinate {
                owner: "acme".into(),
                repo: "widgets".into(),
            },
            issue: 7,
            title: "Fix the thing".into(),
            provider: IssueProvider::Github,
            branch: "issue/7".into(),
            workflow: "default".into(),
            phase: "design".into(),
            status: Default::default(),
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn round_trips_issue_through_json_and_mirror() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        let issue = sample_issue();
        store.save_issue("acme", "widgets", &issue).await.unwrap();

        let loaded = store.load_issue("acme", "widgets", 7).unwrap();
        assert_eq!(loaded.title, "Fix the thing");
    }

    #[tokio::test]
    async fn missing_issue_is_an_error() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(store.load_issue("acme", "widgets", 999).is_err());
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file_on_success() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        let issue = sample_issue();
        store.save_issue("acme", "widgets", &issue).await.unwrap();

        let issue_dir = IssuePaths::new(store.data_dir(), "acme", "widgets", 7).issue_json();
        let siblings: Vec<_> = std::fs::read_dir(issue_dir.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(!siblings.iter().any(|n| n.contains(".tmp.")));
    }

    #[tokio::test]
    async fn sweep_removes_stale_temp_files() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("issue.json.tmp.deadbeef");
        std::fs::write(&stale, b"partial").unwrap();
        sweep_stale_temp_files(dir.path()).unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn tasks_round_trip_default_when_absent() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        let tasks = store.load_tasks("acme", "widgets", 7).unwrap();
        assert!(tasks.tasks.is_empty());
    }

    #[tokio::test]
    async fn upsert_memory_inserts_then_refreshes_in_place() {
        use crate::memory::MemoryScope;
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        store
            .upsert_memory("acme", "widgets", 7, MemoryScope::WorkingSet, "focus", serde_json::json!("v1"), 1)
            .unwrap();
        store
            .upsert_memory("acme", "widgets", 7, MemoryScope::WorkingSet, "focus", serde_json::json!("v2"), 2)
            .unwrap();
        let entries = store.get_memory("acme", "widgets", 7, None, true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, serde_json::json!("v2"));
        assert_eq!(entries[0].source_iteration, 2);
    }

    #[tokio::test]
    async fn mark_memory_stale_is_idempotent_and_excludes_by_default() {
        use crate::memory::MemoryScope;
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        store
            .upsert_memory("acme", "widgets", 7, MemoryScope::Decisions, "d1", serde_json::json!(true), 1)
            .unwrap();
        store.mark_memory_stale("acme", "widgets", 7, MemoryScope::Decisions, "d1").unwrap();
        store.mark_memory_stale("acme", "widgets", 7, MemoryScope::Decisions, "d1").unwrap();

        let visible = store.get_memory("acme", "widgets", 7, None, false).unwrap();
        assert!(visible.is_empty());
        let all = store.get_memory("acme", "widgets", 7, None, true).unwrap();
        assert_eq!(all[0].source_iteration, 1);
    }

    #[tokio::test]
    async fn delete_memory_removes_the_entry() {
        use crate::memory::MemoryScope;
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        store
            .upsert_memory("acme", "widgets", 7, MemoryScope::CrossRun, "carry", serde_json::json!({}), 1)
            .unwrap();
        store.delete_memory("acme", "widgets", 7, MemoryScope::CrossRun, "carry").unwrap();
        assert!(store.get_memory("acme", "widgets", 7, None, true).unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_progress_never_rewrites_and_separates_with_newline() {
        let dir = tempdir().unwrap();
        let store = JsonStateStore::open(dir.path().to_path_buf()).await.unwrap();
        store.append_progress("acme", "widgets", 7, "first entry").unwrap();
        store.append_progress("acme", "widgets", 7, "second entry").unwrap();
        let contents = std::fs::read_to_string(store.progress_txt_path("acme", "widgets", 7)).unwrap();
        assert_eq!(contents, "first entry\nsecond entry");
    }
}
