//! HTTP control API handlers (spec.md §6's "small HTTP control API"): start
//! a run, cancel a run, query run/issue status. Routing lives in
//! `server.rs`; this module only builds responses from `jeeves-core` state.
use crate::errors::{DaemonError, DaemonResult};
use crate::events::EventBus;
use chrono::Utc;
use jeeves_core::events::{JeevesEvent, StatePayload};
use jeeves_core::phase_runner::PhaseRunContext;
use jeeves_core::run::RunRecord;
use jeeves_core::workflow::WorkflowDef;
use jeeves_core::{Config, EngineError, Issue, JsonStateStore, RunDriver, SandboxManager, SecretsStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Everything a handler needs: the opened state store, engine config, the
/// event bus runs publish onto, and bookkeeping for in-flight runs so a
/// cancel request can find the right [`CancellationToken`].
pub struct AppState {
    pub config: Config,
    pub store: Arc<JsonStateStore>,
    pub event_bus: Arc<EventBus>,
    runs: Mutex<HashMap<String, RunHandle>>,
}

struct RunHandle {
    cancel: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub owner: String,
    pub repo: String,
    pub issue: u64,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: String,
    pub issue_ref: String,
}

#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub run: RunRecord,
}

#[derive(Debug, Serialize)]
pub struct IssueStatusResponse {
    pub issue: Issue,
}

impl AppState {
    pub fn new(config: Config, store: Arc<JsonStateStore>, event_bus: Arc<EventBus>) -> Self {
        Self { config, store, event_bus, runs: Mutex::new(HashMap::new()) }
    }

    /// Start a run in the background. Returns as soon as the run record is
    /// persisted and the driver task is spawned; callers poll
    /// `GET /runs/{id}` or subscribe to the WebSocket stream for progress.
    pub async fn start_run(self: &Arc<Self>, req: StartRunRequest) -> DaemonResult<StartRunResponse> {
        let issue = self
            .store
            .load_issue(&req.owner, &req.repo, req.issue)
            .map_err(|_| DaemonError::IssueNotFound(format!("{}/{}#{}", req.owner, req.repo, req.issue)))?;

        let workflow_name = req.workflow.unwrap_or_else(|| issue.workflow.clone());
        let workflow = WorkflowDef::load(&self.config.workflows_dir(), &workflow_name)
            .map_err(DaemonError::InvalidRequest)?;

        let issue_ref = format!("{}/{}#{}", req.owner, req.repo, req.issue);
        let run_id = format!("run.{}.{}", Utc::now().format("%Y-%m-%d"), &Uuid::new_v4().to_string()[..8]);
        let max_iterations = req.max_iterations.unwrap_or(self.config.max_iterations);
        let mut run = RunRecord::new(run_id.clone(), issue_ref.clone(), max_iterations);
        self.store.save_run(&run).await.map_err(EngineError::from)?;

        let cancel = CancellationToken::new();
        self.runs.lock().await.insert(run_id.clone(), RunHandle { cancel: cancel.clone() });

        self.publish_state(&issue, &run);

        let this = Arc::clone(self);
        let owner = req.owner.clone();
        let repo = req.repo.clone();
        let issue_number = req.issue;
        let run_id_for_task = run_id.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<JeevesEvent>();
            let forward_bus = Arc::clone(&this.event_bus);
            let forwarder = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    forward_bus.publish(event).await;
                }
            });

            let repo_root = this.config.repos_dir().join(&owner).join(&repo);
            let mut sandbox_manager = SandboxManager::new(repo_root, this.config.data_dir());
            let secrets_dir = this.config.secrets_dir();
            if secrets_dir.is_dir() {
                sandbox_manager = sandbox_manager.with_secrets(SecretsStore::new(secrets_dir));
            }

            let driver = RunDriver::new(&this.store, &workflow, &owner, &repo, issue_number)
                .with_event_sink(tx)
                .with_sandbox_manager(&sandbox_manager);
            let result = driver
                .run(&mut run, |phase_name| this.phase_context(&owner, &repo, issue_number, phase_name), cancel)
                .await;
            forwarder.abort();

            match result {
                Ok(reason) => info!(run_id = %run_id_for_task, ?reason, "run finished"),
                Err(err) => error!(run_id = %run_id_for_task, error = %err, "run driver returned an error"),
            }
            this.runs.lock().await.remove(&run_id_for_task);
        });

        Ok(StartRunResponse { run_id, issue_ref })
    }

    /// Signal cancellation for an in-flight run. A run that already ended
    /// (its handle removed) is reported as not found, matching the
    /// `RunNotFound` 404 the rest of this API uses.
    pub async fn cancel_run(&self, run_id: &str) -> DaemonResult<()> {
        let runs = self.runs.lock().await;
        match runs.get(run_id) {
            Some(handle) => {
                handle.cancel.cancel();
                Ok(())
            }
            None => Err(DaemonError::RunNotFound(run_id.to_string())),
        }
    }

    pub fn get_run(&self, run_id: &str) -> DaemonResult<RunStatusResponse> {
        let run = self
            .store
            .load_run(run_id)
            .map_err(|_| DaemonError::RunNotFound(run_id.to_string()))?;
        Ok(RunStatusResponse { run })
    }

    pub fn get_issue(&self, owner: &str, repo: &str, issue: u64) -> DaemonResult<IssueStatusResponse> {
        let issue = self
            .store
            .load_issue(owner, repo, issue)
            .map_err(|_| DaemonError::IssueNotFound(format!("{owner}/{repo}#{issue}")))?;
        Ok(IssueStatusResponse { issue })
    }

    pub async fn list_active_runs(&self) -> Vec<String> {
        self.runs.lock().await.keys().cloned().collect()
    }

    fn publish_state(&self, issue: &Issue, run: &RunRecord) {
        let bus = Arc::clone(&self.event_bus);
        let payload = StatePayload {
            issue_ref: run.issue_ref.clone(),
            phase: issue.phase.clone(),
            status: serde_json::to_value(&issue.status).unwrap_or_default(),
            run_id: run.run_id.clone(),
            iteration: run.iteration,
            timestamp: Utc::now(),
        };
        tokio::spawn(async move { bus.publish(JeevesEvent::State(payload)).await });
    }

    /// Build the per-phase run context the engine needs: working directory,
    /// provider command/args, and timeout defaults. This resolves to the
    /// issue's own canonical git worktree under
    /// `data_dir/worktrees/<owner>/<repo>/issue-<N>`; for a `fan_out` phase
    /// the engine only borrows `command`/`env`/timeouts from this template
    /// and substitutes each task's own sandbox worktree as `working_dir`.
    fn phase_context(&self, owner: &str, repo: &str, issue: u64, _phase_name: &str) -> PhaseRunContext {
        let working_dir = self
            .config
            .data_dir()
            .join("worktrees")
            .join(owner)
            .join(repo)
            .join(format!("issue-{issue}"));
        let state_mcp_path = self.config.data_dir().join("mcp-state.sock");
        let env = vec![("JEEVES_MCP_STATE_PATH".to_string(), state_mcp_path.display().to_string())];

        PhaseRunContext {
            working_dir,
            command: std::env::var("JEEVES_PROVIDER_COMMAND").unwrap_or_else(|_| "jeeves-provider".to_string()),
            base_args: Vec::new(),
            env,
            available_mcp_servers: vec!["state".to_string()],
            required_mcp_servers: vec!["state".to_string()],
            max_wallclock_secs: self.config.default_max_wallclock_secs,
            inactivity_timeout_secs: self.config.default_inactivity_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().display().to_string();
        let store = Arc::new(JsonStateStore::open(dir.path().to_path_buf()).await.unwrap());
        let state = Arc::new(AppState::new(config, store, Arc::new(EventBus::new())));
        (state, dir)
    }

    #[tokio::test]
    async fn cancel_unknown_run_is_not_found() {
        let (state, _dir) = test_state().await;
        let result = state.cancel_run("run.missing").await;
        assert!(matches!(result, Err(DaemonError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn get_unknown_issue_is_not_found() {
        let (state, _dir) = test_state().await;
        let result = state.get_issue("acme", "widgets", 1);
        assert!(matches!(result, Err(DaemonError::IssueNotFound(_))));
    }
}
