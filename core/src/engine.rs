//! Run driver: ties the state store (C1), workflow interpreter (C2), phase
//! runner (C3) and worker sandbox manager (C4) into one executable run loop,
//! and performs the per-phase file-writing side effects (`last-run.log`,
//! `sdk-output.json`, `progress.txt`) plus event bus publication.
use crate::errors::{sanitize_error_message, CompletionReason, EngineError, EngineResult, PhaseRunnerError, StateStoreError};
use crate::events::{JeevesEvent, LogPayload, SdkPayload, StatePayload};
use crate::issue::Issue;
use crate::memory::MemoryEntry;
use crate::phase_runner::{run_phase, PhaseOutcome, PhaseRunContext};
use crate::provider::ProviderEvent;
use crate::run::{PhaseKind, RunRecord, WorkerStatus, WorkerStatusValue};
use crate::sandbox_manager::{SandboxContext, SandboxManager};
use crate::state_store::{read_json, write_json_atomic, IssuePaths, JsonStateStore};
use crate::task::TaskStatus;
use crate::workflow::{PhaseDef, PhaseType, WorkflowDef};
use crate::workflow_interpreter::{next_phase, InterpreterState};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// Structured per-run agent event document (`sdk-output.json`, schema tag
/// `jeeves.sdk.v1`), accumulated across every phase of the run and
/// atomically rewritten on each mutation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct SdkOutputDocument {
    pub schema: String,
    pub run_id: String,
    pub success: bool,
    pub events: Vec<ProviderEvent>,
}

impl SdkOutputDocument {
    fn new(run_id: &str) -> Self {
        Self {
            schema: "jeeves.sdk.v1".to_string(),
            run_id: run_id.to_string(),
            success: false,
            events: Vec::new(),
        }
    }
}

/// One human-readable tagged line appended to `last-run.log` per provider
/// event.
fn log_line_for(event: &ProviderEvent) -> String {
    match event {
        ProviderEvent::System { subtype, .. } => format!("[SYSTEM] {subtype}"),
        ProviderEvent::Assistant { text } => {
            format!("[ASSISTANT] {}", text.as_deref().unwrap_or(""))
        }
        ProviderEvent::ToolUse { name, input } => format!("[TOOL] {name} {input}"),
        ProviderEvent::ToolResult { content, is_error } => {
            format!("[RESULT] error={is_error} {content}")
        }
        ProviderEvent::Result { status } => {
            format!("[RESULT] status={}", status.as_deref().unwrap_or("unknown"))
        }
    }
}

/// Drives one issue through its workflow, phase by phase, until the
/// interpreter reports completion, a max-iteration/stall/invalid-definition
/// error, or the caller cancels.
pub struct RunDriver<'a> {
    store: &'a JsonStateStore,
    workflow: &'a WorkflowDef,
    owner: String,
    repo: String,
    issue_number: u64,
    events: Option<tokio::sync::mpsc::UnboundedSender<JeevesEvent>>,
    sandbox_manager: Option<&'a SandboxManager>,
}

impl<'a> RunDriver<'a> {
    pub fn new(store: &'a JsonStateStore, workflow: &'a WorkflowDef, owner: &str, repo: &str, issue_number: u64) -> Self {
        Self {
            store,
            workflow,
            owner: owner.to_string(),
            repo: repo.to_string(),
            issue_number,
            events: None,
            sandbox_manager: None,
        }
    }

    /// Attach an event bus sink; every phase's state/log/SDK events are
    /// forwarded to it as they happen (§4.5). Optional: a run with no
    /// subscriber still completes normally.
    pub fn with_event_sink(mut self, tx: tokio::sync::mpsc::UnboundedSender<JeevesEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Attach the worker sandbox manager (C4); required for any `fan_out`
    /// phase in the workflow. A run whose workflow never fans out can omit
    /// this.
    pub fn with_sandbox_manager(mut self, manager: &'a SandboxManager) -> Self {
        self.sandbox_manager = Some(manager);
        self
    }

    fn publish(&self, event: JeevesEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn issue_paths(&self) -> IssuePaths {
        IssuePaths::new(self.store.data_dir(), &self.owner, &self.repo, self.issue_number)
    }

    fn issue_ref(&self) -> String {
        format!("{}/{}#{}", self.owner, self.repo, self.issue_number)
    }

    /// Drive the run to completion, appending side effects for every phase
    /// executed. `ctx_for_phase` builds the [`PhaseRunContext`] for a given
    /// phase name (working dir, command, MCP availability, timeouts); a
    /// `fan_out` phase uses it only as a template (command/env/timeouts),
    /// overriding `working_dir` per task with the sandbox manager's
    /// per-task worktree.
    pub async fn run(
        &self,
        run: &mut RunRecord,
        ctx_for_phase: impl Fn(&str) -> PhaseRunContext,
        cancel: CancellationToken,
    ) -> EngineResult<CompletionReason> {
        let mut state = InterpreterState::new();
        loop {
            if cancel.is_cancelled() {
                run.finish(CompletionReason::UncaughtError, Some("cancelled".to_string()));
                self.store.save_run(run).await?;
                return Ok(CompletionReason::UncaughtError);
            }

            let mut issue = self.store.load_issue(&self.owner, &self.repo, self.issue_number)?;

            let phase_def = self
                .workflow
                .phase(&issue.phase)
                .ok_or_else(|| crate::errors::WorkflowError::UnknownPhase(issue.phase.clone()))?
                .clone();

            if phase_def.phase_type == PhaseType::Terminal {
                run.finish(CompletionReason::WorkflowComplete, None);
                self.store.save_run(run).await?;
                self.publish_state(&issue, run);
                return Ok(CompletionReason::WorkflowComplete);
            }

            let memory = self.store.load_memory(&self.owner, &self.repo, self.issue_number)?;
            let ctx = ctx_for_phase(&phase_def.name);

            let outcome = if phase_def.fan_out {
                match self.run_fanned_out_phase(&phase_def, &memory, &ctx, run, cancel.clone()).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let reason = match &err {
                            EngineError::PhaseRunner(PhaseRunnerError::McpMissing(_)) => CompletionReason::McpMissing,
                            _ => CompletionReason::UncaughtError,
                        };
                        run.finish(reason, Some(sanitize_error_message(&err.to_string())));
                        self.store.save_run(run).await?;
                        return Ok(reason);
                    }
                }
            } else {
                match run_phase(&phase_def, &memory, ctx, cancel.clone()).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let reason = match &err {
                            PhaseRunnerError::McpMissing(_) => CompletionReason::McpMissing,
                            _ => CompletionReason::UncaughtError,
                        };
                        run.finish(reason, Some(sanitize_error_message(&err.to_string())));
                        self.store.save_run(run).await?;
                        return Ok(reason);
                    }
                }
            };

            self.write_phase_side_effects(&run.run_id, &phase_def.name, run.iteration, &outcome)?;
            self.apply_task_plan(&outcome);

            if let Some(new_status) = outcome_status_update(&outcome) {
                issue.apply_status_update(new_status);
            }

            let next = match next_phase(self.workflow, &issue, &mut state, run.max_iterations) {
                Ok(next) => next,
                Err(crate::errors::WorkflowError::MaxIterations(_)) => {
                    run.finish(CompletionReason::MaxIterations, None);
                    self.store.save_run(run).await?;
                    return Ok(CompletionReason::MaxIterations);
                }
                Err(crate::errors::WorkflowError::Stalled { .. }) => {
                    run.finish(CompletionReason::Stalled, None);
                    self.store.save_run(run).await?;
                    return Ok(CompletionReason::Stalled);
                }
                Err(e) => {
                    run.finish(CompletionReason::WorkflowInvalid, Some(sanitize_error_message(&e.to_string())));
                    self.store.save_run(run).await?;
                    return Ok(CompletionReason::WorkflowInvalid);
                }
            };

            issue.phase = next;
            self.store.save_issue(&self.owner, &self.repo, &issue).await?;

            run.iteration = state.iterations();
            self.store.save_run(run).await?;
            self.publish_state(&issue, run);
        }
    }

    /// Run a `fan_out` phase: materialize one worker sandbox per ready
    /// task (`implement_task` creates it, `task_spec_check` reuses it),
    /// run the phase against each concurrently, and fold the per-task
    /// outcomes into a single [`PhaseOutcome`] — success only if every
    /// sandbox produced its completion marker.
    async fn run_fanned_out_phase(
        &self,
        phase_def: &PhaseDef,
        memory: &[MemoryEntry],
        ctx_template: &PhaseRunContext,
        run: &mut RunRecord,
        cancel: CancellationToken,
    ) -> EngineResult<PhaseOutcome> {
        let sandbox_manager = self.sandbox_manager.ok_or_else(|| {
            EngineError::Config(format!(
                "phase '{}' is fan_out but no sandbox manager is attached to this run",
                phase_def.name
            ))
        })?;
        let phase_kind = match phase_def.name.as_str() {
            "implement_task" => PhaseKind::ImplementTask,
            "task_spec_check" => PhaseKind::TaskSpecCheck,
            other => {
                return Err(EngineError::Config(format!(
                    "fan_out phase '{other}' is not a recognized task-loop phase (expected implement_task or task_spec_check)"
                )))
            }
        };

        let issue = self.store.load_issue(&self.owner, &self.repo, self.issue_number)?;
        let tasks = self.store.load_tasks(&self.owner, &self.repo, self.issue_number)?;
        let ready = tasks.ready_tasks();
        if ready.is_empty() {
            return Ok(PhaseOutcome { success: true, degraded: false, events: Vec::new(), task_plan: None });
        }

        let paths = self.issue_paths();
        let sandbox_ctx = SandboxContext {
            run_id: &run.run_id,
            issue_number: self.issue_number,
            owner: &self.owner,
            repo: &self.repo,
            canonical_state_dir: paths.root(),
            canonical_branch: &issue.branch,
        };

        let mut sandboxes = Vec::new();
        for task in &ready {
            let sandbox = if phase_kind == PhaseKind::ImplementTask {
                sandbox_manager.create(task, &issue, &tasks, &sandbox_ctx, None).await?
            } else {
                sandbox_manager.reuse(task, &sandbox_ctx).await?
            };
            sandboxes.push((*task, sandbox));
        }

        let phase_runs = sandboxes.iter().map(|(_, sandbox)| {
            let mut task_ctx = ctx_template.clone();
            task_ctx.working_dir = sandbox.worktree_dir.clone();
            run_phase(phase_def, memory, task_ctx, cancel.clone())
        });
        let results = futures::future::join_all(phase_runs).await;

        let mut combined_events = Vec::new();
        let mut any_degraded = false;
        let mut updated_tasks = tasks.clone();
        for ((task, sandbox), result) in sandboxes.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    combined_events.extend(outcome.events);
                    any_degraded |= outcome.degraded;
                    let status = if outcome.success {
                        if let Err(e) = sandbox_manager.mark_complete(sandbox, phase_kind) {
                            tracing::warn!(task_id = %task.id, error = %e, "failed to write completion marker");
                        }
                        WorkerStatusValue::Passed
                    } else {
                        WorkerStatusValue::Failed
                    };
                    run.upsert_worker(WorkerStatus { task_id: task.id.clone(), phase: phase_kind, status });
                    let task_status = if outcome.success { TaskStatus::Passed } else { TaskStatus::Failed };
                    let _ = updated_tasks.set_status(&task.id, task_status);
                }
                Err(err) => {
                    any_degraded = true;
                    tracing::warn!(task_id = %task.id, error = %err, "fan-out task phase failed");
                    run.upsert_worker(WorkerStatus {
                        task_id: task.id.clone(),
                        phase: phase_kind,
                        status: WorkerStatusValue::Failed,
                    });
                    let _ = updated_tasks.set_status(&task.id, TaskStatus::Failed);
                }
            }
        }
        self.store.save_tasks(&self.owner, &self.repo, self.issue_number, &updated_tasks).await?;

        let sandbox_list: Vec<_> = sandboxes.iter().map(|(_, s)| s.clone()).collect();
        let all_complete = sandbox_manager.all_complete(&sandbox_list, phase_kind);

        if phase_kind == PhaseKind::TaskSpecCheck {
            for sandbox in &sandbox_list {
                let fully_done = sandbox_manager.is_complete(sandbox, PhaseKind::ImplementTask)
                    && sandbox_manager.is_complete(sandbox, PhaseKind::TaskSpecCheck);
                if fully_done {
                    if let Err(e) = sandbox_manager.cleanup_success(sandbox).await {
                        tracing::warn!(task_id = %sandbox.task_id, error = %e, "sandbox cleanup failed");
                    }
                }
            }
        }

        Ok(PhaseOutcome {
            success: all_complete,
            degraded: any_degraded,
            events: combined_events,
            task_plan: None,
        })
    }

    fn publish_state(&self, issue: &Issue, run: &RunRecord) {
        self.publish(JeevesEvent::State(StatePayload {
            issue_ref: self.issue_ref(),
            phase: issue.phase.clone(),
            status: serde_json::to_value(&issue.status).unwrap_or_default(),
            run_id: run.run_id.clone(),
            iteration: run.iteration,
            timestamp: Utc::now(),
        }));
    }

    fn apply_task_plan(&self, outcome: &PhaseOutcome) {
        if let Some(plan) = &outcome.task_plan {
            let _ = std::fs::write(self.issue_paths().task_plan_md(), plan);
        }
    }

    /// Event pumping side effects: append a tagged
    /// line per event to `last-run.log`, extend the accumulated
    /// `sdk-output.json` with this phase's events and reflush it, forward
    /// each event onto the bus, and append one block to `progress.txt`.
    fn write_phase_side_effects(&self, run_id: &str, phase_name: &str, iteration: u32, outcome: &PhaseOutcome) -> EngineResult<()> {
        let paths = self.issue_paths();

        let mut log_lines = String::new();
        for event in &outcome.events {
            log_lines.push_str(&log_line_for(event));
            log_lines.push('\n');
            self.publish(JeevesEvent::SdkMessage(SdkPayload {
                run_id: run_id.to_string(),
                data: serde_json::to_value(event).unwrap_or_default(),
            }));
        }
        if !log_lines.is_empty() {
            use std::io::Write;
            if let Some(parent) = paths.last_run_log().parent() {
                std::fs::create_dir_all(parent).map_err(StateStoreError::Io)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(paths.last_run_log())
                .map_err(StateStoreError::Io)?;
            file.write_all(log_lines.as_bytes()).map_err(StateStoreError::Io)?;
        }
        self.publish(JeevesEvent::Logs(LogPayload {
            lines: log_lines.lines().map(String::from).collect(),
            reset: false,
        }));

        let mut document: SdkOutputDocument =
            read_json(&paths.sdk_output_json()).unwrap_or_else(|_| SdkOutputDocument::new(run_id));
        document.run_id = run_id.to_string();
        document.success = outcome.success;
        document.events.extend(outcome.events.clone());
        write_json_atomic(&paths.sdk_output_json(), &document)?;

        self.store.append_progress(
            &self.owner,
            &self.repo,
            self.issue_number,
            &format!(
                "[{}] phase={} iteration={} success={} degraded={}",
                Utc::now().to_rfc3339(),
                phase_name,
                iteration,
                outcome.success,
                outcome.degraded
            ),
        )?;
        Ok(())
    }
}

/// Translate a phase outcome into the `status.*` mutation the interpreter's
/// next transition will see. The agent is the primary author of status via
/// its own tool calls; this only carries forward the runner-observed
/// success/degraded bits the agent might not have set itself.
fn outcome_status_update(outcome: &PhaseOutcome) -> Option<crate::issue::StatusMap> {
    if !outcome.degraded {
        return None;
    }
    let mut update = crate::issue::StatusMap::new();
    update.insert("mcpDegraded".to_string(), serde_json::json!(true));
    Some(update)
}
