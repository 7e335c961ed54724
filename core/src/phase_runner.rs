//! Phase runner (C3): assembles one phase's prompt from memory, enforces the
//! MCP pre-flight check, spawns the provider via [`crate::provider`], and
//! extracts the one piece of tool output the runner interprets directly —
//! a `Write` to a path ending `task-plan.md`.
use crate::errors::{PhaseRunnerError, PhaseRunnerResult};
use crate::memory::{MemoryEntry, MemoryScope};
use crate::provider::{run_provider, ProviderEvent, ProviderOutcome, ProviderSpawnSpec};
use crate::workflow::{McpEnforcement, PhaseDef};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the phase runner needs beyond the phase definition itself:
/// where the provider runs, how it's invoked, and what MCP servers are
/// actually reachable for this run.
#[derive(Clone)]
pub struct PhaseRunContext {
    pub working_dir: PathBuf,
    pub command: String,
    pub base_args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub available_mcp_servers: Vec<String>,
    pub required_mcp_servers: Vec<String>,
    pub max_wallclock_secs: u64,
    pub inactivity_timeout_secs: u64,
}

#[derive(Debug)]
pub struct PhaseOutcome {
    pub success: bool,
    pub degraded: bool,
    pub events: Vec<ProviderEvent>,
    pub task_plan: Option<String>,
}

/// MCP pre-flight check. Returns `Ok(true)` when the phase
/// proceeds in degraded mode (some required server missing, enforcement
/// relaxed); `Ok(false)` when every requirement is satisfied (or the phase
/// declares no MCP profile at all).
pub fn mcp_preflight(
    phase: &PhaseDef,
    available_servers: &[String],
    required_servers: &[String],
) -> PhaseRunnerResult<bool> {
    if phase.mcp_profile.is_none() {
        return Ok(false);
    }
    let missing: Vec<String> = required_servers
        .iter()
        .filter(|s| !available_servers.contains(s))
        .cloned()
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }
    match phase.mcp_enforcement() {
        McpEnforcement::Strict => Err(PhaseRunnerError::McpMissing(missing)),
        McpEnforcement::AllowDegraded => {
            tracing::warn!(phase = %phase.name, missing = ?missing, "DEGRADED_MODE: required MCP server(s) missing");
            Ok(true)
        }
    }
}

/// After per-scope filtering, at most this many memory entries are injected
/// in total, in prompt order. Filtering happens before capping so
/// scope-relevant entries always survive over noise.
pub const MAX_PROMPT_MEMORY_ENTRIES: usize = 500;

/// Agent-convention docs prepended ahead of the phase prompt, in order, when
/// present in the working directory.
const AGENT_CONVENTION_FILES: &[&str] = &["AGENTS.md", "CLAUDE.md"];

/// Render any agent-convention docs found in `working_dir`, followed by the
/// phase's own prompt, followed by each memory scope's relevant entries, in
/// the fixed scope order. Within a scope entries sort by `source_iteration`
/// ascending, then key lexicographically.
pub fn assemble_prompt(phase: &PhaseDef, memory: &[MemoryEntry], working_dir: &Path) -> String {
    let mut prompt = String::new();
    for name in AGENT_CONVENTION_FILES {
        if let Ok(contents) = std::fs::read_to_string(working_dir.join(name)) {
            prompt.push_str(&contents);
            if !contents.ends_with('\n') {
                prompt.push('\n');
            }
        }
    }
    prompt.push_str(&phase.prompt);
    prompt.push('\n');

    let mut budget = MAX_PROMPT_MEMORY_ENTRIES;
    for scope in MemoryScope::prompt_order() {
        if budget == 0 {
            break;
        }
        let mut entries: Vec<&MemoryEntry> = memory
            .iter()
            .filter(|e| e.scope == scope && e.is_relevant_for(&phase.name))
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by(|a, b| {
            a.source_iteration
                .cmp(&b.source_iteration)
                .then_with(|| a.key.cmp(&b.key))
        });
        entries.truncate(budget);
        budget -= entries.len();

        prompt.push('\n');
        prompt.push_str(scope.heading());
        prompt.push('\n');
        for entry in entries {
            prompt.push_str(&format!("- {}: {}\n", entry.key, entry.value));
        }
    }
    prompt
}

/// The last `Write` tool-use event targeting a `task-plan.md` path wins.
pub fn extract_task_plan(events: &[ProviderEvent]) -> Option<String> {
    let mut plan = None;
    for event in events {
        if let ProviderEvent::ToolUse { name, input } = event {
            if name != "Write" {
                continue;
            }
            let targets_task_plan = input
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(|p| p.ends_with("task-plan.md"))
                .unwrap_or(false);
            if targets_task_plan {
                if let Some(content) = input.get("content").and_then(|v| v.as_str()) {
                    plan = Some(content.to_string());
                }
            }
        }
    }
    plan
}

/// Whether the provider's own event stream reports success: the last
/// `result` event's status if one was emitted, else the process exit code.
fn provider_reported_success(events: &[ProviderEvent], exit_code: Option<i32>) -> bool {
    let last_result_status = events.iter().rev().find_map(|e| match e {
        ProviderEvent::Result { status } => Some(status.clone()),
        _ => None,
    });
    match last_result_status.flatten() {
        Some(status) => status == "ok",
        None => exit_code == Some(0),
    }
}

pub async fn run_phase(
    phase: &PhaseDef,
    memory: &[MemoryEntry],
    ctx: PhaseRunContext,
    cancel: CancellationToken,
) -> PhaseRunnerResult<PhaseOutcome> {
    let degraded = mcp_preflight(phase, &ctx.available_mcp_servers, &ctx.required_mcp_servers)?;
    let prompt = assemble_prompt(phase, memory, &ctx.working_dir);

    let mut args = ctx.base_args;
    args.push(prompt);
    let spec = ProviderSpawnSpec {
        command: ctx.command,
        args,
        working_dir: ctx.working_dir,
        env: ctx.env,
        inactivity_timeout: Duration::from_secs(ctx.inactivity_timeout_secs),
        iteration_timeout: Duration::from_secs(ctx.max_wallclock_secs),
    };

    match run_provider(spec, cancel).await? {
        ProviderOutcome::Completed { events, exit_code } => {
            let success = provider_reported_success(&events, exit_code);
            let task_plan = extract_task_plan(&events);
            Ok(PhaseOutcome { success, degraded, events, task_plan })
        }
        ProviderOutcome::Cancelled { events } => {
            let task_plan = extract_task_plan(&events);
            Ok(PhaseOutcome { success: false, degraded, events, task_plan })
        }
        ProviderOutcome::InactivityTimeout { .. } => {
            Err(PhaseRunnerError::InactivityTimeout(Duration::from_secs(ctx.inactivity_timeout_secs)))
        }
        ProviderOutcome::IterationTimeout { .. } => {
            Err(PhaseRunnerError::IterationTimeout(Duration::from_secs(ctx.max_wallclock_secs)))
        }
    }
}
