//! Provider process spawn and event pump (C3): runs one phase's backend CLI
//! as a subprocess, parses its NDJSON event stream, and races inactivity /
//! iteration wallclock timers and cancellation in a single `select!` loop.
//!
//! Narrower than a pool of long-lived, independently-addressable agent
//! handles: one subprocess, one event stream, bounded lifetime, scoped to a
//! single phase invocation.
use crate::errors::{PhaseRunnerError, PhaseRunnerResult};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// One decoded line of the provider's NDJSON stdout stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    System { subtype: String, #[serde(default)] data: serde_json::Value },
    Assistant { #[serde(default)] text: Option<String> },
    ToolUse { name: String, #[serde(default)] input: serde_json::Value },
    ToolResult { #[serde(default)] content: serde_json::Value, #[serde(default)] is_error: bool },
    Result { #[serde(default)] status: Option<String> },
}

#[derive(Debug, Clone)]
pub struct ProviderSpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: std::path::PathBuf,
    pub env: Vec<(String, String)>,
    pub inactivity_timeout: Duration,
    pub iteration_timeout: Duration,
}

/// Outcome of running a provider to completion.
#[derive(Debug)]
pub enum ProviderOutcome {
    Completed { events: Vec<ProviderEvent>, exit_code: Option<i32> },
    InactivityTimeout { events: Vec<ProviderEvent> },
    IterationTimeout { events: Vec<ProviderEvent> },
    Cancelled { events: Vec<ProviderEvent> },
}

/// Grace window between SIGTERM and SIGKILL when a provider must be killed.
const KILL_GRACE: Duration = Duration::from_secs(5);

pub async fn run_provider(
    spec: ProviderSpawnSpec,
    cancel: CancellationToken,
) -> PhaseRunnerResult<ProviderOutcome> {
    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .map_err(|e| PhaseRunnerError::ProviderError(format!("failed to spawn provider: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PhaseRunnerError::ProviderError("missing stdout pipe".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    let mut events = Vec::new();
    let mut inactivity_timer = Box::pin(tokio::time::sleep(spec.inactivity_timeout));
    let iteration_timer = Box::pin(tokio::time::sleep(spec.iteration_timeout));
    tokio::pin!(iteration_timer);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                terminate_with_grace(&mut child).await;
                return Ok(ProviderOutcome::Cancelled { events });
            }

            _ = &mut iteration_timer => {
                terminate_with_grace(&mut child).await;
                return Ok(ProviderOutcome::IterationTimeout { events });
            }

            _ = &mut inactivity_timer => {
                terminate_with_grace(&mut child).await;
                return Ok(ProviderOutcome::InactivityTimeout { events });
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        inactivity_timer.as_mut().reset(
                            tokio::time::Instant::now() + spec.inactivity_timeout,
                        );
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ProviderEvent>(&line) {
                            Ok(event) => events.push(event),
                            Err(e) => {
                                tracing::debug!(error = %e, line = %line, "unparseable provider event, skipping");
                            }
                        }
                    }
                    Ok(None) => {
                        let status = child
                            .wait()
                            .await
                            .map_err(|e| PhaseRunnerError::ProviderError(e.to_string()))?;
                        return Ok(ProviderOutcome::Completed {
                            events,
                            exit_code: status.code(),
                        });
                    }
                    Err(e) => {
                        return Err(PhaseRunnerError::ProviderError(format!(
                            "error reading provider stdout: {e}"
                        )));
                    }
                }
            }
        }
    }
}

/// Send SIGTERM, wait up to [`KILL_GRACE`], then SIGKILL if still running.
async fn terminate_with_grace(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelopes_parse_by_tag() {
        let assistant: ProviderEvent =
            serde_json::from_str(r#"{"type":"assistant","text":"hi"}"#).unwrap();
        match assistant {
            ProviderEvent::Assistant { text } => assert_eq!(text.as_deref(), Some("hi")),
            other => panic!("wrong variant: {other:?}"),
        }

        let result: ProviderEvent =
            serde_json::from_str(r#"{"type":"result","status":"ok"}"#).unwrap();
        match result {
            ProviderEvent::Result { status } => assert_eq!(status.as_deref(), Some("ok")),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completes_and_collects_ndjson_events() {
        let spec = ProviderSpawnSpec {
            command: "sh".into(),
            args: vec![
                "-c".into(),
                r#"echo '{"type":"assistant","text":"hello"}'; echo '{"type":"result","status":"ok"}'"#.into(),
            ],
            working_dir: std::env::temp_dir(),
            env: vec![],
            inactivity_timeout: Duration::from_secs(5),
            iteration_timeout: Duration::from_secs(30),
        };
        let outcome = run_provider(spec, CancellationToken::new()).await.unwrap();
        match outcome {
            ProviderOutcome::Completed { events, .. } => assert_eq!(events.len(), 2),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_a_long_running_provider() {
        let spec = ProviderSpawnSpec {
            command: "sleep".into(),
            args: vec!["30".into()],
            working_dir: std::env::temp_dir(),
            env: vec![],
            inactivity_timeout: Duration::from_secs(60),
            iteration_timeout: Duration::from_secs(60),
        };
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let outcome = run_provider(spec, cancel).await.unwrap();
        assert!(matches!(outcome, ProviderOutcome::Cancelled { .. }));
    }
}
