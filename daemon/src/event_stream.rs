//! WebSocket viewer stream (C5): a dedicated TCP listener accepts raw
//! WebSocket upgrades (teacher pattern: `tokio_tungstenite::accept_async`
//! over a plain `TcpStream`, no HTTP framework in the loop) and forwards
//! [`jeeves_core::JeevesEvent`]s from the broadcast bus to each subscriber,
//! narrowed by that subscriber's [`EventFilter`].
//!
//! On subscribe, a fresh client first receives a state snapshot and the
//! bounded log backlog for its issue (spec.md §8: "a late subscriber
//! receives the snapshot + bounded backlog before any newly published
//! event"), then the live broadcast stream.
use crate::errors::{DaemonError, DaemonResult};
use crate::events::{EventBus, EventFilter};
use futures::{SinkExt, StreamExt};
use jeeves_core::events::{JeevesEvent, LogBacklog, LogPayload, SdkPayload, StatePayload};
use jeeves_core::{JsonStateStore, SdkOutputDocument};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    Snapshot { state: Option<StatePayload>, logs: Vec<String> },
    Event(JeevesEvent),
    SubscriptionConfirmed { subscription_id: String },
    Ping { timestamp: chrono::DateTime<chrono::Utc> },
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    Subscribe { filter: Option<EventFilter> },
    Unsubscribe,
    Pong { timestamp: chrono::DateTime<chrono::Utc> },
}

/// Shared context handed to every WebSocket connection: the bus to
/// subscribe against, the state store to snapshot from, and the per-issue
/// log backlogs the tailers maintain.
pub struct StreamContext {
    pub event_bus: Arc<EventBus>,
    pub store: Arc<JsonStateStore>,
    pub backlogs: Arc<RwLock<HashMap<String, LogBacklog>>>,
}

pub async fn handle_event_stream(stream: tokio::net::TcpStream, ctx: Arc<StreamContext>) -> DaemonResult<()> {
    info!("new websocket connection for event streaming");

    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| DaemonError::InvalidRequest(format!("websocket handshake failed: {e}")))?;
    let (mut sink, mut stream) = ws_stream.split();

    let mut subscription_id: Option<String> = None;
    let mut receiver: Option<broadcast::Receiver<JeevesEvent>> = None;
    let mut filter = EventFilter::all();
    let mut heartbeat = tokio::time::interval(tokio::time::Duration::from_secs(30));

    loop {
        tokio::select! {
            Some(msg) = stream.next() => {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        debug!(%text, "received client message");
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) = handle_client_message(
                                    client_msg, &ctx, &mut subscription_id, &mut receiver, &mut filter,
                                ).await? {
                                    if send(&mut sink, &response).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "invalid client message");
                                let _ = send(&mut sink, &ServerMessage::Error {
                                    code: "invalid_message".into(),
                                    message: e.to_string(),
                                }).await;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        info!("client closed websocket connection");
                        break;
                    }
                    Ok(WsMessage::Ping(data)) => {
                        if sink.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "websocket error");
                        break;
                    }
                }
            }

            Some(event) = async {
                match &mut receiver {
                    Some(rx) => rx.recv().await.ok(),
                    None => std::future::pending().await,
                }
            } => {
                if !filter.matches(&event) {
                    continue;
                }
                if send(&mut sink, &ServerMessage::Event(event)).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if send(&mut sink, &ServerMessage::Ping { timestamp: chrono::Utc::now() }).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(id) = subscription_id {
        ctx.event_bus.unsubscribe(&id).await;
    }
    info!("websocket connection closed");
    Ok(())
}

async fn send<S>(sink: &mut S, message: &ServerMessage) -> Result<(), ()>
where
    S: futures::Sink<WsMessage> + Unpin,
{
    let json = serde_json::to_string(message).expect("ServerMessage always serializes");
    sink.send(WsMessage::Text(json)).await.map_err(|_| ())
}

async fn handle_client_message(
    message: ClientMessage,
    ctx: &Arc<StreamContext>,
    subscription_id: &mut Option<String>,
    receiver: &mut Option<broadcast::Receiver<JeevesEvent>>,
    filter: &mut EventFilter,
) -> DaemonResult<Option<ServerMessage>> {
    match message {
        ClientMessage::Subscribe { filter: new_filter } => {
            if let Some(id) = subscription_id.take() {
                ctx.event_bus.unsubscribe(&id).await;
            }
            let new_filter = new_filter.unwrap_or_default();
            let (id, rx) = ctx.event_bus.subscribe(Some(new_filter.clone())).await;
            *subscription_id = Some(id.clone());
            *receiver = Some(rx);
            *filter = new_filter.clone();

            let state = snapshot_state(ctx, &new_filter).await;
            let logs = snapshot_logs(ctx, &new_filter).await;
            Ok(Some(ServerMessage::Snapshot { state, logs }))
        }
        ClientMessage::Unsubscribe => {
            if let Some(id) = subscription_id.take() {
                ctx.event_bus.unsubscribe(&id).await;
                *receiver = None;
                *filter = EventFilter::all();
            }
            Ok(None)
        }
        ClientMessage::Pong { .. } => Ok(None),
    }
}

async fn snapshot_state(ctx: &Arc<StreamContext>, filter: &EventFilter) -> Option<StatePayload> {
    let issue_ref = filter.issue_refs.first()?;
    let (owner_repo, issue) = issue_ref.rsplit_once('#')?;
    let (owner, repo) = owner_repo.split_once('/')?;
    let issue_number: u64 = issue.parse().ok()?;
    let record = ctx.store.load_issue(owner, repo, issue_number).ok()?;
    Some(StatePayload {
        issue_ref: issue_ref.clone(),
        phase: record.phase,
        status: serde_json::to_value(&record.status).unwrap_or_default(),
        run_id: String::new(),
        iteration: 0,
        timestamp: chrono::Utc::now(),
    })
}

async fn snapshot_logs(ctx: &Arc<StreamContext>, filter: &EventFilter) -> Vec<String> {
    let Some(issue_ref) = filter.issue_refs.first() else {
        return Vec::new();
    };
    ctx.backlogs.read().await.get(issue_ref).map(LogBacklog::snapshot).unwrap_or_default()
}

/// Per-issue tail cursors. `last-run.log` is append-only so a byte offset
/// is stable; `sdk-output.json` is atomically rewritten in full on every
/// phase (§4.3), so its cursor is the event count already seen rather than
/// a byte position.
#[derive(Default)]
struct TailCursor {
    last_run_log_offset: u64,
    sdk_events_seen: usize,
}

/// Poll every issue directory under `data_dir/issues` for new content in
/// `last-run.log` and `sdk-output.json`, feeding both into the backlog and
/// the live event bus. Runs until the process exits; a missing or
/// unreadable file for a given tick is skipped, not fatal.
pub async fn run_log_tailers(ctx: Arc<StreamContext>, data_dir: PathBuf, poll_interval: Duration) {
    let mut cursors: HashMap<String, TailCursor> = HashMap::new();
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        for (issue_ref, issue_dir) in discover_issue_dirs(&data_dir) {
            let cursor = cursors.entry(issue_ref.clone()).or_default();
            tail_last_run_log(&ctx, &issue_ref, &issue_dir.join("last-run.log"), cursor).await;
            tail_sdk_output(&ctx, &issue_ref, &issue_dir.join("sdk-output.json"), cursor).await;
        }
    }
}

/// `data_dir/issues/<owner>/<repo>/<issue>` -> `("owner/repo#issue", path)`.
fn discover_issue_dirs(data_dir: &Path) -> Vec<(String, PathBuf)> {
    let mut out = Vec::new();
    let Ok(owners) = std::fs::read_dir(data_dir.join("issues")) else {
        return out;
    };
    for owner_entry in owners.flatten() {
        let owner = owner_entry.file_name().to_string_lossy().into_owned();
        let Ok(repos) = std::fs::read_dir(owner_entry.path()) else { continue };
        for repo_entry in repos.flatten() {
            let repo = repo_entry.file_name().to_string_lossy().into_owned();
            let Ok(issues) = std::fs::read_dir(repo_entry.path()) else { continue };
            for issue_entry in issues.flatten() {
                let issue = issue_entry.file_name().to_string_lossy().into_owned();
                out.push((format!("{owner}/{repo}#{issue}"), issue_entry.path()));
            }
        }
    }
    out
}

async fn tail_last_run_log(ctx: &Arc<StreamContext>, issue_ref: &str, path: &Path, cursor: &mut TailCursor) {
    use std::io::{Read, Seek, SeekFrom};
    let Ok(metadata) = std::fs::metadata(path) else { return };
    let len = metadata.len();
    if len < cursor.last_run_log_offset {
        cursor.last_run_log_offset = 0;
    }
    if len == cursor.last_run_log_offset {
        return;
    }
    let Ok(mut file) = std::fs::File::open(path) else { return };
    if file.seek(SeekFrom::Start(cursor.last_run_log_offset)).is_err() {
        return;
    }
    let mut buf = String::new();
    if file.read_to_string(&mut buf).is_err() {
        return;
    }
    cursor.last_run_log_offset = len;

    let lines: Vec<String> = buf.lines().map(String::from).collect();
    if lines.is_empty() {
        return;
    }
    {
        let mut backlogs = ctx.backlogs.write().await;
        let backlog = backlogs.entry(issue_ref.to_string()).or_default();
        for line in &lines {
            backlog.push(line.clone());
        }
    }
    ctx.event_bus.publish(JeevesEvent::Logs(LogPayload { lines, reset: false })).await;
}

async fn tail_sdk_output(ctx: &Arc<StreamContext>, issue_ref: &str, path: &Path, cursor: &mut TailCursor) {
    let Ok(document) = jeeves_core::state_store::read_json::<SdkOutputDocument>(path) else {
        return;
    };
    if document.events.len() < cursor.sdk_events_seen {
        cursor.sdk_events_seen = 0;
    }
    if document.events.len() == cursor.sdk_events_seen {
        return;
    }
    for event in &document.events[cursor.sdk_events_seen..] {
        ctx.event_bus
            .publish(JeevesEvent::SdkMessage(SdkPayload {
                run_id: document.run_id.clone(),
                data: serde_json::to_value(event).unwrap_or_default(),
            }))
            .await;
    }
    cursor.sdk_events_seen = document.events.len();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_subscribe_message_round_trips() {
        let json = r#"{"type":"Subscribe","payload":{"filter":null}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Subscribe { filter: None }));
    }

    #[test]
    fn server_error_message_serializes() {
        let msg = ServerMessage::Error { code: "x".into(), message: "y".into() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"x\""));
    }

    #[test]
    fn discover_issue_dirs_walks_owner_repo_issue_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("issues/acme/widgets/7")).unwrap();
        std::fs::create_dir_all(dir.path().join("issues/acme/widgets/9")).unwrap();
        let mut found = discover_issue_dirs(dir.path());
        found.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(found.iter().map(|(r, _)| r.as_str()).collect::<Vec<_>>(), vec!["acme/widgets#7", "acme/widgets#9"]);
    }

    #[test]
    fn discover_issue_dirs_empty_when_issues_root_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_issue_dirs(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn tailing_last_run_log_pushes_new_lines_into_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("last-run.log");
        std::fs::write(&log_path, "line one\n").unwrap();

        let ctx = Arc::new(StreamContext {
            event_bus: Arc::new(EventBus::new()),
            store: Arc::new(JsonStateStore::open(dir.path().to_path_buf()).await.unwrap()),
            backlogs: Arc::new(RwLock::new(HashMap::new())),
        });
        let mut cursor = TailCursor::default();
        tail_last_run_log(&ctx, "acme/widgets#1", &log_path, &mut cursor).await;
        assert_eq!(ctx.backlogs.read().await.get("acme/widgets#1").unwrap().snapshot(), vec!["line one"]);

        use std::io::Write;
        writeln!(std::fs::OpenOptions::new().append(true).open(&log_path).unwrap(), "line two").unwrap();
        tail_last_run_log(&ctx, "acme/widgets#1", &log_path, &mut cursor).await;
        assert_eq!(
            ctx.backlogs.read().await.get("acme/widgets#1").unwrap().snapshot(),
            vec!["line one", "line two"]
        );
    }

    #[tokio::test]
    async fn tailing_sdk_output_only_publishes_unseen_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sdk-output.json");
        let doc = SdkOutputDocument {
            schema: "jeeves.sdk.v1".to_string(),
            run_id: "run.1.deadbeef".to_string(),
            success: false,
            events: Vec::new(),
        };
        jeeves_core::state_store::write_json_atomic(&path, &doc).unwrap();

        let ctx = Arc::new(StreamContext {
            event_bus: Arc::new(EventBus::new()),
            store: Arc::new(JsonStateStore::open(dir.path().to_path_buf()).await.unwrap()),
            backlogs: Arc::new(RwLock::new(HashMap::new())),
        });
        let mut cursor = TailCursor::default();
        let (_id, mut rx) = ctx.event_bus.subscribe(None).await;

        tail_sdk_output(&ctx, "acme/widgets#1", &path, &mut cursor).await;
        assert_eq!(cursor.sdk_events_seen, 0);

        let mut doc = doc;
        doc.events.push(jeeves_core::provider::ProviderEvent::Assistant { text: Some("hi".into()) });
        jeeves_core::state_store::write_json_atomic(&path, &doc).unwrap();
        tail_sdk_output(&ctx, "acme/widgets#1", &path, &mut cursor).await;
        assert_eq!(cursor.sdk_events_seen, 1);
        assert!(matches!(rx.try_recv().unwrap(), JeevesEvent::SdkMessage(_)));
    }
}
