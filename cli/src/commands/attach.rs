//! `jeeves attach`: connect to the daemon's viewer WebSocket stream and
//! print events live for a single issue (C5).
use crate::issue_ref::IssueRef;
use anyhow::{Context, Result};
use colored::Colorize;
use futures::{SinkExt, StreamExt};
use jeeves_core::events::JeevesEvent;
use jeeves_daemon::EventFilter;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum ClientMessage {
    Subscribe { filter: Option<EventFilter> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum ServerMessage {
    Snapshot { state: Option<serde_json::Value>, logs: Vec<String> },
    Event(JeevesEvent),
    SubscriptionConfirmed { subscription_id: String },
    Ping { timestamp: chrono::DateTime<chrono::Utc> },
    Error { code: String, message: String },
}

pub async fn execute(daemon_addr: &str, ws_port: u16, issue: IssueRef) -> Result<()> {
    let url = format!("ws://{daemon_addr}:{ws_port}");
    let (ws_stream, _) = connect_async(&url)
        .await
        .with_context(|| format!("failed to connect to viewer stream at {url} (is 'jeeves-daemon' running?)"))?;
    let (mut sink, mut stream) = ws_stream.split();

    let subscribe = ClientMessage::Subscribe { filter: Some(EventFilter::for_issue(issue.to_string())) };
    sink.send(WsMessage::Text(serde_json::to_string(&subscribe)?)).await?;

    println!("{} attached to {}", "●".green(), issue.to_string().bold());

    while let Some(message) = stream.next().await {
        let message = message?;
        let WsMessage::Text(text) = message else { continue };
        match serde_json::from_str::<ServerMessage>(&text) {
            Ok(ServerMessage::Snapshot { state, logs }) => {
                if let Some(state) = state {
                    println!("{} {state}", "state".dimmed());
                }
                for line in logs {
                    print!("{line}");
                }
            }
            Ok(ServerMessage::Event(event)) => print_event(&event),
            Ok(ServerMessage::SubscriptionConfirmed { .. }) => {}
            Ok(ServerMessage::Ping { .. }) => {}
            Ok(ServerMessage::Error { code, message }) => {
                eprintln!("{} {code}: {message}", "error".red());
            }
            Err(err) => eprintln!("{} malformed server message: {err}", "warn".yellow()),
        }
    }
    println!("\n{} stream closed", "●".dimmed());
    Ok(())
}

fn print_event(event: &JeevesEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("{event:?}"),
    }
}
