//! Integration coverage for the HTTP control API (spec.md §6): starting the
//! server against a throwaway data dir and hitting `/healthz` confirms the
//! hyper listener and engine config wiring agree without needing a real
//! provider or workflow file.
use jeeves_core::Config as EngineConfig;
use jeeves_daemon::{DaemonConfig, Server};
use std::time::Duration;
use tempfile::tempdir;

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn healthz_responds_ok() {
    let dir = tempdir().unwrap();
    let mut engine_config = EngineConfig::default();
    engine_config.data_dir = dir.path().display().to_string();

    let mut daemon_config = DaemonConfig::default();
    daemon_config.server.port = free_port().await;
    daemon_config.server.ws_port = free_port().await;

    let server = Server::new(daemon_config.clone(), engine_config).await.unwrap();
    let handle = tokio::spawn(async move { server.run().await });

    tokio::time::sleep(Duration::from_millis(200)).await;

    let url = format!("http://{}:{}/healthz", daemon_config.server.addr, daemon_config.server.port);
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    handle.abort();
}

#[tokio::test]
async fn unknown_run_returns_404() {
    let dir = tempdir().unwrap();
    let mut engine_config = EngineConfig::default();
    engine_config.data_dir = dir.path().display().to_string();

    let mut daemon_config = DaemonConfig::default();
    daemon_config.server.port = free_port().await;
    daemon_config.server.ws_port = free_port().await;

    let server = Server::new(daemon_config.clone(), engine_config).await.unwrap();
    let handle = tokio::spawn(async move { server.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let url = format!("http://{}:{}/runs/does-not-exist", daemon_config.server.addr, daemon_config.server.port);
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    handle.abort();
}
