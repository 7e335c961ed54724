//! HTTP control API + WebSocket viewer stream listeners (spec.md §4.5, §6).
//!
//! Two listeners, same bind address, per the teacher's split between a
//! `hyper`-routed control API and a raw `tokio_tungstenite` WebSocket
//! acceptor: the control API starts/cancels/queries runs, the WebSocket
//! listener streams the live event bus to viewers.
use crate::config::DaemonConfig;
use crate::errors::{DaemonError, DaemonResult};
use crate::event_stream::{handle_event_stream, run_log_tailers, StreamContext};
use crate::events::EventBus;
use crate::handlers::{AppState, StartRunRequest};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server as HyperServer, StatusCode};
use jeeves_core::{Config, JsonStateStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Ties the HTTP control API and the WebSocket viewer stream together
/// behind one [`AppState`]; `run()` drives both listeners until either
/// exits or the process is signalled to stop (see `main.rs`).
pub struct Server {
    daemon_config: DaemonConfig,
    state: Arc<AppState>,
    stream_ctx: Arc<StreamContext>,
}

impl Server {
    pub async fn new(daemon_config: DaemonConfig, engine_config: Config) -> DaemonResult<Self> {
        daemon_config.validate()?;
        engine_config.validate().map_err(|e| DaemonError::Config(e.to_string()))?;

        let store = Arc::new(JsonStateStore::open(engine_config.data_dir()).await.map_err(jeeves_core::EngineError::from)?);
        let event_bus = Arc::new(EventBus::new());
        let state = Arc::new(AppState::new(engine_config, store.clone(), event_bus.clone()));
        let stream_ctx = Arc::new(StreamContext {
            event_bus,
            store,
            backlogs: Arc::new(RwLock::new(HashMap::new())),
        });

        Ok(Self { daemon_config, state, stream_ctx })
    }

    pub async fn run(self) -> DaemonResult<()> {
        let http_addr: std::net::SocketAddr =
            format!("{}:{}", self.daemon_config.server.addr, self.daemon_config.server.port)
                .parse()
                .map_err(|e| DaemonError::Config(format!("invalid server address: {e}")))?;
        let ws_addr: std::net::SocketAddr =
            format!("{}:{}", self.daemon_config.server.addr, self.daemon_config.server.ws_port)
                .parse()
                .map_err(|e| DaemonError::Config(format!("invalid ws address: {e}")))?;

        let state = self.state.clone();
        let make_svc = make_service_fn(move |_conn| {
            let state = state.clone();
            async move { Ok::<_, std::convert::Infallible>(service_fn(move |req| route(req, state.clone()))) }
        });
        let http_server = HyperServer::bind(&http_addr).serve(make_svc);
        info!(%http_addr, "control API listening");

        let tailer_ctx = self.stream_ctx.clone();
        let tailer_data_dir = self.state.config.data_dir();
        let tailer_interval = std::time::Duration::from_millis(self.daemon_config.server.tail_poll_interval_ms);
        tokio::spawn(run_log_tailers(tailer_ctx, tailer_data_dir, tailer_interval));

        let stream_ctx = self.stream_ctx.clone();
        let ws_listener = TcpListener::bind(ws_addr)
            .await
            .map_err(|e| DaemonError::Config(format!("failed to bind ws listener on {ws_addr}: {e}")))?;
        info!(%ws_addr, "viewer event stream listening");
        let ws_task = tokio::spawn(async move {
            loop {
                match ws_listener.accept().await {
                    Ok((stream, peer)) => {
                        let ctx = stream_ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_event_stream(stream, ctx).await {
                                error!(%peer, error = %e, "event stream connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "ws accept failed"),
                }
            }
        });

        tokio::select! {
            result = http_server => {
                result.map_err(|e| DaemonError::Config(format!("http server error: {e}")))?;
            }
            _ = ws_task => {}
        }
        Ok(())
    }
}

async fn route(req: Request<Body>, state: Arc<AppState>) -> Result<Response<Body>, std::convert::Infallible> {
    let result = dispatch(req, state).await;
    Ok(match result {
        Ok(response) => response,
        Err(err) => error_response(err),
    })
}

fn error_response(err: DaemonError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({ "error": err.to_string() });
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::from("internal error")))
}

async fn dispatch(req: Request<Body>, state: Arc<AppState>) -> DaemonResult<Response<Body>> {
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (req.method(), segments.as_slice()) {
        (&Method::GET, ["healthz"]) => json_response(StatusCode::OK, &json!({ "status": "ok" })),
        (&Method::POST, ["runs"]) => {
            let body = read_json_body(req).await?;
            let request: StartRunRequest = serde_json::from_slice(&body)?;
            let response = state.start_run(request).await?;
            json_response(StatusCode::ACCEPTED, &response)
        }
        (&Method::GET, ["runs"]) => {
            let active = state.list_active_runs().await;
            json_response(StatusCode::OK, &json!({ "active_runs": active }))
        }
        (&Method::GET, ["runs", run_id]) => {
            let response = state.get_run(run_id)?;
            json_response(StatusCode::OK, &response)
        }
        (&Method::POST, ["runs", run_id, "cancel"]) => {
            state.cancel_run(run_id).await?;
            json_response(StatusCode::OK, &json!({ "cancelled": run_id }))
        }
        (&Method::GET, ["issues", owner, repo, issue]) => {
            let issue_number: u64 = issue
                .parse()
                .map_err(|_| DaemonError::InvalidRequest(format!("invalid issue number: {issue}")))?;
            let response = state.get_issue(owner, repo, issue_number)?;
            json_response(StatusCode::OK, &response)
        }
        _ => Err(DaemonError::InvalidRequest(format!("no route for {} {}", req.method(), path))),
    }
}

async fn read_json_body(req: Request<Body>) -> DaemonResult<bytes::Bytes> {
    hyper::body::to_bytes(req.into_body()).await.map_err(|e| DaemonError::InvalidRequest(e.to_string()))
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> DaemonResult<Response<Body>> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .map_err(|e| DaemonError::InvalidRequest(e.to_string()))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthz_route_segments_parse() {
        let segments: Vec<&str> = "/healthz".trim_matches('/').split('/').collect();
        assert_eq!(segments, vec!["healthz"]);
    }
}
