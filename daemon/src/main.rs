//! Jeeves daemon entry point: loads the engine config (`jeeves-core`) and
//! the daemon's own network config, then serves the HTTP control API and
//! the WebSocket viewer stream until signalled to stop.
use clap::Parser;
use jeeves_core::Config as EngineConfig;
use jeeves_daemon::{DaemonConfig, Server};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jeeves-daemon", about = "Event bus and control API for the Jeeves execution engine", version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Daemon network config file (TOML); engine config comes from
    /// `jeeves.toml` / `JEEVES_CONFIG` per `jeeves-core`'s own precedence.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    engine_config: Option<PathBuf>,

    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    #[arg(long, value_name = "PORT")]
    ws_port: Option<u16>,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let mut daemon_config = match &args.config {
        Some(path) => DaemonConfig::load(path.to_str().expect("config path must be valid UTF-8"))?,
        None => DaemonConfig::default(),
    };
    if let Some(port) = args.port {
        daemon_config.server.port = port;
    }
    if let Some(ws_port) = args.ws_port {
        daemon_config.server.ws_port = ws_port;
    }

    let engine_config = EngineConfig::load(args.engine_config.as_deref())?;

    tracing::info!(version = jeeves_daemon::VERSION, "starting jeeves daemon");

    let server = Server::new(daemon_config, engine_config).await?;

    let shutdown = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received CTRL+C"),
            _ = terminate => tracing::info!("received SIGTERM"),
        }
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with error");
                std::process::exit(1);
            }
        }
        _ = shutdown => {
            tracing::info!("shutting down jeeves daemon");
        }
    }

    Ok(())
}
