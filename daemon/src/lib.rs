//! Jeeves daemon: the event bus and viewer WebSocket stream (C5) plus a
//! small HTTP control API the CLI uses to start/cancel/query runs
//! (spec.md §6). Everything phase-/workflow-/state-related lives in
//! `jeeves-core`; this crate only adds the network-facing surface.

pub mod config;
pub mod errors;
pub mod event_stream;
pub mod events;
pub mod handlers;
pub mod server;

pub use config::DaemonConfig;
pub use errors::{DaemonError, DaemonResult};
pub use events::{EventBus, EventFilter};
pub use handlers::AppState;
pub use server::Server;

/// Daemon version, reported in logs and the `/healthz` body.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
