//! Daemon error taxonomy: thin wrapper over `jeeves_core::EngineError` plus
//! the config/transport errors the daemon itself introduces. Mapped to HTTP
//! status codes at the single point `server.rs` turns an error into a
//! response.
use thiserror::Error;

pub type DaemonResult<T> = Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("issue not found: {0}")]
    IssueNotFound(String),

    #[error(transparent)]
    Engine(#[from] jeeves_core::EngineError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DaemonError {
    /// HTTP status code this error maps to onto the daemon's small control
    /// API: client-shaped errors are 4xx, everything else 500.
    pub fn status_code(&self) -> u16 {
        match self {
            DaemonError::RunNotFound(_) | DaemonError::IssueNotFound(_) => 404,
            DaemonError::InvalidRequest(_) | DaemonError::Serialization(_) => 400,
            DaemonError::Config(_) | DaemonError::Engine(_) | DaemonError::Io(_) => 500,
        }
    }
}
