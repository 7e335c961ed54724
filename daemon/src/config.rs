//! Daemon configuration: the HTTP control API listen address plus the
//! data/workflow directories it hands to `jeeves-core` when opening a state
//! store. Kept deliberately small — auth, connection pooling, and metrics
//! ports belong to a deployment wrapper, not this binary.
use crate::errors::{DaemonError, DaemonResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP control API bind address.
    pub addr: String,
    pub port: u16,
    /// WebSocket viewer stream bind port, on the same `addr` (spec.md §4.5).
    /// Kept on a separate listener from the control API's hyper server
    /// because the event stream speaks raw WebSocket framing over a plain
    /// `TcpStream` (teacher pattern), not an upgrade negotiated through a
    /// higher-level HTTP framework.
    pub ws_port: u16,
    pub request_timeout_secs: u64,
    /// Interval at which file tailers poll `last-run.log` / `sdk-output.json`
    /// for new content (spec.md §4.5, 100-250ms).
    pub tail_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            addr: "127.0.0.1".to_string(),
            port: 4590,
            ws_port: 4591,
            request_timeout_secs: 30,
            tail_poll_interval_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            stdout: true,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &str) -> DaemonResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DaemonError::Config(format!("failed to read config file: {e}")))?;
        toml::from_str(&content).map_err(|e| DaemonError::Config(format!("failed to parse config: {e}")))
    }

    pub fn load_or_default(path: Option<&str>) -> DaemonResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> DaemonResult<()> {
        if self.server.port == 0 {
            return Err(DaemonError::Config("server.port must be non-zero".to_string()));
        }
        if self.server.tail_poll_interval_ms == 0 {
            return Err(DaemonError::Config(
                "server.tail_poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_port_is_invalid() {
        let mut config = DaemonConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = DaemonConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: DaemonConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }
}
