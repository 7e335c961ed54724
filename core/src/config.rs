//! Engine configuration: defaults -> `jeeves.toml` -> `JEEVES_*` env vars ->
//! CLI overrides. Invalid configuration is fatal at startup, never a silent
//! fallback to defaults.
use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpEnforcementDefault {
    Strict,
    AllowDegraded,
}

impl Default for McpEnforcementDefault {
    fn default() -> Self {
        McpEnforcementDefault::Strict
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub default_enforcement: McpEnforcementDefault,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self { default_enforcement: McpEnforcementDefault::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` for a TTY, `json` for a non-TTY; `auto` defers to
    /// [`LoggingConfig::resolve_format`] at startup.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl LoggingConfig {
    pub fn resolve_format(&self, is_tty: bool) -> &'static str {
        match self.format.as_str() {
            "json" => "json",
            "pretty" => "pretty",
            _ => {
                if is_tty {
                    "pretty"
                } else {
                    "json"
                }
            }
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Directory PATs are read from before being materialized into
    /// `<worktree>/.env.jeeves`.
    #[serde(default = "default_secrets_dir")]
    pub dir: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { dir: default_secrets_dir() }
    }
}

fn default_secrets_dir() -> String {
    "secrets".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: String,
    #[serde(default = "default_repos_dir")]
    pub repos_dir: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_wallclock_secs")]
    pub default_max_wallclock_secs: u64,
    #[serde(default = "default_inactivity_secs")]
    pub default_inactivity_timeout_secs: u64,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            workflows_dir: default_workflows_dir(),
            repos_dir: default_repos_dir(),
            max_iterations: default_max_iterations(),
            default_max_wallclock_secs: default_wallclock_secs(),
            default_inactivity_timeout_secs: default_inactivity_secs(),
            mcp: McpConfig::default(),
            logging: LoggingConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|d| d.join("jeeves").to_string_lossy().into_owned())
        .unwrap_or_else(|| ".jeeves".to_string())
}

fn default_workflows_dir() -> String {
    "workflows".to_string()
}

fn default_repos_dir() -> String {
    "repos".to_string()
}

fn default_max_iterations() -> u32 {
    50
}

fn default_wallclock_secs() -> u64 {
    1800
}

fn default_inactivity_secs() -> u64 {
    300
}

impl Config {
    /// Load per the precedence order: built-in defaults -> `jeeves.toml`
    /// (either at `explicit_path` or `$JEEVES_CONFIG`) -> `JEEVES_*` env
    /// vars. CLI flag overrides are applied by the caller after this
    /// returns, via the individual setters below.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, EngineError> {
        let path = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("JEEVES_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading config");
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;
                toml::from_str(&content)
                    .map_err(|e| EngineError::Config(format!("invalid config at {}: {e}", path.display())))?
            }
            Some(path) => {
                return Err(EngineError::Config(format!(
                    "config file not found at {}",
                    path.display()
                )))
            }
            None => {
                debug!("no config file specified, starting from defaults");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("JEEVES_DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = std::env::var("JEEVES_WORKFLOWS_DIR") {
            self.workflows_dir = v;
        }
        if let Ok(v) = std::env::var("JEEVES_MAX_ITERATIONS") {
            if let Ok(parsed) = v.parse() {
                self.max_iterations = parsed;
            } else {
                warn!(value = %v, "ignoring unparseable JEEVES_MAX_ITERATIONS");
            }
        }
        if let Ok(v) = std::env::var("JEEVES_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Fatal, never a silent fallback: an invalid config aborts startup as
    /// a `workflow_invalid`-class error.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_iterations == 0 {
            return Err(EngineError::Config("max_iterations must be greater than 0".into()));
        }
        if self.default_max_wallclock_secs == 0 {
            return Err(EngineError::Config("default_max_wallclock_secs must be greater than 0".into()));
        }
        if self.data_dir.trim().is_empty() {
            return Err(EngineError::Config("data_dir must not be empty".into()));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        let workflows = PathBuf::from(&self.workflows_dir);
        if workflows.is_absolute() {
            workflows
        } else {
            self.data_dir().join(workflows)
        }
    }

    /// Same relative-nests-under-`data_dir` rule as [`Config::workflows_dir`].
    /// Each `owner/repo`'s canonical bare-ish clone (the repository a fan-out
    /// phase's worker sandboxes branch their worktrees from) lives under
    /// `repos_dir/<owner>/<repo>`.
    pub fn repos_dir(&self) -> PathBuf {
        let repos = PathBuf::from(&self.repos_dir);
        if repos.is_absolute() {
            repos
        } else {
            self.data_dir().join(repos)
        }
    }

    /// Same relative-nests-under-`data_dir` rule as [`Config::workflows_dir`],
    /// applied to `[secrets].dir`.
    pub fn secrets_dir(&self) -> PathBuf {
        let secrets = PathBuf::from(&self.secrets.dir);
        if secrets.is_absolute() {
            secrets
        } else {
            self.data_dir().join(secrets)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_max_iterations_is_invalid() {
        let mut config = Config::default();
        config.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.max_iterations, config.max_iterations);
        assert_eq!(parsed.data_dir, config.data_dir);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let result = Config::load(Some(Path::new("/nonexistent/jeeves.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn workflows_dir_resolves_relative_to_data_dir() {
        let mut config = Config::default();
        config.data_dir = "/tmp/jeeves-data".into();
        config.workflows_dir = "workflows".into();
        assert_eq!(config.workflows_dir(), PathBuf::from("/tmp/jeeves-data/workflows"));
    }

    #[test]
    fn secrets_dir_resolves_relative_to_data_dir() {
        let mut config = Config::default();
        config.data_dir = "/tmp/jeeves-data".into();
        config.secrets.dir = "secrets".into();
        assert_eq!(config.secrets_dir(), PathBuf::from("/tmp/jeeves-data/secrets"));
    }

    #[test]
    fn repos_dir_resolves_relative_to_data_dir() {
        let mut config = Config::default();
        config.data_dir = "/tmp/jeeves-data".into();
        config.repos_dir = "repos".into();
        assert_eq!(config.repos_dir(), PathBuf::from("/tmp/jeeves-data/repos"));
    }

    #[test]
    fn absolute_secrets_dir_is_unchanged() {
        let mut config = Config::default();
        config.data_dir = "/tmp/jeeves-data".into();
        config.secrets.dir = "/etc/jeeves/secrets".into();
        assert_eq!(config.secrets_dir(), PathBuf::from("/etc/jeeves/secrets"));
    }
}
