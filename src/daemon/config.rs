//! Configuration management for the agent
//!
//! Handles TOML configuration parsing, defaults and validation. Every field
//! has a default, so a partial file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::models::LockPolicy;
use crate::monitor::{InventoryKind, ThrottleSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine the user configuration directory")]
    NoConfigDir,
}

/// Main agent configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfiguration {
    pub agent: AgentSettings,
    pub remote: RemoteSettings,
    pub throttle: ThrottleConfig,
    pub defaults: DefaultPolicy,
    pub context: ContextSettings,
}

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Tick interval in seconds (0.5-300.0)
    pub tick_interval: f64,
    /// Upper bound for each external phase of a tick, in seconds
    pub phase_timeout: f64,
    /// Process inventory backend
    pub inventory: InventoryKind,
}

/// Backend endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Base URL; `config/lock`, `exams/{id}` and `alerts` are resolved against it
    pub api_base: String,
    /// HTTP request timeout in seconds
    pub request_timeout: f64,
}

/// Violation throttling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Seconds between two admitted alerts for one process
    pub dedup_interval: f64,
    /// Admitted alerts allowed per window, all processes combined
    pub max_alerts_per_window: u32,
    /// Quota window in seconds
    pub window: f64,
}

/// Policy used until the first successful remote fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPolicy {
    pub allowed_apps: Vec<String>,
    pub forbidden_apps: Vec<String>,
    pub auto_kill: bool,
    pub repeat_threshold: u32,
}

/// Where the session identity comes from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// JSON file written by the presentation layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL_SECS,
            phase_timeout: DEFAULT_PHASE_TIMEOUT_SECS,
            inventory: InventoryKind::default(),
        }
    }
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            dedup_interval: DEFAULT_DEDUP_INTERVAL_SECS,
            max_alerts_per_window: DEFAULT_MAX_ALERTS_PER_WINDOW,
            window: DEFAULT_ALERT_WINDOW_SECS,
        }
    }
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            allowed_apps: DEFAULT_ALLOWED_APPS.iter().map(|s| s.to_string()).collect(),
            forbidden_apps: DEFAULT_FORBIDDEN_APPS.iter().map(|s| s.to_string()).collect(),
            auto_kill: false,
            repeat_threshold: DEFAULT_REPEAT_THRESHOLD,
        }
    }
}

impl AgentConfiguration {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it exists,
    /// else use built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_config_path() {
            Ok(default_path) if default_path.exists() => Self::load_from_file(&default_path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/examlock/agent.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Validate ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tick = self.agent.tick_interval;
        if !(TICK_INTERVAL_MIN..=TICK_INTERVAL_MAX).contains(&tick) {
            return Err(ConfigError::Invalid(format!(
                "tick_interval {} must be between {} and {} seconds",
                tick, TICK_INTERVAL_MIN, TICK_INTERVAL_MAX
            )));
        }
        if !(self.agent.phase_timeout > 0.0 && self.agent.phase_timeout < tick) {
            return Err(ConfigError::Invalid(format!(
                "phase_timeout {} must be positive and below tick_interval {}",
                self.agent.phase_timeout, tick
            )));
        }
        if !(self.remote.request_timeout > 0.0 && self.remote.request_timeout.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "request_timeout {} must be a positive number of seconds",
                self.remote.request_timeout
            )));
        }
        url::Url::parse(&self.remote.api_base).map_err(|e| {
            ConfigError::Invalid(format!("api_base '{}' is not a valid URL: {}", self.remote.api_base, e))
        })?;
        if !(self.throttle.dedup_interval >= 0.0 && self.throttle.dedup_interval.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "dedup_interval {} must be zero or more seconds",
                self.throttle.dedup_interval
            )));
        }
        if self.throttle.max_alerts_per_window == 0 {
            return Err(ConfigError::Invalid(
                "max_alerts_per_window must be at least 1".to_string(),
            ));
        }
        if !(self.throttle.window > 0.0 && self.throttle.window.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "window {} must be a positive number of seconds",
                self.throttle.window
            )));
        }
        if self.defaults.repeat_threshold == 0 {
            return Err(ConfigError::Invalid("repeat_threshold must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(self.agent.tick_interval)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.agent.phase_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.remote.request_timeout)
    }

    pub fn throttle_settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            dedup_interval: Duration::from_secs_f64(self.throttle.dedup_interval),
            max_alerts_per_window: self.throttle.max_alerts_per_window,
            window: Duration::from_secs_f64(self.throttle.window),
        }
    }

    pub fn default_policy(&self) -> LockPolicy {
        LockPolicy::new(
            self.defaults.allowed_apps.iter().cloned(),
            self.defaults.forbidden_apps.iter().cloned(),
            self.defaults.auto_kill,
            self.defaults.repeat_threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfiguration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), Duration::from_secs(4));
        assert_eq!(config.throttle_settings(), ThrottleSettings::default());
        assert_eq!(config.default_policy(), LockPolicy::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        fs::write(
            &path,
            r#"
[agent]
tick_interval = 2.0
phase_timeout = 1.5
inventory = "command"

[defaults]
forbidden_apps = ["zoom.exe"]
auto_kill = true
"#,
        )
        .unwrap();

        let config = AgentConfiguration::load_from_file(&path).unwrap();
        assert_eq!(config.agent.inventory, InventoryKind::Command);
        assert_eq!(config.tick_interval(), Duration::from_secs(2));
        assert_eq!(config.defaults.forbidden_apps, vec!["zoom.exe"]);
        assert!(config.defaults.auto_kill);
        assert_eq!(config.defaults.repeat_threshold, DEFAULT_REPEAT_THRESHOLD);
        assert_eq!(config.remote.api_base, DEFAULT_API_BASE);
        assert_eq!(config.throttle.max_alerts_per_window, 10);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let mut config = AgentConfiguration::default();
        config.agent.tick_interval = 0.1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AgentConfiguration::default();
        config.agent.phase_timeout = 5.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AgentConfiguration::default();
        config.throttle.max_alerts_per_window = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AgentConfiguration::default();
        config.defaults.repeat_threshold = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AgentConfiguration::default();
        config.remote.api_base = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_wrong_types_fail_to_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[defaults]\nauto_kill = \"yes\"\n").unwrap();

        assert!(matches!(
            AgentConfiguration::load_from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let result = AgentConfiguration::load_from_file(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_toml_round_trip_preserves_values() {
        let mut config = AgentConfiguration::default();
        config.context.session_file = Some(PathBuf::from("/tmp/session.json"));
        config.defaults.auto_kill = true;

        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[agent]"));
        let parsed: AgentConfiguration = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
