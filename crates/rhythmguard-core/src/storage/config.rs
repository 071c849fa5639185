//! TOML-based application configuration.
//!
//! Sections:
//! - `[rhythm]`: session and break tunables (see [`Settings`])
//! - `[gate]`: the denylist API that controls the restricted domain
//! - `[scheduler]`: enforcement tick intervals
//! - `[server]`: HTTP listen address and database location
//!
//! Configuration is stored at `~/.config/rhythmguard/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;
use crate::settings::Settings;

/// Access gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// When false the gate is a logging no-op.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gate_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub profile_id: String,
    /// The one restricted domain.
    #[serde(default = "default_gate_domain")]
    pub domain: String,
    /// Lengths a gated session may be started with.
    #[serde(default = "default_allowed_minutes")]
    pub allowed_minutes: Vec<u32>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_gate_timeout")]
    pub timeout_secs: u64,
}

/// Enforcement scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_evening_interval")]
    pub evening_interval_secs: u64,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Database file. Defaults to `rhythmguard.db` in the data directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rhythm: Settings,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

// Default functions
fn default_true() -> bool {
    true
}
fn default_gate_base_url() -> String {
    "https://api.nextdns.io".into()
}
fn default_gate_domain() -> String {
    "youtube.com".into()
}
fn default_allowed_minutes() -> Vec<u32> {
    vec![15, 30, 45, 60]
}
fn default_api_key_env() -> String {
    "RHYTHMGUARD_GATE_API_KEY".into()
}
fn default_gate_timeout() -> u64 {
    5
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_evening_interval() -> u64 {
    60
}
fn default_listen() -> String {
    "127.0.0.1:8787".into()
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_gate_base_url(),
            profile_id: String::new(),
            domain: default_gate_domain(),
            allowed_minutes: default_allowed_minutes(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_gate_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            evening_interval_secs: default_evening_interval(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            db_path: None,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::MissingKey(key.to_string());
        let bad_value = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| bad_value(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(bad_value(format!("cannot parse '{value}' as integer")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| bad_value(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location of the config file.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if !path.exists() {
            let cfg = Self::default();
            cfg.save_to(&path)?;
            return Ok(cfg);
        }
        Self::load_from(&path)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rhythm.validate()?;
        if self.gate.allowed_minutes.is_empty() || self.gate.allowed_minutes.contains(&0) {
            return Err(ConfigError::InvalidValue {
                key: "gate.allowed_minutes".into(),
                message: "must list at least one positive length".into(),
            });
        }
        if self.scheduler.sweep_interval_secs == 0 || self.scheduler.evening_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "scheduler".into(),
                message: "intervals must be positive".into(),
            });
        }
        Ok(())
    }

    /// Resolved database path.
    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.server.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("rhythmguard.db")),
        }
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. The result must still validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
