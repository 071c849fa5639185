//! Shared wiring for subcommands: config location, store and machine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use rhythmguard_core::gate::{self, AccessGate, NoopGate};
use rhythmguard_core::{Config, Database, FileSettings, SessionMachine, SystemClock};

/// Whether a command may touch the access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Build the gate from `[gate]`; fails without credentials.
    Live,
    /// Read-only commands never call the gate.
    Offline,
}

pub struct Context {
    pub config_path: PathBuf,
    db_override: Option<PathBuf>,
}

impl Context {
    pub fn new(config: Option<PathBuf>, db: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match config {
            Some(path) => path,
            None => Config::default_path()?,
        };
        Ok(Self {
            config_path,
            db_override: db,
        })
    }

    /// Load the config, writing defaults on first use.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        if !self.config_path.exists() {
            let config = Config::default();
            config.save_to(&self.config_path)?;
            return Ok(config);
        }
        Ok(Config::load_from(&self.config_path)?)
    }

    pub fn db_path(&self, config: &Config) -> anyhow::Result<PathBuf> {
        match &self.db_override {
            Some(path) => Ok(path.clone()),
            None => Ok(config.db_path()?),
        }
    }

    pub fn machine(&self, config: &Config, mode: GateMode) -> anyhow::Result<Arc<SessionMachine>> {
        let db_path = self.db_path(config)?;
        let db = Database::open(&db_path)
            .with_context(|| format!("opening store at {}", db_path.display()))?;

        let gate: Arc<dyn AccessGate> = match mode {
            GateMode::Live => gate::from_config(&config.gate).context("building access gate")?,
            GateMode::Offline => Arc::new(NoopGate),
        };

        Ok(Arc::new(SessionMachine::new(
            db,
            Arc::new(FileSettings::new(&self.config_path)),
            gate,
            Arc::new(SystemClock),
            config.gate.allowed_minutes.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let ctx = Context::new(Some(path.clone()), None).unwrap();

        let config = ctx.load_config().unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn db_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("other.db");
        let ctx = Context::new(Some(dir.path().join("config.toml")), Some(db.clone())).unwrap();

        let mut config = Config::default();
        config.server.db_path = Some(dir.path().join("from-config.db"));
        assert_eq!(ctx.db_path(&config).unwrap(), db);
    }

    #[tokio::test]
    async fn offline_machine_reads_store() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(
            Some(dir.path().join("config.toml")),
            Some(dir.path().join("rhythmguard.db")),
        )
        .unwrap();
        let config = ctx.load_config().unwrap();

        let machine = ctx.machine(&config, GateMode::Offline).unwrap();
        assert!(machine.current().await.unwrap().is_none());
        assert!(machine.today().await.unwrap().is_empty());
    }
}
