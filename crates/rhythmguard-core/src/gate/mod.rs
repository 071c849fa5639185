//! Access gate adapters.
//!
//! The gate controls reachability of one restricted domain. A gated session
//! opens it on start and closes it on completion or abandon. Both calls must
//! be idempotent: retries and racing completions may repeat them.

mod denylist;

pub use denylist::DenylistGate;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::storage::GateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Unblock,
    Block,
}

/// Every access gate implements this trait.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// Unique identifier (e.g. "denylist", "noop").
    fn name(&self) -> &str;

    /// Make the restricted domain reachable.
    async fn unblock(&self) -> Result<(), GateError>;

    /// Make the restricted domain unreachable again.
    async fn block(&self) -> Result<(), GateError>;
}

/// Gate used when enforcement is switched off in the config.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopGate;

#[async_trait]
impl AccessGate for NoopGate {
    fn name(&self) -> &str {
        "noop"
    }

    async fn unblock(&self) -> Result<(), GateError> {
        tracing::info!("gate disabled, skipping unblock");
        Ok(())
    }

    async fn block(&self) -> Result<(), GateError> {
        tracing::info!("gate disabled, skipping block");
        Ok(())
    }
}

/// Build the gate described by `config`.
///
/// # Errors
/// Fails when the gate is enabled but its URL or credentials are unusable.
pub fn from_config(config: &GateConfig) -> Result<Arc<dyn AccessGate>, GateError> {
    if !config.enabled {
        return Ok(Arc::new(NoopGate));
    }
    let api_key = std::env::var(&config.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| GateError::MissingCredentials(config.api_key_env.clone()))?;
    Ok(Arc::new(DenylistGate::new(config, api_key)?))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Counts calls and fails on demand.
    #[derive(Debug, Default)]
    pub struct RecordingGate {
        pub unblocks: AtomicUsize,
        pub blocks: AtomicUsize,
        pub fail_unblock: AtomicBool,
        pub fail_block: AtomicBool,
        /// Suspend once inside `unblock`, letting a racing task run.
        pub yield_on_unblock: AtomicBool,
    }

    impl RecordingGate {
        pub fn unblock_count(&self) -> usize {
            self.unblocks.load(Ordering::SeqCst)
        }

        pub fn block_count(&self) -> usize {
            self.blocks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AccessGate for RecordingGate {
        fn name(&self) -> &str {
            "recording"
        }

        async fn unblock(&self) -> Result<(), GateError> {
            self.unblocks.fetch_add(1, Ordering::SeqCst);
            if self.yield_on_unblock.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
            if self.fail_unblock.load(Ordering::SeqCst) {
                return Err(GateError::Timeout);
            }
            Ok(())
        }

        async fn block(&self) -> Result<(), GateError> {
            self.blocks.fetch_add(1, Ordering::SeqCst);
            if self.fail_block.load(Ordering::SeqCst) {
                return Err(GateError::Http {
                    status: 500,
                    body: "boom".into(),
                });
            }
            Ok(())
        }
    }
}
