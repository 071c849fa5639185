//! Enforcement scheduler.
//!
//! Two independent ticks run against the shared [`SessionMachine`]: the
//! sweep force-completes sessions past their frozen expiry, and the evening
//! tick flips evening mode once the cutoff passes. A failing tick is logged
//! and retried on the next one, and so is a gate close that failed earlier.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::session::{Completion, CompletionResult, SessionMachine};
use crate::storage::SchedulerConfig;

/// Outcome of one sweep tick.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Completions this tick won or found already recorded.
    pub completed: Vec<CompletionResult>,
    pub failed: usize,
    /// A previously failed gate close went through this tick.
    pub block_retried: bool,
}

impl SweepReport {
    pub fn forced_count(&self) -> usize {
        self.completed.iter().filter(|r| !r.already_completed).count()
    }
}

pub struct EnforcementScheduler {
    machine: Arc<SessionMachine>,
    sweep_every: Duration,
    evening_every: Duration,
}

impl EnforcementScheduler {
    pub fn new(machine: Arc<SessionMachine>, config: &SchedulerConfig) -> Self {
        Self {
            machine,
            sweep_every: Duration::from_secs(config.sweep_interval_secs.max(1)),
            evening_every: Duration::from_secs(config.evening_interval_secs.max(1)),
        }
    }

    /// Force-complete every active session whose expiry has passed.
    pub async fn sweep_once(&self) -> crate::Result<SweepReport> {
        let mut report = SweepReport {
            block_retried: self.machine.retry_failed_block().await?,
            ..SweepReport::default()
        };
        let expired = self.machine.expired_sessions().await?;

        for session in expired {
            match self.machine.complete(&session.id, Completion::Forced).await {
                Ok(result) => {
                    if result.already_completed {
                        debug!(session_id = %session.id, "sweep lost race, already completed");
                    } else {
                        info!(
                            session_id = %session.id,
                            kind = %session.kind,
                            planned_minutes = session.planned_minutes,
                            "forced completion"
                        );
                    }
                    report.completed.push(result);
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "forced completion failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn evening_once(&self) -> crate::Result<bool> {
        self.machine.refresh_evening_mode().await
    }

    /// Run both ticks until the task is dropped or aborted.
    pub async fn run(self) {
        self.tick_sweep().await;
        self.tick_evening().await;

        let mut sweep = tokio::time::interval(self.sweep_every);
        let mut evening = tokio::time::interval(self.evening_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        evening.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick of an interval fires immediately; those ran above.
        sweep.tick().await;
        evening.tick().await;

        info!(
            sweep_secs = self.sweep_every.as_secs(),
            evening_secs = self.evening_every.as_secs(),
            "enforcement scheduler running"
        );
        loop {
            tokio::select! {
                _ = sweep.tick() => self.tick_sweep().await,
                _ = evening.tick() => self.tick_evening().await,
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn tick_sweep(&self) {
        match self.sweep_once().await {
            Ok(report) if report.failed > 0 => {
                warn!(failed = report.failed, "sweep finished with failures")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "sweep failed"),
        }
    }

    async fn tick_evening(&self) {
        if let Err(e) = self.evening_once().await {
            error!(error = %e, "evening refresh failed");
        }
    }
}
