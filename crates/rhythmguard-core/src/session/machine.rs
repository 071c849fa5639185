//! Session state machine.
//!
//! All three completion triggers (the human end call, the client timer and
//! the enforcement sweep) go through [`SessionMachine::complete`]. The store
//! lock is only held for synchronous SQLite work and is always released
//! before the access gate is called.

use std::sync::Arc;

use chrono::SubsecRound;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    policy, BreakStatus, CanStart, Completion, CompletionResult, Questionnaire, Session,
    SessionKind, StartRequest,
};
use crate::clock::Clock;
use crate::error::{CoreError, Rejection, Result};
use crate::events::Event;
use crate::gate::{AccessGate, GateAction};
use crate::settings::{Settings, SettingsSource};
use crate::storage::{AppStateRecord, ClaimOutcome, Database, NewSession};

const EVENT_CAPACITY: usize = 64;

/// The session state machine and the context it mutates.
pub struct SessionMachine {
    db: Mutex<Database>,
    settings: Arc<dyn SettingsSource>,
    gate: Arc<dyn AccessGate>,
    clock: Arc<dyn Clock>,
    allowed_gated_minutes: Vec<u32>,
    events: broadcast::Sender<Event>,
    /// Set while a gate close is owed; the sweep retries it.
    pending_block: std::sync::Mutex<Option<String>>,
}

impl SessionMachine {
    pub fn new(
        db: Database,
        settings: Arc<dyn SettingsSource>,
        gate: Arc<dyn AccessGate>,
        clock: Arc<dyn Clock>,
        allowed_gated_minutes: Vec<u32>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db: Mutex::new(db),
            settings,
            gate,
            clock,
            allowed_gated_minutes,
            events,
            pending_block: std::sync::Mutex::new(None),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn current(&self) -> Result<Option<Session>> {
        Ok(self.db.lock().await.active_session()?)
    }

    /// Sessions started on the current local day, newest first.
    pub async fn today(&self) -> Result<Vec<Session>> {
        let settings = self.settings.current()?;
        let since = settings.day_start(self.clock.now());
        Ok(self.db.lock().await.sessions_since(since)?)
    }

    pub async fn app_state(&self) -> Result<AppStateRecord> {
        Ok(self.db.lock().await.app_state()?)
    }

    /// Pre-flight for a start affordance: evening cutoff and daily cap only.
    pub async fn can_start(&self, kind: Option<SessionKind>) -> Result<CanStart> {
        let settings = self.settings.current()?;
        let now = self.clock.now();
        let completed = self
            .db
            .lock()
            .await
            .count_completed_since(settings.day_start(now), false)?;

        let kind = kind.unwrap_or(SessionKind::Focused);
        Ok(match policy::check_can_start(kind, &settings, now, completed) {
            Ok(()) => CanStart {
                allowed: true,
                reason: None,
            },
            Err(rejection) => CanStart {
                allowed: false,
                reason: Some(rejection.to_string()),
            },
        })
    }

    /// Break status for the gate endpoint.
    ///
    /// Clears an expired deadline on the first read after it passes.
    pub async fn break_status(&self) -> Result<BreakStatus> {
        let now = self.clock.now();
        let (cleared, state) = {
            let db = self.db.lock().await;
            let cleared = db.clear_expired_break(now)?;
            (cleared, db.app_state()?)
        };
        if cleared {
            debug!("break expired, cleared deadline");
            self.emit(Event::BreakEnded { at: now });
        }

        Ok(match state.break_until {
            Some(until) if until > now => BreakStatus {
                on_break: true,
                remaining_seconds: ((until - now).num_milliseconds() + 999) / 1000,
            },
            _ => BreakStatus {
                on_break: false,
                remaining_seconds: 0,
            },
        })
    }

    /// Active sessions whose frozen expiry has passed.
    pub async fn expired_sessions(&self) -> Result<Vec<Session>> {
        let now = self.clock.now();
        let active = self.db.lock().await.active_sessions()?;
        Ok(active.into_iter().filter(|s| s.is_expired(now)).collect())
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a session.
    ///
    /// A gated session opens the gate before its row is written; if the gate
    /// refuses, nothing is persisted.
    pub async fn start(&self, request: StartRequest) -> Result<Session> {
        let settings = self.settings.current()?;
        policy::validate_request(&request, &self.allowed_gated_minutes)?;

        let now = self.clock.now();
        {
            let db = self.db.lock().await;
            if let Some(active) = db.active_session()? {
                return Err(Rejection::AlreadyActive {
                    session_id: active.id,
                }
                .into());
            }
            let completed = db.count_completed_since(settings.day_start(now), false)?;
            policy::check_can_start(request.kind, &settings, now, completed)?;
        }

        if request.kind.is_gated() {
            // This session's completion closes the gate again.
            self.take_pending_block();
            if let Err(e) = self.gate.unblock().await {
                warn!(error = %e, gate = self.gate.name(), "unblock failed, start aborted");
                return Err(e.into());
            }
        }

        let new = NewSession {
            id: Uuid::new_v4().to_string(),
            kind: request.kind,
            intention: request.intention.clone(),
            priority_ref: request.priority_ref.clone(),
            // Stored at millisecond precision; keep the returned row identical.
            started_at: self.clock.now().trunc_subsecs(3),
            planned_minutes: policy::planned_minutes(&request, &settings),
        };

        let inserted = {
            let db = self.db.lock().await;
            match db.insert_if_idle(&new) {
                Ok(true) => Ok(None),
                Ok(false) => db.active_session().map(Some),
                Err(e) => Err(e),
            }
        };

        match inserted {
            Ok(None) => {
                let session = Session::from(new);
                info!(
                    session_id = %session.id,
                    kind = %session.kind,
                    planned_minutes = session.planned_minutes,
                    "session started"
                );
                self.emit(Event::SessionStarted {
                    session_id: session.id.clone(),
                    kind: session.kind,
                    planned_minutes: session.planned_minutes,
                    at: session.started_at,
                });
                Ok(session)
            }
            Ok(Some(winner)) => {
                // Another start won while the gate call was in flight.
                let winner_is_gated = winner.as_ref().is_some_and(|w| w.kind.is_gated());
                if request.kind.is_gated() && !winner_is_gated {
                    self.reblock(&new.id).await;
                }
                Err(Rejection::AlreadyActive {
                    session_id: winner.map(|w| w.id).unwrap_or_default(),
                }
                .into())
            }
            Err(e) => {
                // Nothing was written, so nothing may keep the gate open.
                if request.kind.is_gated() {
                    self.reblock(&new.id).await;
                }
                Err(e.into())
            }
        }
    }

    /// The completion transition. Idempotent: every call after the first
    /// returns the deadline the first one recorded.
    pub async fn complete(&self, session_id: &str, completion: Completion) -> Result<CompletionResult> {
        let settings = self.settings.current().unwrap_or_else(|e| {
            // A broken settings file must not trap a session open.
            warn!(error = %e, "settings unreadable, completing with defaults");
            Settings::default()
        });
        let now = self.clock.now();

        let outcome = self
            .db
            .lock()
            .await
            .claim_completion(session_id, now, &completion, &settings)?;

        let session = match outcome {
            ClaimOutcome::Missing => return Err(CoreError::SessionNotFound(session_id.to_string())),
            ClaimOutcome::AlreadyEnded(session) => {
                debug!(session_id, "completion already recorded");
                return Ok(CompletionResult::recorded(&session));
            }
            ClaimOutcome::Claimed(session) => session,
        };

        let break_until = session.break_until.unwrap_or(now);
        info!(
            session_id = %session.id,
            kind = %session.kind,
            forced = session.forced,
            long_break = session.long_break,
            %break_until,
            "session completed"
        );
        self.emit(Event::SessionCompleted {
            session_id: session.id.clone(),
            kind: session.kind,
            forced: session.forced,
            long_break: session.long_break,
            break_until,
            at: now,
        });

        let gate_error = if session.kind.is_gated() {
            self.reblock(&session.id).await
        } else {
            None
        };

        Ok(CompletionResult {
            session_id: session.id,
            kind: session.kind,
            break_until: session.break_until,
            long_break: session.long_break,
            forced: session.forced,
            already_completed: false,
            gate_error,
        })
    }

    /// Human-driven completion of whatever is active.
    ///
    /// With nothing active, repeats the most recent recorded result.
    pub async fn complete_current(&self, answers: Questionnaire) -> Result<CompletionResult> {
        let (active, latest) = {
            let db = self.db.lock().await;
            match db.active_session()? {
                Some(active) => (Some(active), None),
                None => (None, db.latest_completed()?),
            }
        };

        match (active, latest) {
            (Some(active), _) => self.complete(&active.id, Completion::Manual(answers)).await,
            (None, Some(latest)) => Ok(CompletionResult::recorded(&latest)),
            (None, None) => Err(CoreError::NoActiveSession),
        }
    }

    /// Drop the active session without arming a break.
    pub async fn abandon(&self) -> Result<Session> {
        let session = {
            let db = self.db.lock().await;
            let active = db.active_session()?.ok_or(CoreError::NoActiveSession)?;
            if !db.delete_active(&active.id)? {
                // Completed between the read and the delete.
                return Err(CoreError::NoActiveSession);
            }
            active
        };

        let now = self.clock.now();
        info!(session_id = %session.id, kind = %session.kind, "session abandoned");
        self.emit(Event::SessionAbandoned {
            session_id: session.id.clone(),
            kind: session.kind,
            at: now,
        });
        if session.kind.is_gated() {
            self.reblock(&session.id).await;
        }
        Ok(session)
    }

    /// Set evening mode once the cutoff has passed. Returns whether it flipped.
    pub async fn refresh_evening_mode(&self) -> Result<bool> {
        let settings = self.settings.current()?;
        let now = self.clock.now();
        if !settings.is_past_cutoff(now) {
            return Ok(false);
        }
        let flipped = self.db.lock().await.set_evening_mode(true)?;
        if flipped {
            info!(cutoff = %settings.evening_cutoff, "evening mode entered");
            self.emit(Event::EveningModeEntered { at: now });
        }
        Ok(flipped)
    }

    pub async fn reset_evening_mode(&self) -> Result<bool> {
        Ok(self.db.lock().await.set_evening_mode(false)?)
    }

    /// Retry the last `block` call that failed.
    ///
    /// Skipped (and forgotten) once a gated session has opened the gate
    /// again. Returns whether a retry closed the gate.
    pub async fn retry_failed_block(&self) -> Result<bool> {
        if self.pending_block_session().is_none() {
            return Ok(false);
        }
        let active = self.current().await?;
        let Some(session_id) = self.take_pending_block() else {
            return Ok(false);
        };
        if active.is_some_and(|s| s.kind.is_gated()) {
            debug!(session_id, "gated session running, dropping failed block");
            return Ok(false);
        }

        info!(session_id, "retrying failed block");
        Ok(self.reblock(&session_id).await.is_none())
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Close the gate, logging instead of failing. Returns the error text.
    async fn reblock(&self, session_id: &str) -> Option<String> {
        match self.gate.block().await {
            Ok(()) => {
                self.take_pending_block();
                None
            }
            Err(e) => {
                warn!(session_id, error = %e, gate = self.gate.name(), "block failed");
                *self.pending_block.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(session_id.to_string());
                let message = e.to_string();
                self.emit(Event::GateFailed {
                    session_id: session_id.to_string(),
                    action: GateAction::Block,
                    message: message.clone(),
                    at: self.clock.now(),
                });
                Some(message)
            }
        }
    }

    /// Session whose gate close failed and has not been retried yet.
    fn pending_block_session(&self) -> Option<String> {
        self.pending_block
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_pending_block(&self) -> Option<String> {
        self.pending_block
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, Duration, Utc};

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{GateError, ValidationError};
    use crate::gate::testing::RecordingGate;
    use crate::settings::StaticSettings;

    struct Harness {
        machine: SessionMachine,
        gate: Arc<RecordingGate>,
        clock: Arc<ManualClock>,
        settings: Arc<StaticSettings>,
    }

    fn morning() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn harness(settings: Settings) -> Harness {
        let gate = Arc::new(RecordingGate::default());
        let clock = Arc::new(ManualClock::new(morning()));
        let settings = Arc::new(StaticSettings::new(settings));
        let machine = SessionMachine::new(
            Database::open_memory().unwrap(),
            settings.clone(),
            gate.clone(),
            clock.clone(),
            vec![15, 30, 45, 60],
        );
        Harness {
            machine,
            gate,
            clock,
            settings,
        }
    }

    fn focused() -> StartRequest {
        StartRequest::new(SessionKind::Focused).priority("p-1")
    }

    fn gated(minutes: u32) -> StartRequest {
        StartRequest::new(SessionKind::Gated).minutes(minutes)
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_active() {
        let h = harness(Settings::default());
        let first = h.machine.start(focused()).await.unwrap();
        let err = h.machine.start(StartRequest::new(SessionKind::Personal)).await.unwrap_err();
        match err {
            CoreError::Rejected(Rejection::AlreadyActive { session_id }) => {
                assert_eq!(session_id, first.id)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn focused_requires_priority_ref() {
        let h = harness(Settings::default());
        let err = h
            .machine
            .start(StartRequest::new(SessionKind::Focused))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::MissingPriority)));
        assert!(h.machine.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_completion_returns_first_deadline() {
        let h = harness(Settings::default());
        let session = h.machine.start(focused()).await.unwrap();
        h.clock.advance(Duration::minutes(10));

        let first = h
            .machine
            .complete(&session.id, Completion::Manual(Questionnaire::default()))
            .await
            .unwrap();
        assert!(!first.already_completed);
        assert_eq!(first.break_until, Some(morning() + Duration::minutes(15)));

        for _ in 0..3 {
            h.clock.advance(Duration::minutes(1));
            let again = h.machine.complete(&session.id, Completion::Forced).await.unwrap();
            assert!(again.already_completed);
            assert_eq!(again.break_until, first.break_until);
            assert!(!again.forced);
        }
        assert_eq!(h.machine.app_state().await.unwrap().break_until, first.break_until);
        assert_eq!(h.gate.unblock_count(), 0);
        assert_eq!(h.gate.block_count(), 0);
    }

    #[tokio::test]
    async fn gated_run_touches_gate_once_each_way() {
        let h = harness(Settings::default());
        let session = h.machine.start(gated(30)).await.unwrap();
        assert_eq!(session.planned_minutes, 30);
        assert_eq!(h.gate.unblock_count(), 1);

        let first = h.machine.complete_current(Questionnaire::default()).await.unwrap();
        let second = h.machine.complete_current(Questionnaire::default()).await.unwrap();
        assert_eq!(first.break_until, second.break_until);
        assert!(second.already_completed);
        assert_eq!(h.gate.unblock_count(), 1);
        assert_eq!(h.gate.block_count(), 1);
    }

    #[tokio::test]
    async fn racing_completions_claim_once() {
        let h = harness(Settings::default());
        let session = h.machine.start(gated(15)).await.unwrap();
        h.clock.advance(Duration::minutes(15));

        let (a, b) = tokio::join!(
            h.machine.complete(&session.id, Completion::Forced),
            h.machine.complete(&session.id, Completion::Manual(Questionnaire::default())),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.break_until, b.break_until);
        assert_ne!(a.already_completed, b.already_completed);
        assert_eq!(h.gate.block_count(), 1);
    }

    #[tokio::test]
    async fn gated_start_losing_to_personal_closes_gate_again() {
        let h = harness(Settings::default());
        h.gate.yield_on_unblock.store(true, Ordering::SeqCst);

        let (gated_start, personal_start) = tokio::join!(
            h.machine.start(gated(15)),
            h.machine.start(StartRequest::new(SessionKind::Personal)),
        );
        let personal = personal_start.unwrap();
        match gated_start.unwrap_err() {
            CoreError::Rejected(Rejection::AlreadyActive { session_id }) => {
                assert_eq!(session_id, personal.id)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.gate.unblock_count(), 1);
        assert_eq!(h.gate.block_count(), 1);
        assert_eq!(h.machine.db.lock().await.active_sessions().unwrap().len(), 1);
        assert_eq!(h.machine.current().await.unwrap(), Some(personal));
    }

    #[tokio::test]
    async fn racing_gated_starts_leave_gate_open_for_winner() {
        let h = harness(Settings::default());
        h.gate.yield_on_unblock.store(true, Ordering::SeqCst);

        let (a, b) = tokio::join!(h.machine.start(gated(15)), h.machine.start(gated(30)));
        let (winner, loser) = match (a, b) {
            (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
            other => panic!("expected exactly one start to win, got {other:?}"),
        };
        assert!(matches!(
            loser,
            CoreError::Rejected(Rejection::AlreadyActive { ref session_id }) if *session_id == winner.id
        ));
        assert_eq!(h.gate.unblock_count(), 2);
        assert_eq!(h.gate.block_count(), 0);
        assert_eq!(h.machine.current().await.unwrap(), Some(winner));
    }

    /// Drops the ledger table from a second connection while unblocking, so
    /// the insert that follows fails.
    struct TableDroppingGate {
        path: PathBuf,
        blocks: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AccessGate for TableDroppingGate {
        fn name(&self) -> &str {
            "table-dropping"
        }

        async fn unblock(&self) -> Result<(), GateError> {
            let conn = rusqlite::Connection::open(&self.path).unwrap();
            conn.execute_batch("DROP TABLE sessions").unwrap();
            Ok(())
        }

        async fn block(&self) -> Result<(), GateError> {
            self.blocks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn gated_start_store_failure_closes_gate_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let gate = Arc::new(TableDroppingGate {
            path: path.clone(),
            blocks: AtomicUsize::new(0),
        });
        let machine = SessionMachine::new(
            Database::open(&path).unwrap(),
            Arc::new(StaticSettings::new(Settings::default())),
            gate.clone(),
            Arc::new(ManualClock::new(morning())),
            vec![15, 30, 45, 60],
        );

        let err = machine.start(gated(15)).await.unwrap_err();
        assert!(matches!(err, CoreError::Database(_)));
        assert_eq!(gate.blocks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn started_session_matches_stored_row() {
        let h = harness(Settings::default());
        h.clock.set(morning() + Duration::nanoseconds(1_234_567));

        let session = h.machine.start(gated(15)).await.unwrap();
        assert_eq!(session.started_at, morning() + Duration::milliseconds(1));
        assert_eq!(h.machine.current().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn failed_block_is_retried_until_it_succeeds() {
        let h = harness(Settings::default());
        let session = h.machine.start(gated(15)).await.unwrap();
        h.gate.fail_block.store(true, Ordering::SeqCst);
        h.machine.complete(&session.id, Completion::Forced).await.unwrap();
        assert_eq!(h.machine.pending_block_session(), Some(session.id.clone()));

        assert!(!h.machine.retry_failed_block().await.unwrap());
        assert_eq!(h.gate.block_count(), 2);
        assert_eq!(h.machine.pending_block_session(), Some(session.id));

        h.gate.fail_block.store(false, Ordering::SeqCst);
        assert!(h.machine.retry_failed_block().await.unwrap());
        assert_eq!(h.gate.block_count(), 3);
        assert_eq!(h.machine.pending_block_session(), None);

        assert!(!h.machine.retry_failed_block().await.unwrap());
        assert_eq!(h.gate.block_count(), 3);
    }

    #[tokio::test]
    async fn failed_block_is_dropped_once_gate_reopens() {
        let h = harness(Settings::default());
        h.machine.start(gated(15)).await.unwrap();
        h.gate.fail_block.store(true, Ordering::SeqCst);
        h.machine.complete_current(Questionnaire::default()).await.unwrap();
        h.gate.fail_block.store(false, Ordering::SeqCst);

        h.machine.start(gated(15)).await.unwrap();
        assert_eq!(h.machine.pending_block_session(), None);
        assert!(!h.machine.retry_failed_block().await.unwrap());
        assert_eq!(h.gate.block_count(), 1);
        assert!(h.machine.current().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unblock_failure_persists_nothing() {
        let h = harness(Settings::default());
        h.gate.fail_unblock.store(true, Ordering::SeqCst);

        let err = h.machine.start(gated(15)).await.unwrap_err();
        assert!(matches!(err, CoreError::Gate(_)));
        assert!(h.machine.current().await.unwrap().is_none());
        assert!(h.machine.today().await.unwrap().is_empty());
        assert_eq!(h.machine.app_state().await.unwrap().break_until, None);
        assert!(!h.machine.break_status().await.unwrap().on_break);
    }

    #[tokio::test]
    async fn block_failure_still_completes() {
        let h = harness(Settings::default());
        let session = h.machine.start(gated(15)).await.unwrap();
        h.gate.fail_block.store(true, Ordering::SeqCst);

        let result = h.machine.complete(&session.id, Completion::Forced).await.unwrap();
        assert!(result.gate_error.is_some());
        assert!(result.break_until.is_some());
        assert!(h.machine.current().await.unwrap().is_none());
        assert!(h.machine.break_status().await.unwrap().on_break);
    }

    #[tokio::test]
    async fn settings_change_does_not_move_inflight_expiry() {
        let h = harness(Settings::default());
        let session = h.machine.start(focused()).await.unwrap();
        assert_eq!(session.planned_minutes, 25);

        h.settings.replace(Settings {
            default_session_minutes: 50,
            ..Settings::default()
        });
        h.clock.advance(Duration::minutes(25));
        let expired = h.machine.expired_sessions().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].expires_at(), morning() + Duration::minutes(25));
    }

    #[tokio::test]
    async fn every_fourth_non_gated_session_earns_long_break() {
        let h = harness(Settings::default());
        let mut long = Vec::new();
        for i in 0..5 {
            // A gated session in the middle must not shift the count.
            if i == 2 {
                h.machine.start(gated(15)).await.unwrap();
                let r = h.machine.complete_current(Questionnaire::default()).await.unwrap();
                assert!(!r.long_break);
            }
            h.machine.start(focused()).await.unwrap();
            let r = h.machine.complete_current(Questionnaire::default()).await.unwrap();
            long.push(r.long_break);
        }
        assert_eq!(long, vec![false, false, false, true, false]);
    }

    #[tokio::test]
    async fn gated_sessions_count_when_configured() {
        let h = harness(Settings {
            gated_counts_toward_long_break: true,
            ..Settings::default()
        });
        for _ in 0..3 {
            h.machine.start(focused()).await.unwrap();
            h.machine.complete_current(Questionnaire::default()).await.unwrap();
        }
        h.machine.start(gated(15)).await.unwrap();
        let r = h.machine.complete_current(Questionnaire::default()).await.unwrap();
        assert!(r.long_break);
        assert_eq!(r.break_until, Some(morning() + Duration::minutes(15)));
    }

    #[tokio::test]
    async fn daily_cap_exempts_gated() {
        let h = harness(Settings {
            daily_session_cap: 2,
            ..Settings::default()
        });
        for _ in 0..2 {
            h.machine.start(StartRequest::new(SessionKind::Personal)).await.unwrap();
            h.machine.complete_current(Questionnaire::default()).await.unwrap();
        }

        let focused_check = h.machine.can_start(Some(SessionKind::Focused)).await.unwrap();
        assert!(!focused_check.allowed);
        assert!(focused_check.reason.is_some());
        assert!(h.machine.can_start(Some(SessionKind::Gated)).await.unwrap().allowed);

        let err = h.machine.start(focused()).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Rejected(Rejection::DailyCapReached { completed: 2, cap: 2 })
        ));
        assert!(h.machine.start(gated(15)).await.is_ok());
    }

    #[tokio::test]
    async fn cutoff_blocks_every_kind() {
        let h = harness(Settings::default());
        assert!(h.machine.can_start(None).await.unwrap().allowed);

        h.clock.set(morning() + Duration::hours(12));
        assert!(!h.machine.can_start(None).await.unwrap().allowed);
        assert!(!h.machine.can_start(Some(SessionKind::Gated)).await.unwrap().allowed);
        let err = h.machine.start(gated(15)).await.unwrap_err();
        assert!(matches!(err, CoreError::Rejected(Rejection::PastEveningCutoff { .. })));
        assert_eq!(h.gate.unblock_count(), 0);
    }

    #[tokio::test]
    async fn abandon_deletes_without_break() {
        let h = harness(Settings::default());
        let session = h.machine.start(gated(45)).await.unwrap();
        let abandoned = h.machine.abandon().await.unwrap();
        assert_eq!(abandoned.id, session.id);

        assert!(h.machine.current().await.unwrap().is_none());
        assert!(h.machine.today().await.unwrap().is_empty());
        assert_eq!(h.machine.app_state().await.unwrap().break_until, None);
        assert_eq!(h.gate.block_count(), 1);
        assert!(matches!(h.machine.abandon().await, Err(CoreError::NoActiveSession)));
    }

    #[tokio::test]
    async fn completing_abandoned_session_is_not_found() {
        let h = harness(Settings::default());
        let session = h.machine.start(focused()).await.unwrap();
        h.machine.abandon().await.unwrap();
        assert!(matches!(
            h.machine.complete(&session.id, Completion::Forced).await,
            Err(CoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn complete_current_without_history_is_an_error() {
        let h = harness(Settings::default());
        assert!(matches!(
            h.machine.complete_current(Questionnaire::default()).await,
            Err(CoreError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn break_status_counts_down_and_clears_lazily() {
        let h = harness(Settings::default());
        h.machine.start(focused()).await.unwrap();
        h.machine.complete_current(Questionnaire::default()).await.unwrap();

        let status = h.machine.break_status().await.unwrap();
        assert_eq!(status, BreakStatus { on_break: true, remaining_seconds: 300 });

        h.clock.advance(Duration::seconds(299) + Duration::milliseconds(500));
        assert_eq!(h.machine.break_status().await.unwrap().remaining_seconds, 1);

        h.clock.advance(Duration::seconds(1));
        let status = h.machine.break_status().await.unwrap();
        assert!(!status.on_break);
        assert_eq!(h.machine.app_state().await.unwrap().break_until, None);
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let h = harness(Settings::default());
        let mut rx = h.machine.subscribe();
        h.machine.start(focused()).await.unwrap();
        h.machine.complete_current(Questionnaire::default()).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), Event::SessionStarted { .. }));
        match rx.recv().await.unwrap() {
            Event::SessionCompleted { forced, long_break, .. } => {
                assert!(!forced);
                assert!(!long_break);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn evening_mode_flips_once_after_cutoff() {
        let h = harness(Settings::default());
        assert!(!h.machine.refresh_evening_mode().await.unwrap());
        h.clock.set(morning() + Duration::hours(12));
        assert!(h.machine.refresh_evening_mode().await.unwrap());
        assert!(!h.machine.refresh_evening_mode().await.unwrap());
        assert!(h.machine.app_state().await.unwrap().evening_mode);

        assert!(h.machine.reset_evening_mode().await.unwrap());
        assert!(!h.machine.app_state().await.unwrap().evening_mode);
    }
}
