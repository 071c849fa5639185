//! SQLite-backed session ledger and app state.
//!
//! Provides persistent storage for:
//! - Sessions (one row per work/rest unit)
//! - The app state singleton (break deadline, evening mode)
//!
//! Every state-changing write that can race is a single conditional
//! statement: the insert only succeeds while nothing is active, and the
//! completion only succeeds while `ended_at` is still null.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::migrations;
use crate::error::DatabaseError;
use crate::session::{policy, Completion, Questionnaire, Session, SessionKind};
use crate::settings::Settings;

const SESSION_COLUMNS: &str = "id, kind, intention, priority_ref, started_at, planned_minutes,
     ended_at, forced, break_until, long_break, distractions, completed_goal,
     went_down_rabbit_hole, notes";

/// The app state singleton row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStateRecord {
    pub break_until: Option<DateTime<Utc>>,
    pub evening_mode: bool,
}

/// A session about to be written.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub kind: SessionKind,
    pub intention: Option<String>,
    pub priority_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub planned_minutes: u32,
}

impl From<NewSession> for Session {
    fn from(new: NewSession) -> Self {
        Self {
            id: new.id,
            kind: new.kind,
            intention: new.intention,
            priority_ref: new.priority_ref,
            started_at: new.started_at,
            planned_minutes: new.planned_minutes,
            ended_at: None,
            forced: false,
            break_until: None,
            long_break: false,
            outcome: Questionnaire::default(),
        }
    }
}

/// What happened when a caller tried to claim a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller ended the session and armed the break.
    Claimed(Session),
    /// Someone else already ended it; the row is returned as recorded.
    AlreadyEnded(Session),
    /// No such row (never existed, or abandoned).
    Missing,
}

/// SQLite database for the session ledger.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (and migrate) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(std::time::Duration::from_secs(2))?;
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Insert `session` unless another session is active.
    ///
    /// Returns `false` (and writes nothing) when one already is.
    pub fn insert_if_idle(&self, session: &NewSession) -> Result<bool, DatabaseError> {
        let inserted = self.conn.execute(
            "INSERT INTO sessions (id, kind, intention, priority_ref, started_at, planned_minutes)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6
             WHERE NOT EXISTS (SELECT 1 FROM sessions WHERE ended_at IS NULL)",
            params![
                session.id,
                session.kind.as_str(),
                session.intention,
                session.priority_ref,
                fmt_ts(session.started_at),
                session.planned_minutes,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let session = self
            .conn
            .query_row(&sql, params![id], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// The active session, if any.
    pub fn active_session(&self) -> Result<Option<Session>, DatabaseError> {
        Ok(self.active_sessions()?.into_iter().next())
    }

    /// All rows with `ended_at` still null, oldest first. Normally zero or one.
    pub fn active_sessions(&self) -> Result<Vec<Session>, DatabaseError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE ended_at IS NULL ORDER BY started_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_session)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recently ended session.
    pub fn latest_completed(&self) -> Result<Option<Session>, DatabaseError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE ended_at IS NOT NULL
             ORDER BY ended_at DESC
             LIMIT 1"
        );
        Ok(self.conn.query_row(&sql, [], row_to_session).optional()?)
    }

    /// Sessions started at or after `since`, newest first.
    pub fn sessions_since(&self, since: DateTime<Utc>) -> Result<Vec<Session>, DatabaseError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE started_at >= ?1
             ORDER BY started_at DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![fmt_ts(since)], row_to_session)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Sessions completed at or after `since`; gated ones only if asked.
    pub fn count_completed_since(
        &self,
        since: DateTime<Utc>,
        include_gated: bool,
    ) -> Result<u32, DatabaseError> {
        count_completed_since(&self.conn, since, include_gated)
    }

    /// Delete the session if it is still active. Returns whether a row went away.
    pub fn delete_active(&self, id: &str) -> Result<bool, DatabaseError> {
        let deleted = self.conn.execute(
            "DELETE FROM sessions WHERE id = ?1 AND ended_at IS NULL",
            params![id],
        )?;
        Ok(deleted == 1)
    }

    /// The completion transition's storage half.
    ///
    /// Claims the row with one conditional update. Only the caller whose
    /// update touches the row computes the break and writes it to both the
    /// session and the app state, inside the same transaction.
    pub fn claim_completion(
        &self,
        id: &str,
        now: DateTime<Utc>,
        completion: &Completion,
        settings: &Settings,
    ) -> Result<ClaimOutcome, DatabaseError> {
        let tx = self.conn.unchecked_transaction()?;

        let blank = Questionnaire::default();
        let answers = completion.questionnaire().unwrap_or(&blank);
        let claimed = tx.execute(
            "UPDATE sessions
             SET ended_at = ?1, forced = ?2, distractions = ?3, completed_goal = ?4,
                 went_down_rabbit_hole = ?5, notes = ?6
             WHERE id = ?7 AND ended_at IS NULL",
            params![
                fmt_ts(now),
                completion.is_forced(),
                answers.distractions,
                answers.completed_goal,
                answers.went_down_rabbit_hole,
                answers.notes,
                id,
            ],
        )?;

        if claimed == 0 {
            drop(tx);
            return Ok(match self.get_session(id)? {
                Some(session) => ClaimOutcome::AlreadyEnded(session),
                None => ClaimOutcome::Missing,
            });
        }

        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let mut session = tx.query_row(&sql, params![id], row_to_session)?;

        let include_gated = settings.gated_counts_toward_long_break;
        let counted = count_completed_since(&tx, settings.day_start(now), include_gated)?;
        let (length, long_break) = policy::break_for(session.kind, counted, settings);
        let break_until = now + length;

        tx.execute(
            "UPDATE sessions SET break_until = ?1, long_break = ?2 WHERE id = ?3",
            params![fmt_ts(break_until), long_break, id],
        )?;
        tx.execute(
            "UPDATE app_state SET break_until = ?1 WHERE id = 1",
            params![fmt_ts(break_until)],
        )?;
        tx.commit()?;

        session.break_until = Some(break_until);
        session.long_break = long_break;
        Ok(ClaimOutcome::Claimed(session))
    }

    // ── App state ────────────────────────────────────────────────────

    pub fn app_state(&self) -> Result<AppStateRecord, DatabaseError> {
        let record = self.conn.query_row(
            "SELECT break_until, evening_mode FROM app_state WHERE id = 1",
            [],
            |row| {
                Ok(AppStateRecord {
                    break_until: opt_ts(row, 0)?,
                    evening_mode: row.get(1)?,
                })
            },
        )?;
        Ok(record)
    }

    /// Null out the break deadline if it is at or before `now`.
    ///
    /// Returns whether a deadline was cleared.
    pub fn clear_expired_break(&self, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let cleared = self.conn.execute(
            "UPDATE app_state SET break_until = NULL
             WHERE id = 1 AND break_until IS NOT NULL AND break_until <= ?1",
            params![fmt_ts(now)],
        )?;
        Ok(cleared == 1)
    }

    /// Returns whether the flag actually changed.
    pub fn set_evening_mode(&self, on: bool) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            "UPDATE app_state SET evening_mode = ?1 WHERE id = 1 AND evening_mode != ?1",
            params![on],
        )?;
        Ok(changed == 1)
    }
}

fn count_completed_since(
    conn: &Connection,
    since: DateTime<Utc>,
    include_gated: bool,
) -> Result<u32, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM sessions
         WHERE ended_at IS NOT NULL AND ended_at >= ?1 AND (?2 OR kind != 'gated')",
        params![fmt_ts(since), include_gated],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Fixed-width UTC timestamps so lexical order is chronological order.
pub(crate) fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let kind_raw: String = row.get(1)?;
    let kind = kind_raw
        .parse::<SessionKind>()
        .map_err(|e| conversion_error(1, e))?;
    Ok(Session {
        id: row.get(0)?,
        kind,
        intention: row.get(2)?,
        priority_ref: row.get(3)?,
        started_at: ts(row, 4)?,
        planned_minutes: row.get(5)?,
        ended_at: opt_ts(row, 6)?,
        forced: row.get(7)?,
        break_until: opt_ts(row, 8)?,
        long_break: row.get(9)?,
        outcome: Questionnaire {
            distractions: row.get(10)?,
            completed_goal: row.get(11)?,
            went_down_rabbit_hole: row.get(12)?,
            notes: row.get(13)?,
        },
    })
}
