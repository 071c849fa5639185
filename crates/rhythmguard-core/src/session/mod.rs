//! Session model and the state machine that drives it.
//!
//! ## State Transitions
//!
//! ```text
//! (start) -> Active -> Completed   (manual or forced, arms a break)
//!                   -> Abandoned   (row deleted, no break)
//! ```

mod machine;
pub mod policy;

pub use machine::SessionMachine;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Work tied to an external priority.
    Focused,
    /// Unstructured personal time.
    Personal,
    /// Time-boxed leisure that opens the restricted domain while it runs.
    Gated,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::Focused => "focused",
            SessionKind::Personal => "personal",
            SessionKind::Gated => "gated",
        }
    }

    pub fn is_gated(self) -> bool {
        self == SessionKind::Gated
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "focused" => Ok(SessionKind::Focused),
            "personal" => Ok(SessionKind::Personal),
            "gated" => Ok(SessionKind::Gated),
            other => Err(ValidationError::InvalidValue {
                field: "kind".into(),
                message: format!("unknown session kind '{other}'"),
            }),
        }
    }
}

/// End-of-session questionnaire. Only a human-driven completion writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Questionnaire {
    #[serde(default)]
    pub distractions: Option<u32>,
    #[serde(default)]
    pub completed_goal: Option<bool>,
    #[serde(default)]
    pub went_down_rabbit_hole: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Who is completing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The enforcement scheduler found the session past its expiry.
    Forced,
    /// A human ended it (end call or client timer) and may answer the questionnaire.
    Manual(Questionnaire),
}

impl Completion {
    pub fn is_forced(&self) -> bool {
        matches!(self, Completion::Forced)
    }

    pub fn questionnaire(&self) -> Option<&Questionnaire> {
        match self {
            Completion::Forced => None,
            Completion::Manual(q) => Some(q),
        }
    }
}

/// One row of the session ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub intention: Option<String>,
    pub priority_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Frozen at start; settings changes never move an in-flight expiry.
    pub planned_minutes: u32,
    pub ended_at: Option<DateTime<Utc>>,
    pub forced: bool,
    /// Break deadline armed by this session's completion.
    pub break_until: Option<DateTime<Utc>>,
    pub long_break: bool,
    #[serde(flatten)]
    pub outcome: Questionnaire,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.started_at + Duration::minutes(i64::from(self.planned_minutes))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now >= self.expires_at()
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_seconds().max(0)
    }
}

/// A start request as received from a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub kind: SessionKind,
    #[serde(default)]
    pub intention: Option<String>,
    #[serde(default)]
    pub priority_ref: Option<String>,
    /// Only honoured for gated sessions.
    #[serde(default)]
    pub planned_minutes: Option<u32>,
}

impl StartRequest {
    pub fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            intention: None,
            priority_ref: None,
            planned_minutes: None,
        }
    }

    pub fn intention(mut self, intention: impl Into<String>) -> Self {
        self.intention = Some(intention.into());
        self
    }

    pub fn priority(mut self, priority_ref: impl Into<String>) -> Self {
        self.priority_ref = Some(priority_ref.into());
        self
    }

    pub fn minutes(mut self, minutes: u32) -> Self {
        self.planned_minutes = Some(minutes);
        self
    }
}

/// Result of the completion transition.
///
/// A caller that lost the race gets the same deadline the winner recorded,
/// with `already_completed` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub session_id: String,
    pub kind: SessionKind,
    pub break_until: Option<DateTime<Utc>>,
    pub long_break: bool,
    pub forced: bool,
    pub already_completed: bool,
    /// Set when re-blocking the gate failed. The completion still stands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_error: Option<String>,
}

impl CompletionResult {
    pub(crate) fn recorded(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            kind: session.kind,
            break_until: session.break_until,
            long_break: session.long_break,
            forced: session.forced,
            already_completed: true,
            gate_error: None,
        }
    }
}

/// Pre-flight answer for a start affordance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanStart {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What the reverse-proxy filter polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakStatus {
    pub on_break: bool,
    pub remaining_seconds: i64,
}
