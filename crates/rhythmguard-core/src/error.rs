//! Core error types for rhythmguard-core.
//!
//! Rejections (a start that is not allowed right now) are kept apart from
//! real failures so callers can surface them without logging them as errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionKind;

/// Core error type for rhythmguard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The access gate call failed
    #[error("Access gate error: {0}")]
    Gate(#[from] GateError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A start request was refused by policy
    #[error("Rejected: {0}")]
    Rejected(#[from] Rejection),

    /// No session is currently active
    #[error("No active session")]
    NoActiveSession,

    /// No session with the given id exists (it may have been abandoned)
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

/// Why a start request was refused. Nothing is persisted for a rejection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("session {session_id} is already active")]
    AlreadyActive { session_id: String },

    #[error("evening cutoff {cutoff} has passed")]
    PastEveningCutoff { cutoff: chrono::NaiveTime },

    #[error("daily session cap reached ({completed}/{cap})")]
    DailyCapReached { completed: u32, cap: u32 },
}

impl Rejection {
    /// Stable machine-readable code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::AlreadyActive { .. } => "already_active",
            Rejection::PastEveningCutoff { .. } => "past_evening_cutoff",
            Rejection::DailyCapReached { .. } => "daily_cap_reached",
        }
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Missing required configuration key
    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    /// Home/data directory could not be resolved
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Access gate adapter errors.
#[derive(Error, Debug)]
pub enum GateError {
    /// The denylist API answered with a non-success status
    #[error("denylist API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request did not complete within the configured timeout
    #[error("denylist API request timed out")]
    Timeout,

    /// Connection or protocol failure
    #[error("denylist API request failed: {0}")]
    Transport(String),

    /// API key environment variable is not set
    #[error("gate credentials missing: environment variable {0} is not set")]
    MissingCredentials(String),

    /// Base URL is not usable
    #[error("invalid gate URL: {0}")]
    InvalidUrl(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Gated sessions must pick one of the allowed lengths
    #[error("planned_minutes {given:?} is not allowed for {kind} sessions (allowed: {allowed:?})")]
    PlannedMinutes {
        kind: SessionKind,
        given: Option<u32>,
        allowed: Vec<u32>,
    },

    /// Focused sessions must reference a priority
    #[error("focused sessions require a priority_ref")]
    MissingPriority,

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GateError::Timeout
        } else {
            GateError::Transport(err.to_string())
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
