//! # Rhythmguard Core Library
//!
//! Core logic for the rhythm enforcement engine: a single-user work/break
//! cycle whose completion is enforced server-side, with one restricted domain
//! opened only during "gated" sessions.
//!
//! ## Architecture
//!
//! - **Session machine**: start, complete (idempotent, claim-on-write),
//!   abandon and can-start against a SQLite-backed ledger
//! - **Enforcement scheduler**: background ticks that force-complete expired
//!   sessions and flip evening mode after the cutoff
//! - **Access gate**: adapter that blocks or unblocks the restricted domain
//!   through a denylist API
//! - **Storage**: SQLite session ledger and TOML configuration
//!
//! ## Key Components
//!
//! - [`SessionMachine`]: the state machine shared by every producer
//! - [`EnforcementScheduler`]: periodic enforcement
//! - [`AccessGate`]: trait for gate adapters
//! - [`Database`]: session ledger and app state
//! - [`Config`]: application configuration

pub mod clock;
pub mod error;
pub mod events;
pub mod gate;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, CoreError, DatabaseError, GateError, Rejection, Result, ValidationError,
};
pub use events::Event;
pub use gate::{AccessGate, DenylistGate, GateAction, NoopGate};
pub use scheduler::{EnforcementScheduler, SweepReport};
pub use session::{
    BreakStatus, CanStart, Completion, CompletionResult, Questionnaire, Session, SessionKind,
    SessionMachine, StartRequest,
};
pub use settings::{FileSettings, Settings, SettingsSource, StaticSettings};
pub use storage::{AppStateRecord, Config, Database, GateConfig, SchedulerConfig, ServerConfig};
