use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::GateAction;
use crate::session::SessionKind;

/// Every state change in the engine produces an Event.
/// The server logs them; embedders can subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        session_id: String,
        kind: SessionKind,
        planned_minutes: u32,
        at: DateTime<Utc>,
    },
    SessionCompleted {
        session_id: String,
        kind: SessionKind,
        forced: bool,
        long_break: bool,
        break_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    SessionAbandoned {
        session_id: String,
        kind: SessionKind,
        at: DateTime<Utc>,
    },
    /// A gate call failed where failure does not abort the transition.
    GateFailed {
        session_id: String,
        action: GateAction,
        message: String,
        at: DateTime<Utc>,
    },
    BreakEnded {
        at: DateTime<Utc>,
    },
    EveningModeEntered {
        at: DateTime<Utc>,
    },
}
