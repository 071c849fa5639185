//! Pure rules: who may start, for how long, and how long the break is.

use chrono::{DateTime, Duration, Utc};

use super::{SessionKind, StartRequest};
use crate::error::{Rejection, ValidationError};
use crate::settings::Settings;

/// Cutoff and daily-cap checks.
///
/// `completed_today` is the number of non-gated sessions completed on the
/// current local day. Gated sessions are exempt from the cap but not from
/// the cutoff.
pub fn check_can_start(
    kind: SessionKind,
    settings: &Settings,
    now: DateTime<Utc>,
    completed_today: u32,
) -> Result<(), Rejection> {
    if settings.is_past_cutoff(now) {
        return Err(Rejection::PastEveningCutoff {
            cutoff: settings.evening_cutoff,
        });
    }
    if !kind.is_gated() && completed_today >= settings.daily_session_cap {
        return Err(Rejection::DailyCapReached {
            completed: completed_today,
            cap: settings.daily_session_cap,
        });
    }
    Ok(())
}

/// Shape checks that do not depend on ledger state.
pub fn validate_request(request: &StartRequest, allowed_gated: &[u32]) -> Result<(), ValidationError> {
    match request.kind {
        SessionKind::Focused => {
            let has_priority = request
                .priority_ref
                .as_deref()
                .is_some_and(|p| !p.trim().is_empty());
            if !has_priority {
                return Err(ValidationError::MissingPriority);
            }
        }
        SessionKind::Gated => {
            if !request
                .planned_minutes
                .is_some_and(|m| allowed_gated.contains(&m))
            {
                return Err(ValidationError::PlannedMinutes {
                    kind: request.kind,
                    given: request.planned_minutes,
                    allowed: allowed_gated.to_vec(),
                });
            }
        }
        SessionKind::Personal => {}
    }
    Ok(())
}

/// Length to freeze into a new session. Caller-chosen only for gated sessions.
pub fn planned_minutes(request: &StartRequest, settings: &Settings) -> u32 {
    match (request.kind, request.planned_minutes) {
        (SessionKind::Gated, Some(minutes)) => minutes,
        _ => settings.default_session_minutes,
    }
}

/// Whether a completed session of `kind` advances the long-break count.
pub fn counts_toward_long_break(kind: SessionKind, settings: &Settings) -> bool {
    !kind.is_gated() || settings.gated_counts_toward_long_break
}

/// Break armed by a completion.
///
/// `counted_today` is the number of sessions completed today that advance the
/// long-break count, including the one being completed. Returns the length
/// and whether it is the long break.
pub fn break_for(kind: SessionKind, counted_today: u32, settings: &Settings) -> (Duration, bool) {
    let every = settings.long_break_every.max(1);
    let long = counts_toward_long_break(kind, settings)
        && counted_today > 0
        && counted_today % every == 0;
    if long {
        (settings.long_break(), true)
    } else {
        (settings.short_break(), false)
    }
}
