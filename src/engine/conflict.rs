use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_timestamp(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// The closed ±120 minute window around a candidate time.
pub fn conflict_window(candidate: Ms) -> Window {
    Window::around(candidate, CONFLICT_RADIUS_MS)
}

/// First active booking of the pair scheduled inside the candidate's window.
/// Exactly 120 minutes apart still collides.
pub fn find_conflict(pair: &PairState, candidate: Ms) -> Option<&Booking> {
    pair.scheduled_within(&conflict_window(candidate))
        .find(|b| b.status.is_active())
}

pub(crate) fn check_no_conflict(pair: &PairState, candidate: Ms) -> Result<(), EngineError> {
    match find_conflict(pair, candidate) {
        Some(existing) => Err(EngineError::Conflict {
            existing: existing.id,
            existing_at: existing.scheduled_at,
            window: conflict_window(candidate),
        }),
        None => Ok(()),
    }
}
