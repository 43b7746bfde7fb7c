use crate::model::*;

use super::{stamp_after, Engine, EngineError};

fn action_for(target: Status) -> &'static str {
    match target {
        Status::Pending => "reopen",
        Status::Accepted => "accept",
        Status::InProgress => "confirm",
        Status::Finished => "finish",
    }
}

pub(crate) fn require_owner(
    booking: &Booking,
    caller: Participant,
    action: &str,
) -> Result<(), EngineError> {
    match caller {
        Participant::Requester { id } if id == booking.requester_id => Ok(()),
        _ => Err(EngineError::Forbidden(format!(
            "only the requester who owns booking {} may {action} it",
            booking.id
        ))),
    }
}

pub(crate) fn require_assigned_provider(
    booking: &Booking,
    caller: Participant,
    action: &str,
) -> Result<(), EngineError> {
    match (caller, booking.provider_id) {
        (Participant::Provider { id }, Some(assigned)) if id == assigned => Ok(()),
        (Participant::Provider { .. }, None) => Err(EngineError::Forbidden(format!(
            "booking {} has no assigned provider yet",
            booking.id
        ))),
        _ => Err(EngineError::Forbidden(format!(
            "only the assigned provider may {action} booking {}",
            booking.id
        ))),
    }
}

/// Finished bookings are closed to every further mutation.
pub(crate) fn require_open(booking: &Booking, action: &'static str) -> Result<(), EngineError> {
    if booking.status.is_active() {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            id: booking.id,
            current: booking.status,
            action,
        })
    }
}

fn require_advance(booking: &Booking, target: Status) -> Result<(), EngineError> {
    if booking.status.can_advance_to(target) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            id: booking.id,
            current: booking.status,
            action: action_for(target),
        })
    }
}

/// Decide whether `caller` may move `booking` to `target` and build the event
/// that does it. Identity is checked before status.
///
/// - `accepted`: any provider while unassigned (the caller claims it),
///   otherwise only the assigned one.
/// - `in_progress`: the owning requester.
/// - `finished`: the assigned provider, once after-evidence is recorded.
pub fn plan_transition(
    booking: &Booking,
    caller: Participant,
    target: Status,
    at: Ms,
) -> Result<Event, EngineError> {
    let id = booking.id;
    match target {
        Status::Pending => Err(EngineError::InvalidTransition {
            id,
            current: booking.status,
            action: action_for(target),
        }),
        Status::Accepted => {
            let provider_id = match caller {
                Participant::Provider { id } => id,
                Participant::Requester { .. } => {
                    return Err(EngineError::Forbidden(format!(
                        "only a provider may accept booking {id}"
                    )));
                }
            };
            if let Some(assigned) = booking.provider_id
                && assigned != provider_id
            {
                return Err(EngineError::Forbidden(format!(
                    "booking {id} is assigned to another provider"
                )));
            }
            require_advance(booking, target)?;
            Ok(Event::BookingAccepted { id, provider_id, at })
        }
        Status::InProgress => {
            require_owner(booking, caller, action_for(target))?;
            require_advance(booking, target)?;
            Ok(Event::BookingStarted { id, at })
        }
        Status::Finished => {
            require_assigned_provider(booking, caller, action_for(target))?;
            require_advance(booking, target)?;
            if booking.evidence_after.is_empty() {
                return Err(EngineError::NotReady {
                    id,
                    reason: "after-evidence must be uploaded before finishing",
                });
            }
            Ok(Event::BookingFinished { id, at })
        }
    }
}

impl Engine {
    /// Move a booking one step along its lifecycle. The status is re-read under
    /// the pair's write lock, so two racing requests cannot both succeed.
    pub async fn advance_booking(
        &self,
        id: BookingId,
        caller: Participant,
        target: Status,
    ) -> Result<Booking, EngineError> {
        let _commit = self.begin_commit().await;
        let mut pair = self.resolve_booking_write(id).await?;
        let current = pair.booking(id).ok_or(EngineError::NotFound(id))?;
        let event = plan_transition(current, caller, target, stamp_after(current.updated_at))?;
        self.persist_and_apply(&mut pair, &event).await?;

        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "to" => target.as_str())
            .increment(1);
        tracing::info!("booking {id} moved to {target} by {caller}");
        pair.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// `pending → accepted`, provider only.
    pub async fn accept_booking(
        &self,
        id: BookingId,
        caller: Participant,
    ) -> Result<Booking, EngineError> {
        self.advance_booking(id, caller, Status::Accepted).await
    }

    /// `accepted → in_progress`, owning requester only.
    pub async fn confirm_booking(
        &self,
        id: BookingId,
        caller: Participant,
    ) -> Result<Booking, EngineError> {
        self.advance_booking(id, caller, Status::InProgress).await
    }

    /// `in_progress → finished`, assigned provider only.
    pub async fn finish_booking(
        &self,
        id: BookingId,
        caller: Participant,
    ) -> Result<Booking, EngineError> {
        self.advance_booking(id, caller, Status::Finished).await
    }
}
