use crate::model::*;

use super::conflict::{conflict_window, find_conflict, validate_timestamp};
use super::{Engine, EngineError};

/// Whether `caller` may see `booking`. Providers also see open requests they
/// could still claim.
fn visible_to(booking: &Booking, caller: Participant) -> bool {
    match caller {
        Participant::Requester { id } => booking.requester_id == id,
        Participant::Provider { id } => match booking.provider_id {
            Some(assigned) => assigned == id,
            None => booking.status == Status::Pending,
        },
    }
}

impl Engine {
    /// Read-only conflict check; same rule `create_booking` enforces.
    pub async fn check_conflict(
        &self,
        service_id: u64,
        requester_id: u64,
        scheduled_at: Ms,
    ) -> Result<ConflictCheck, EngineError> {
        validate_timestamp(scheduled_at)?;
        let window = conflict_window(scheduled_at);
        let key = PairKey {
            service_id,
            requester_id,
        };
        let conflicting = match self.store.get_pair(&key) {
            Some(pair) => {
                let guard = pair.read().await;
                find_conflict(&guard, scheduled_at).map(|b| b.id)
            }
            None => None,
        };
        Ok(ConflictCheck {
            window,
            conflicting,
        })
    }

    pub async fn exists_conflicting(
        &self,
        service_id: u64,
        requester_id: u64,
        scheduled_at: Ms,
    ) -> Result<bool, EngineError> {
        Ok(self
            .check_conflict(service_id, requester_id, scheduled_at)
            .await?
            .conflicting
            .is_some())
    }

    pub async fn get_booking(
        &self,
        id: BookingId,
        caller: Participant,
    ) -> Result<Booking, EngineError> {
        let booking = self.store.get(id).await.ok_or(EngineError::NotFound(id))?;
        if !visible_to(&booking, caller) {
            return Err(EngineError::Forbidden(format!(
                "booking {id} is not visible to {caller}"
            )));
        }
        Ok(booking)
    }

    /// Bookings visible to the caller, ordered by scheduled time.
    pub async fn list_bookings(&self, caller: Participant) -> Vec<Booking> {
        let mut bookings = match caller {
            Participant::Requester { id } => self.store.find_for_requester(id, |_| true).await,
            Participant::Provider { .. } => self.store.find(|b| visible_to(b, caller)).await,
        };
        bookings.sort_by_key(|b| (b.scheduled_at, b.id));
        bookings
    }
}
