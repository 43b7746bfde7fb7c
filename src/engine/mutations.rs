use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_timestamp};
use super::lifecycle::{require_assigned_provider, require_open, require_owner};
use super::{now_ms, stamp_after, Engine, EngineError, WalCommand};

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_details(details: &BookingDetails) -> Result<(), EngineError> {
    check_len(&details.address, MAX_TEXT_LEN, "address too long")?;
    check_len(&details.description, MAX_TEXT_LEN, "description too long")?;
    check_len(&details.service_kind, MAX_LABEL_LEN, "service kind too long")?;
    if let Some(m) = &details.payment_method {
        check_len(m, MAX_LABEL_LEN, "payment method too long")?;
    }
    if let Some(r) = &details.payment_reference {
        check_len(r, MAX_LABEL_LEN, "payment reference too long")?;
    }
    if details.price.is_sign_negative() && !details.price.is_zero() {
        return Err(EngineError::Validation("price must not be negative".into()));
    }
    Ok(())
}

impl Engine {
    /// Create a `pending` booking for the calling requester.
    ///
    /// The conflict check and the insert run under the pair's write lock, so
    /// two concurrent requests for overlapping times cannot both pass.
    /// Not idempotent: retrying after a `Persistence` error may create a
    /// second booking.
    pub async fn create_booking(
        &self,
        caller: Participant,
        request: NewBooking,
    ) -> Result<Booking, EngineError> {
        let requester_id = match caller {
            Participant::Requester { id } => id,
            Participant::Provider { .. } => {
                return Err(EngineError::Forbidden(
                    "only requesters may create bookings".into(),
                ));
            }
        };
        let scheduled_at = request
            .scheduled_at
            .ok_or_else(|| EngineError::Validation("scheduled_at is required".into()))?;
        validate_timestamp(scheduled_at)?;
        validate_details(&request.details)?;
        if self.store.booking_count() >= MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let key = PairKey {
            service_id: request.service_id,
            requester_id,
        };
        let _commit = self.begin_commit().await;
        let mut pair = self.store.pair_or_insert(key).write_owned().await;
        if pair.bookings.len() >= MAX_BOOKINGS_PER_PAIR {
            return Err(EngineError::LimitExceeded("too many bookings for this service"));
        }
        if let Err(e) = check_no_conflict(&pair, scheduled_at) {
            metrics::counter!(crate::observability::CONFLICTS_REJECTED_TOTAL).increment(1);
            tracing::debug!(
                "rejected booking for service {} requester {requester_id}: {e}",
                request.service_id
            );
            return Err(e);
        }

        let booking = Booking::new(
            self.allocate_id(),
            request.service_id,
            requester_id,
            scheduled_at,
            request.details,
            now_ms(),
        );
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut pair, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        Ok(booking)
    }

    /// Withdraw a booking nobody has committed to yet. Only the owner may do
    /// it, only while `pending`; the booking disappears and frees its window.
    pub async fn cancel_booking(
        &self,
        id: BookingId,
        caller: Participant,
    ) -> Result<Booking, EngineError> {
        let _commit = self.begin_commit().await;
        let mut pair = self.resolve_booking_write(id).await?;
        let current = pair.booking(id).ok_or(EngineError::NotFound(id))?;
        require_owner(current, caller, "cancel")?;
        if current.status != Status::Pending {
            return Err(EngineError::InvalidTransition {
                id,
                current: current.status,
                action: "cancel",
            });
        }
        let withdrawn = current.clone();
        self.persist_and_apply(&mut pair, &Event::BookingWithdrawn { id })
            .await?;
        tracing::info!("booking {id} withdrawn by {caller}");
        Ok(withdrawn)
    }

    /// Set the provider's progress flags. Flags left `None` keep their value;
    /// the status never changes here.
    pub async fn set_cleaner_progress(
        &self,
        id: BookingId,
        caller: Participant,
        started: Option<bool>,
        finished: Option<bool>,
    ) -> Result<Booking, EngineError> {
        if started.is_none() && finished.is_none() {
            return Err(EngineError::Validation(
                "at least one of cleaner_started, cleaner_finished is required".into(),
            ));
        }
        let _commit = self.begin_commit().await;
        let mut pair = self.resolve_booking_write(id).await?;
        let current = pair.booking(id).ok_or(EngineError::NotFound(id))?;
        require_assigned_provider(current, caller, "record progress on")?;
        require_open(current, "record progress on")?;

        let event = Event::ProgressRecorded {
            id,
            cleaner_started: started.unwrap_or(current.cleaner_started),
            cleaner_finished: finished.unwrap_or(current.cleaner_finished),
            at: stamp_after(current.updated_at),
        };
        self.persist_and_apply(&mut pair, &event).await?;
        pair.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Compact the WAL down to one snapshot per live booking.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _exclusive = self.lock_commits_exclusive().await;

        let mut events = Vec::with_capacity(self.store.booking_count() + 1);
        for pair in self.store.all_pairs() {
            let guard = pair.read().await;
            events.extend(guard.bookings.iter().map(|b| Event::BookingCreated {
                booking: b.clone(),
            }));
        }
        // Replay order only matters per booking, but keep ids ascending for
        // readable WAL dumps.
        events.sort_by_key(Event::booking_id);
        let count = events.len();
        events.insert(
            0,
            Event::IdsReserved {
                through: self.last_allocated_id(),
            },
        );
        self.request_compaction(events).await?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
