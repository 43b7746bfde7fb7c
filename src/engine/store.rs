use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedPairState = Arc<RwLock<PairState>>;

/// In-memory booking table with the indexes the engine needs:
/// pair → bookings, booking → pair, requester → pairs.
///
/// Callers never hold a DashMap reference across an `.await`; pair handles are
/// cloned out first.
pub struct BookingStore {
    pairs: DashMap<PairKey, SharedPairState>,
    booking_to_pair: DashMap<BookingId, PairKey>,
    requester_pairs: DashMap<u64, Vec<PairKey>>,
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            pairs: DashMap::new(),
            booking_to_pair: DashMap::new(),
            requester_pairs: DashMap::new(),
        }
    }

    // ── Pairs ────────────────────────────────────────────────

    pub fn booking_count(&self) -> usize {
        self.booking_to_pair.len()
    }

    pub fn get_pair(&self, key: &PairKey) -> Option<SharedPairState> {
        self.pairs.get(key).map(|e| e.value().clone())
    }

    /// Fetch the pair, creating an empty one on first use.
    pub fn pair_or_insert(&self, key: PairKey) -> SharedPairState {
        if let Some(existing) = self.get_pair(&key) {
            return existing;
        }
        let mut created = false;
        let pair = self
            .pairs
            .entry(key)
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(PairState::new(key)))
            })
            .value()
            .clone();
        if created {
            self.requester_pairs
                .entry(key.requester_id)
                .or_default()
                .push(key);
        }
        pair
    }

    pub fn pair_for_booking(&self, id: BookingId) -> Option<PairKey> {
        self.booking_to_pair.get(&id).map(|e| *e.value())
    }

    pub fn pairs_of_requester(&self, requester_id: u64) -> Vec<SharedPairState> {
        let keys = self
            .requester_pairs
            .get(&requester_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        keys.iter().filter_map(|k| self.get_pair(k)).collect()
    }

    pub fn all_pairs(&self) -> Vec<SharedPairState> {
        self.pairs.iter().map(|e| e.value().clone()).collect()
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn get(&self, id: BookingId) -> Option<Booking> {
        let key = self.pair_for_booking(id)?;
        let pair = self.get_pair(&key)?;
        let guard = pair.read().await;
        guard.booking(id).cloned()
    }

    /// Every booking matching `predicate`, in no particular order.
    pub async fn find<P>(&self, predicate: P) -> Vec<Booking>
    where
        P: Fn(&Booking) -> bool,
    {
        collect_matching(self.all_pairs(), predicate).await
    }

    /// Like `find`, restricted to one requester's pairs.
    pub async fn find_for_requester<P>(&self, requester_id: u64, predicate: P) -> Vec<Booking>
    where
        P: Fn(&Booking) -> bool,
    {
        collect_matching(self.pairs_of_requester(requester_id), predicate).await
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to a pair whose write lock the caller holds.
    pub fn apply_event(&self, pair: &mut PairState, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                pair.insert_booking(booking.clone());
                self.booking_to_pair.insert(booking.id, pair.key);
            }
            Event::BookingAccepted {
                id,
                provider_id,
                at,
            } => {
                if let Some(b) = pair.booking_mut(*id) {
                    b.status = Status::Accepted;
                    b.provider_id = Some(*provider_id);
                    b.updated_at = *at;
                }
            }
            Event::BookingStarted { id, at } => {
                if let Some(b) = pair.booking_mut(*id) {
                    b.status = Status::InProgress;
                    b.updated_at = *at;
                }
            }
            Event::BookingFinished { id, at } => {
                if let Some(b) = pair.booking_mut(*id) {
                    b.status = Status::Finished;
                    b.updated_at = *at;
                }
            }
            Event::ProgressRecorded {
                id,
                cleaner_started,
                cleaner_finished,
                at,
            } => {
                if let Some(b) = pair.booking_mut(*id) {
                    b.cleaner_started = *cleaner_started;
                    b.cleaner_finished = *cleaner_finished;
                    b.updated_at = *at;
                }
            }
            Event::EvidenceReplaced {
                id,
                phase,
                refs,
                at,
            } => {
                if let Some(b) = pair.booking_mut(*id) {
                    match phase {
                        EvidencePhase::Before => b.evidence_before = refs.clone(),
                        EvidencePhase::After => b.evidence_after = refs.clone(),
                    }
                    b.updated_at = *at;
                }
            }
            Event::BookingWithdrawn { id } => {
                pair.remove_booking(*id);
                self.booking_to_pair.remove(id);
            }
            Event::IdsReserved { .. } => {}
        }
    }

    /// Apply a replayed WAL event. Only used while the engine is being built,
    /// so every lock is uncontended.
    pub fn replay_event(&self, event: &Event) {
        let key = match event {
            Event::BookingCreated { booking } => booking.pair(),
            other => match other.booking_id().and_then(|id| self.pair_for_booking(id)) {
                Some(key) => key,
                None => return,
            },
        };
        let pair = self.pair_or_insert(key);
        // Never blocking_write here: replay can run inside an async context
        // (lazy tenant creation).
        if let Ok(mut guard) = pair.try_write() {
            self.apply_event(&mut guard, event);
        }
    }
}

async fn collect_matching<P>(pairs: Vec<SharedPairState>, predicate: P) -> Vec<Booking>
where
    P: Fn(&Booking) -> bool,
{
    let mut out = Vec::new();
    for pair in pairs {
        let guard = pair.read().await;
        out.extend(guard.bookings.iter().filter(|b| predicate(*b)).cloned());
    }
    out
}
