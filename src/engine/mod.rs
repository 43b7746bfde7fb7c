mod conflict;
mod error;
mod evidence;
mod lifecycle;
mod mutations;
mod notifications;
mod queries;
mod store;

pub use conflict::{conflict_window, find_conflict};
pub use error::EngineError;
pub use lifecycle::plan_transition;
pub use notifications::notice_message;
pub use store::{BookingStore, SharedPairState};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};

use crate::model::*;
use crate::wal::Wal;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Timestamp for the next mutation of a record last touched at `prev`.
/// Always strictly later, so `updated_at` advances even within one millisecond.
pub(crate) fn stamp_after(prev: Ms) -> Ms {
    now_ms().max(prev.saturating_add(1))
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Appends that queue up while a flush is in
/// progress are committed together with a single fsync.
async fn run_wal_writer(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Control commands must observe every append queued before them.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let (events, responders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    // All or nothing: a failed batch is cut back out of the log, and every
    // caller in it is told it failed.
    let result = wal.commit(&events);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for tx in responders {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// Booking engine for one tenant: in-memory store, durable through the WAL.
pub struct Engine {
    pub(super) store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    next_id: AtomicU64,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss an in-flight append.
    commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(run_wal_writer(wal, wal_rx));

        let store = BookingStore::new();
        let mut max_id: BookingId = 0;
        for event in &events {
            if let Some(id) = event.allocated_id() {
                max_id = max_id.max(id);
            }
            store.replay_event(event);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} WAL events, {} bookings live",
                events.len(),
                store.booking_count()
            );
        }

        Ok(Self {
            store,
            wal_tx,
            next_id: AtomicU64::new(max_id + 1),
            commit_gate: RwLock::new(()),
        })
    }

    pub fn store(&self) -> &BookingStore {
        &self.store
    }

    pub(super) fn allocate_id(&self) -> BookingId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Highest id handed out so far, 0 before the first booking.
    pub(super) fn last_allocated_id(&self) -> BookingId {
        self.next_id.load(Ordering::Relaxed) - 1
    }

    /// Taken before any pair lock by every mutation.
    pub(super) async fn begin_commit(&self) -> RwLockReadGuard<'_, ()> {
        self.commit_gate.read().await
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Make the event durable, then apply it to the locked pair. Nothing is
    /// applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        pair: &mut PairState,
        event: &Event,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.wal_append(event).await {
            tracing::error!("WAL append failed for booking {:?}: {e}", event.booking_id());
            return Err(e);
        }
        self.store.apply_event(pair, event);
        Ok(())
    }

    /// Lookup booking → pair, acquire the pair's write lock and confirm the
    /// booking is still there once the lock is held.
    pub(super) async fn resolve_booking_write(
        &self,
        id: BookingId,
    ) -> Result<OwnedRwLockWriteGuard<PairState>, EngineError> {
        let key = self
            .store
            .pair_for_booking(id)
            .ok_or(EngineError::NotFound(id))?;
        let pair = self.store.get_pair(&key).ok_or(EngineError::NotFound(id))?;
        let guard = pair.write_owned().await;
        if guard.booking(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub(super) async fn request_compaction(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Persistence("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    pub(super) async fn lock_commits_exclusive(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.commit_gate.write().await
    }
}
