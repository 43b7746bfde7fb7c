use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub type BookingId = u64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-width of the window around a booking's scheduled time in which no
/// other active booking of the same service and requester may sit.
pub const CONFLICT_RADIUS_MS: Ms = 120 * MINUTE_MS;

/// Closed interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Window start must not be after end");
        Self { start, end }
    }

    pub fn around(center: Ms, radius: Ms) -> Self {
        Self::new(center.saturating_sub(radius), center.saturating_add(radius))
    }

    pub fn contains(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Booking lifecycle. Moves only forward, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Accepted,
    InProgress,
    Finished,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::Accepted,
        Status::InProgress,
        Status::Finished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Accepted => "accepted",
            Status::InProgress => "in_progress",
            Status::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        Status::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// Transition table: the single state each status may advance to.
    pub fn next(self) -> Option<Status> {
        match self {
            Status::Pending => Some(Status::Accepted),
            Status::Accepted => Some(Status::InProgress),
            Status::InProgress => Some(Status::Finished),
            Status::Finished => None,
        }
    }

    pub fn can_advance_to(self, target: Status) -> bool {
        self.next() == Some(target)
    }

    /// Active bookings take part in conflict detection.
    pub fn is_active(self) -> bool {
        self != Status::Finished
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified caller identity handed to the engine by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant {
    Requester { id: u64 },
    Provider { id: u64 },
}

impl Participant {
    pub fn id(&self) -> u64 {
        match self {
            Participant::Requester { id } | Participant::Provider { id } => *id,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Participant::Requester { .. } => "requester",
            Participant::Provider { .. } => "provider",
        }
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role(), self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidencePhase {
    Before,
    After,
}

impl EvidencePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidencePhase::Before => "before",
            EvidencePhase::After => "after",
        }
    }
}

/// Descriptive and payment attributes fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    /// Provider owning the booked service, when the caller already knows it.
    pub provider_id: Option<u64>,
    pub address: String,
    pub description: String,
    pub requester_present: bool,
    pub recurring: bool,
    pub service_kind: String,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub card_id: Option<u64>,
    pub square_meters: u32,
    pub price: Decimal,
}

/// Everything `create_booking` needs beyond the caller's identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBooking {
    pub service_id: u64,
    pub scheduled_at: Option<Ms>,
    pub details: BookingDetails,
}

/// Conflicts are scoped to one service booked by one requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub service_id: u64,
    pub requester_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub service_id: u64,
    pub requester_id: u64,
    pub provider_id: Option<u64>,
    pub scheduled_at: Ms,
    pub status: Status,
    pub address: String,
    pub description: String,
    pub requester_present: bool,
    pub recurring: bool,
    pub service_kind: String,
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub card_id: Option<u64>,
    pub cleaner_started: bool,
    pub cleaner_finished: bool,
    pub evidence_before: Vec<String>,
    pub evidence_after: Vec<String>,
    pub square_meters: u32,
    pub price: Decimal,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn new(
        id: BookingId,
        service_id: u64,
        requester_id: u64,
        scheduled_at: Ms,
        details: BookingDetails,
        now: Ms,
    ) -> Self {
        Self {
            id,
            service_id,
            requester_id,
            provider_id: details.provider_id,
            scheduled_at,
            status: Status::Pending,
            address: details.address,
            description: details.description,
            requester_present: details.requester_present,
            recurring: details.recurring,
            service_kind: details.service_kind,
            payment_method: details.payment_method,
            payment_reference: details.payment_reference,
            card_id: details.card_id,
            cleaner_started: false,
            cleaner_finished: false,
            evidence_before: Vec::new(),
            evidence_after: Vec::new(),
            square_meters: details.square_meters,
            price: details.price,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey {
            service_id: self.service_id,
            requester_id: self.requester_id,
        }
    }

    pub fn evidence(&self, phase: EvidencePhase) -> &[String] {
        match phase {
            EvidencePhase::Before => &self.evidence_before,
            EvidencePhase::After => &self.evidence_after,
        }
    }
}

/// All bookings of one `(service, requester)` pair, sorted by `scheduled_at`.
/// The pair is the unit of locking: conflict checks and inserts happen under
/// one write guard.
#[derive(Debug, Clone)]
pub struct PairState {
    pub key: PairKey,
    pub bookings: Vec<Booking>,
}

impl PairState {
    pub fn new(key: PairKey) -> Self {
        Self {
            key,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by scheduled_at.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.scheduled_at <= booking.scheduled_at);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: BookingId) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings scheduled inside the closed window, finished ones included.
    pub fn scheduled_within(&self, window: &Window) -> impl Iterator<Item = &Booking> {
        let left = self
            .bookings
            .partition_point(|b| b.scheduled_at < window.start);
        let right = self
            .bookings
            .partition_point(|b| b.scheduled_at <= window.end);
        self.bookings[left..right.max(left)].iter()
    }
}

/// WAL record format. `BookingCreated` doubles as the compaction snapshot,
/// so it carries the full record rather than creation arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingAccepted {
        id: BookingId,
        provider_id: u64,
        at: Ms,
    },
    BookingStarted {
        id: BookingId,
        at: Ms,
    },
    BookingFinished {
        id: BookingId,
        at: Ms,
    },
    ProgressRecorded {
        id: BookingId,
        cleaner_started: bool,
        cleaner_finished: bool,
        at: Ms,
    },
    EvidenceReplaced {
        id: BookingId,
        phase: EvidencePhase,
        refs: Vec<String>,
        at: Ms,
    },
    BookingWithdrawn {
        id: BookingId,
    },
    /// Every id up to and including `through` has been handed out. Written at
    /// the head of a compacted log so withdrawn ids are never reused.
    IdsReserved {
        through: BookingId,
    },
}

impl Event {
    /// The booking the event touches; `None` for bookkeeping records.
    pub fn booking_id(&self) -> Option<BookingId> {
        match self {
            Event::BookingCreated { booking } => Some(booking.id),
            Event::BookingAccepted { id, .. }
            | Event::BookingStarted { id, .. }
            | Event::BookingFinished { id, .. }
            | Event::ProgressRecorded { id, .. }
            | Event::EvidenceReplaced { id, .. }
            | Event::BookingWithdrawn { id } => Some(*id),
            Event::IdsReserved { .. } => None,
        }
    }

    /// Highest booking id this event proves was allocated.
    pub fn allocated_id(&self) -> Option<BookingId> {
        match self {
            Event::BookingCreated { booking } => Some(booking.id),
            Event::IdsReserved { through } => Some(*through),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A status-change notice derived from a booking; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub booking_id: BookingId,
    pub service_kind: String,
    pub status: Status,
    pub message: String,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total_count: usize,
    pub total_pages: usize,
    pub current_page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictCheck {
    pub window: Window,
    pub conflicting: Option<BookingId>,
}
