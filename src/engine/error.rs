use crate::model::{BookingId, Ms, Status, Window};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or missing input.
    Validation(String),
    LimitExceeded(&'static str),
    /// Another active booking of the same service and requester sits inside
    /// the candidate's window.
    Conflict {
        existing: BookingId,
        existing_at: Ms,
        window: Window,
    },
    InvalidTransition {
        id: BookingId,
        current: Status,
        action: &'static str,
    },
    /// Right status, but a guard on the transition is not met yet.
    NotReady {
        id: BookingId,
        reason: &'static str,
    },
    Forbidden(String),
    NotFound(BookingId),
    Persistence(String),
}

impl EngineError {
    /// SQLSTATE reported to pgwire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::Conflict { .. } => "23P01",
            EngineError::InvalidTransition { .. } | EngineError::NotReady { .. } => "55000",
            EngineError::Forbidden(_) => "42501",
            EngineError::NotFound(_) => "P0002",
            EngineError::Persistence(_) => "58030",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Conflict {
                existing,
                existing_at,
                window,
            } => write!(
                f,
                "scheduling conflict: booking {existing} at {existing_at} falls inside [{}, {}]; \
                 bookings of the same service and requester must be more than 120 minutes apart",
                window.start, window.end
            ),
            EngineError::InvalidTransition {
                id,
                current,
                action,
            } => write!(f, "cannot {action} booking {id}: status is '{current}'"),
            EngineError::NotReady { id, reason } => write!(f, "booking {id} is not ready: {reason}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::Persistence(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
