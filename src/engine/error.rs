use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::SlotTime;

#[derive(Debug)]
pub enum EngineError {
    NotFound(String),
    Forbidden(String),
    Invalid(String),
    AlreadyExists(Ulid),
    Inactive(Ulid),
    /// Slot already held by the given confirmed booking.
    Conflict {
        date: NaiveDate,
        time: SlotTime,
        booking: Ulid,
    },
    Closed(NaiveDate),
    SlotNotFound {
        date: NaiveDate,
        time: SlotTime,
    },
    SlotUnavailable {
        date: NaiveDate,
        time: SlotTime,
    },
    AlreadyCancelled(Ulid),
    ValidationFailed(Vec<String>),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "P0002",
            EngineError::Forbidden(_) => "42501",
            EngineError::Invalid(_) => "22023",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::Inactive(_) => "55006",
            EngineError::Conflict { .. }
            | EngineError::Closed(_)
            | EngineError::SlotNotFound { .. }
            | EngineError::SlotUnavailable { .. } => "23P01",
            EngineError::AlreadyCancelled(_) => "55000",
            EngineError::ValidationFailed(_) => "23514",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
        }
    }

    /// Store failures are the only non-recoverable outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Inactive(id) => write!(f, "resource {id} is inactive"),
            EngineError::Conflict { date, time, booking } => {
                write!(f, "slot {date} {time} already booked by {booking}")
            }
            EngineError::Closed(date) => write!(f, "day {date} is closed"),
            EngineError::SlotNotFound { date, time } => {
                write!(f, "no slot {time} on {date}")
            }
            EngineError::SlotUnavailable { date, time } => {
                write!(f, "slot {date} {time} is unavailable")
            }
            EngineError::AlreadyCancelled(id) => write!(f, "booking {id} is already cancelled"),
            EngineError::ValidationFailed(errors) => {
                write!(f, "pricing rules rejected: {}", errors.join("; "))
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
