use std::fmt;

use ulid::Ulid;

use crate::store::StorageError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed request, rejected before any data lookup.
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    NotFound(Ulid),
    /// Another active business-hour rule of the same arena and weekday overlaps.
    BusinessHourOverlap(Ulid),
    /// Another active price band of the same court overlaps.
    PriceBandOverlap(Ulid),
    /// Storage collaborator failed; nothing was written by the engine.
    Unavailable(String),
}

impl EngineError {
    /// Validation-kind errors are the caller's fault and safe to render directly.
    pub fn is_validation(&self) -> bool {
        !matches!(self, EngineError::Unavailable(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::BusinessHourOverlap(id) => {
                write!(f, "overlaps active business-hour rule {id}")
            }
            EngineError::PriceBandOverlap(id) => write!(f, "overlaps active price band {id}"),
            EngineError::Unavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Unavailable(other.to_string()),
        }
    }
}

/// Why a slot cannot be reserved. Expected outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    BusinessHoursClosed,
    BlackedOut(Ulid),
    AlreadyBooked(Ulid),
}

impl ConflictReason {
    /// Stable code rendered by callers.
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::BusinessHoursClosed => "BUSINESS_HOURS_CLOSED",
            ConflictReason::BlackedOut(_) => "BLACKED_OUT",
            ConflictReason::AlreadyBooked(_) => "ALREADY_BOOKED",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::BusinessHoursClosed => f.write_str("arena closed at that time"),
            ConflictReason::BlackedOut(id) => write!(f, "blocked by blackout {id}"),
            ConflictReason::AlreadyBooked(id) => write!(f, "overlaps booking {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_codes() {
        let id = Ulid::new();
        assert_eq!(ConflictReason::BusinessHoursClosed.code(), "BUSINESS_HOURS_CLOSED");
        assert_eq!(ConflictReason::BlackedOut(id).code(), "BLACKED_OUT");
        assert_eq!(ConflictReason::AlreadyBooked(id).code(), "ALREADY_BOOKED");
    }

    #[test]
    fn storage_errors_map_to_unavailable() {
        let e: EngineError = StorageError::Journal("disk full".into()).into();
        assert!(matches!(e, EngineError::Unavailable(_)));
        assert!(!e.is_validation());
        assert!(e.to_string().contains("disk full"));

        let id = Ulid::new();
        let e: EngineError = StorageError::NotFound(id).into();
        assert!(matches!(e, EngineError::NotFound(x) if x == id));
        assert!(e.is_validation());
    }
}
