//! Court scheduling and availability engine.
//!
//! Every component is a thin, stateless layer over a shared [`Storage`]:
//! each call reads current data and returns. The only in-memory state is the
//! guard's per-court lock table.

mod availability;
mod blackout;
mod conflict;
mod error;
mod guard;
mod hours;
mod pricing;

pub use availability::{AvailabilityPlanner, CourtFilter, ScanWindow};
pub use blackout::{BlackoutRegistry, effective_span, find_blackout_conflict};
pub use conflict::{BookingConflictIndex, first_booking_conflict};
pub use error::{ConflictReason, EngineError};
pub use guard::{BookingConflictGuard, Reservation};
pub use hours::{BusinessHoursCalendar, rules_admit};
pub use pricing::PriceTableValidator;

use std::sync::Arc;

use crate::clock::ArenaClock;
use crate::config::Config;
use crate::limits::*;
use crate::model::*;
use crate::store::Storage;

pub(crate) fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if minutes == 0 {
        return Err(EngineError::InvalidInput("duration must be positive"));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

pub(crate) fn validate_instant(instant: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&instant) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &MinuteWindow) -> Result<(), EngineError> {
    if !window.is_well_formed() {
        return Err(EngineError::InvalidInput("window start must be before end, within one day"));
    }
    Ok(())
}

/// All components wired over one store and one clock.
pub struct Engine<S> {
    store: Arc<S>,
    clock: ArenaClock,
    hours: BusinessHoursCalendar<S>,
    blackouts: BlackoutRegistry<S>,
    bookings: BookingConflictIndex<S>,
    pricing: PriceTableValidator<S>,
    planner: AvailabilityPlanner<S>,
    guard: BookingConflictGuard<S>,
}

impl<S: Storage> Engine<S> {
    pub fn new(store: Arc<S>, clock: ArenaClock, scan: ScanWindow) -> Self {
        Self {
            hours: BusinessHoursCalendar::new(store.clone()),
            blackouts: BlackoutRegistry::new(store.clone(), clock),
            bookings: BookingConflictIndex::new(store.clone()),
            pricing: PriceTableValidator::new(store.clone()),
            planner: AvailabilityPlanner::new(store.clone(), clock, scan),
            guard: BookingConflictGuard::new(store.clone(), clock),
            store,
            clock,
        }
    }

    pub fn from_config(store: Arc<S>, config: &Config) -> Result<Self, EngineError> {
        Ok(Self::new(store, config.clock()?, config.scan_window()?))
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> ArenaClock {
        self.clock
    }

    pub fn hours(&self) -> &BusinessHoursCalendar<S> {
        &self.hours
    }

    pub fn blackouts(&self) -> &BlackoutRegistry<S> {
        &self.blackouts
    }

    pub fn bookings(&self) -> &BookingConflictIndex<S> {
        &self.bookings
    }

    pub fn pricing(&self) -> &PriceTableValidator<S> {
        &self.pricing
    }

    pub fn planner(&self) -> &AvailabilityPlanner<S> {
        &self.planner
    }

    pub fn guard(&self) -> &BookingConflictGuard<S> {
        &self.guard
    }

    /// Create or update a court.
    pub async fn save_court(&self, court: Court) -> Result<(), EngineError> {
        if court.name.trim().is_empty() {
            return Err(EngineError::InvalidInput("court name must not be empty"));
        }
        if court.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("court name too long"));
        }
        self.store.save_court(court).await?;
        Ok(())
    }
}
