use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::{ArenaClock, weekday_of};
use crate::limits::*;
use crate::model::*;
use crate::observability::{RESERVATIONS_TOTAL, RESERVE_DURATION_SECONDS};
use crate::store::{Storage, StorageError};

use super::{
    BlackoutRegistry, BookingConflictIndex, BusinessHoursCalendar, ConflictReason, EngineError,
    validate_duration, validate_instant,
};

/// Outcome of a reservation attempt. A conflict is an expected answer, not
/// an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Reserved(BookingId),
    Conflict(ConflictReason),
}

impl Reservation {
    pub fn booking_id(&self) -> Option<BookingId> {
        match self {
            Reservation::Reserved(id) => Some(*id),
            Reservation::Conflict(_) => None,
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Reservation::Reserved(_) => "reserved",
            Reservation::Conflict(ConflictReason::BusinessHoursClosed) => "closed",
            Reservation::Conflict(ConflictReason::BlackedOut(_)) => "blacked_out",
            Reservation::Conflict(ConflictReason::AlreadyBooked(_)) => "already_booked",
        }
    }
}

/// Atomic check-then-insert for bookings.
///
/// Attempts on the same court are serialized by a per-court async mutex, so
/// the checks and the insert see the same data. Different courts proceed in
/// parallel. The store's own overlap check at insert covers writers that do
/// not share this guard.
pub struct BookingConflictGuard<S> {
    store: Arc<S>,
    clock: ArenaClock,
    hours: BusinessHoursCalendar<S>,
    blackouts: BlackoutRegistry<S>,
    bookings: BookingConflictIndex<S>,
    locks: DashMap<CourtId, Arc<Mutex<()>>>,
}

impl<S: Storage> BookingConflictGuard<S> {
    pub fn new(store: Arc<S>, clock: ArenaClock) -> Self {
        Self {
            hours: BusinessHoursCalendar::new(store.clone()),
            blackouts: BlackoutRegistry::new(store.clone(), clock),
            bookings: BookingConflictIndex::new(store.clone()),
            store,
            clock,
            locks: DashMap::new(),
        }
    }

    fn court_lock(&self, court_id: CourtId) -> Arc<Mutex<()>> {
        self.locks.entry(court_id).or_default().clone()
    }

    /// Book `[start_at, start_at + duration_minutes)` on `court_id` if it is
    /// open, not blacked out and not already booked. Nothing is written
    /// unless the result is `Reserved`.
    pub async fn reserve(
        &self,
        court_id: CourtId,
        start_at: Ms,
        duration_minutes: u32,
        label: Option<String>,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self
            .reserve_inner(court_id, start_at, duration_minutes, label)
            .await;
        let outcome = match &result {
            Ok(r) => r.outcome_label(),
            Err(e) if e.is_validation() => "rejected",
            Err(_) => "error",
        };
        metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(RESERVE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    async fn reserve_inner(
        &self,
        court_id: CourtId,
        start_at: Ms,
        duration_minutes: u32,
        label: Option<String>,
    ) -> Result<Reservation, EngineError> {
        validate_duration(duration_minutes)?;
        validate_instant(start_at)?;
        if start_at.rem_euclid(MINUTE_MS) != 0 {
            return Err(EngineError::InvalidInput("start must fall on a whole minute"));
        }
        if let Some(ref l) = label
            && l.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("booking label too long"));
        }
        let court = self
            .store
            .court(court_id)
            .await?
            .ok_or(EngineError::NotFound(court_id))?;
        if !court.active {
            return Err(EngineError::InvalidInput("court is inactive"));
        }

        let lock = self.court_lock(court_id);
        let _held = lock.lock().await;

        let date = self.clock.local_date(start_at);
        let minute = self.clock.local_minute(start_at);
        if !self
            .hours
            .is_open(court.arena_id, weekday_of(date), minute, duration_minutes)
            .await?
        {
            debug!("reserve: court {court_id} closed at {date} minute {minute}");
            return Ok(Reservation::Conflict(ConflictReason::BusinessHoursClosed));
        }
        if let Some(blackout_id) = self
            .blackouts
            .conflicting_blackout(court_id, court.arena_id, start_at, duration_minutes)
            .await?
        {
            debug!("reserve: court {court_id} blacked out by {blackout_id}");
            return Ok(Reservation::Conflict(ConflictReason::BlackedOut(blackout_id)));
        }
        if let Some(existing) = self
            .bookings
            .conflicting_bookings(court_id, start_at, duration_minutes)
            .await?
            .first()
        {
            debug!("reserve: court {court_id} already booked by {}", existing.id);
            return Ok(Reservation::Conflict(ConflictReason::AlreadyBooked(existing.id)));
        }

        let booking = Booking {
            id: Ulid::new(),
            court_id,
            start_at,
            duration_minutes,
            status: BookingStatus::Confirmed,
            label,
        };
        let id = booking.id;
        match self.store.insert_booking(booking).await {
            Ok(()) => {
                info!("reserve: booking {id} on court {court_id} at {start_at} for {duration_minutes}m");
                Ok(Reservation::Reserved(id))
            }
            Err(StorageError::Overlap(existing)) => {
                warn!("reserve: store rejected overlap with {existing} on court {court_id}");
                Ok(Reservation::Conflict(ConflictReason::AlreadyBooked(existing)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel a booking, freeing its slot immediately. Cancelling twice is a
    /// no-op returning the cancelled booking.
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Booking, EngineError> {
        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or(EngineError::NotFound(booking_id))?;
        let lock = self.court_lock(booking.court_id);
        let _held = lock.lock().await;
        let cancelled = self.store.cancel_booking(booking_id).await?;
        info!("cancel: booking {booking_id} on court {}", cancelled.court_id);
        Ok(cancelled)
    }
}
