use std::sync::Arc;

use crate::model::*;
use crate::store::Storage;

use super::{EngineError, validate_duration, validate_instant};

/// First confirmed booking overlapping `span`. Cancelled bookings never block.
pub fn first_booking_conflict<'a>(bookings: &'a [Booking], span: &Span) -> Option<&'a Booking> {
    bookings
        .iter()
        .find(|b| b.is_confirmed() && b.span().overlaps(span))
}

/// Overlap checks against a court's existing bookings.
pub struct BookingConflictIndex<S> {
    store: Arc<S>,
}

impl<S: Storage> BookingConflictIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Confirmed bookings of `court_id` overlapping `window`, sorted by start.
    pub async fn confirmed_in(&self, court_id: CourtId, window: Span) -> Result<Vec<Booking>, EngineError> {
        let mut bookings: Vec<Booking> = self
            .store
            .bookings(court_id, window)
            .await?
            .into_iter()
            .filter(|b| b.is_confirmed() && b.span().overlaps(&window))
            .collect();
        bookings.sort_by_key(|b| (b.start_at, b.id));
        Ok(bookings)
    }

    pub async fn conflicting_bookings(
        &self,
        court_id: CourtId,
        start_at: Ms,
        duration_minutes: u32,
    ) -> Result<Vec<Booking>, EngineError> {
        validate_duration(duration_minutes)?;
        validate_instant(start_at)?;
        self.confirmed_in(court_id, Span::from_minutes(start_at, duration_minutes))
            .await
    }

    pub async fn has_conflict(
        &self,
        court_id: CourtId,
        start_at: Ms,
        duration_minutes: u32,
    ) -> Result<bool, EngineError> {
        Ok(!self
            .conflicting_bookings(court_id, start_at, duration_minutes)
            .await?
            .is_empty())
    }
}
