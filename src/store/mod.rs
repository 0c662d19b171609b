//! Storage collaborator boundary.
//!
//! The engine never persists anything on its own; every read and write goes
//! through [`Storage`]. [`MemoryStore`] is the in-process implementation,
//! optionally journaled to disk, and [`CachedStorage`] layers a short-lived
//! read cache over any store for the read-mostly tables.

mod cache;
mod memory;

pub use cache::CachedStorage;
pub use memory::MemoryStore;

use std::fmt;

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use ulid::Ulid;

use crate::model::*;

#[derive(Debug)]
pub enum StorageError {
    NotFound(Ulid),
    /// The booking being inserted overlaps this confirmed booking.
    Overlap(BookingId),
    Journal(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(id) => write!(f, "record not found: {id}"),
            StorageError::Overlap(id) => write!(f, "overlaps confirmed booking: {id}"),
            StorageError::Journal(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Read/write access to the scheduling tables.
///
/// Reads return records regardless of their `active`/`status` flags; the
/// engine components own the filtering so each predicate has one definition.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn courts(&self, arena_id: ArenaId) -> Result<Vec<Court>, StorageError>;

    async fn court(&self, court_id: CourtId) -> Result<Option<Court>, StorageError>;

    async fn business_hours(
        &self,
        arena_id: ArenaId,
        weekday: Weekday,
    ) -> Result<Vec<BusinessHourRule>, StorageError>;

    /// Blackouts of the arena whose date range intersects `[from, to]`.
    async fn blackouts(
        &self,
        arena_id: ArenaId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Blackout>, StorageError>;

    /// Bookings of the court whose occupied span overlaps `window`.
    async fn bookings(&self, court_id: CourtId, window: Span) -> Result<Vec<Booking>, StorageError>;

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StorageError>;

    async fn price_bands(&self, court_id: CourtId) -> Result<Vec<PriceBand>, StorageError>;

    async fn save_court(&self, court: Court) -> Result<(), StorageError>;

    async fn save_business_hour(&self, rule: BusinessHourRule) -> Result<(), StorageError>;

    async fn save_blackout(&self, blackout: Blackout) -> Result<(), StorageError>;

    async fn save_price_band(&self, band: PriceBand) -> Result<(), StorageError>;

    /// Insert a confirmed booking. Must fail with [`StorageError::Overlap`]
    /// instead of writing when a confirmed booking of the same court overlaps;
    /// the check and the write are one atomic step.
    async fn insert_booking(&self, booking: Booking) -> Result<(), StorageError>;

    /// Mark a booking cancelled and return it.
    async fn cancel_booking(&self, id: BookingId) -> Result<Booking, StorageError>;
}
