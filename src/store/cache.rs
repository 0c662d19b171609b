use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use dashmap::DashMap;
use tracing::debug;

use crate::model::*;
use crate::observability::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

use super::{Storage, StorageError};

struct Cached<T> {
    value: T,
    loaded_at: Instant,
}

/// Read-through TTL cache for the read-mostly tables (courts, business hours,
/// blackouts, price bands). Writes made through the cache invalidate the
/// affected keys. Bookings always go straight to the inner store.
pub struct CachedStorage<S> {
    inner: S,
    ttl: Duration,
    courts: DashMap<ArenaId, Cached<Vec<Court>>>,
    hours: DashMap<(ArenaId, Weekday), Cached<Vec<BusinessHourRule>>>,
    /// Every blackout of the arena; date ranges are filtered on read so the
    /// map holds one entry per arena however many ranges are queried.
    blackouts: DashMap<ArenaId, Cached<Vec<Blackout>>>,
    bands: DashMap<CourtId, Cached<Vec<PriceBand>>>,
}

impl<S: Storage> CachedStorage<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            courts: DashMap::new(),
            hours: DashMap::new(),
            blackouts: DashMap::new(),
            bands: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.courts.clear();
        self.hours.clear();
        self.blackouts.clear();
        self.bands.clear();
    }

    async fn read_through<K, T, F, Fut>(
        &self,
        map: &DashMap<K, Cached<T>>,
        key: K,
        table: &'static str,
        load: F,
    ) -> Result<T, StorageError>
    where
        K: Eq + Hash,
        T: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        if let Some(entry) = map.get(&key)
            && entry.loaded_at.elapsed() < self.ttl
        {
            metrics::counter!(CACHE_HITS_TOTAL, "table" => table).increment(1);
            return Ok(entry.value.clone());
        }
        metrics::counter!(CACHE_MISSES_TOTAL, "table" => table).increment(1);
        let value = load().await?;
        map.insert(
            key,
            Cached {
                value: value.clone(),
                loaded_at: Instant::now(),
            },
        );
        Ok(value)
    }
}

#[async_trait]
impl<S: Storage> Storage for CachedStorage<S> {
    async fn courts(&self, arena_id: ArenaId) -> Result<Vec<Court>, StorageError> {
        self.read_through(&self.courts, arena_id, "courts", || self.inner.courts(arena_id))
            .await
    }

    async fn court(&self, court_id: CourtId) -> Result<Option<Court>, StorageError> {
        self.inner.court(court_id).await
    }

    async fn business_hours(
        &self,
        arena_id: ArenaId,
        weekday: Weekday,
    ) -> Result<Vec<BusinessHourRule>, StorageError> {
        self.read_through(&self.hours, (arena_id, weekday), "business_hours", || {
            self.inner.business_hours(arena_id, weekday)
        })
        .await
    }

    async fn blackouts(
        &self,
        arena_id: ArenaId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Blackout>, StorageError> {
        let all = self
            .read_through(&self.blackouts, arena_id, "blackouts", || {
                self.inner.blackouts(arena_id, NaiveDate::MIN, NaiveDate::MAX)
            })
            .await?;
        Ok(all
            .into_iter()
            .filter(|b| b.date_start <= to && from <= b.date_end)
            .collect())
    }

    async fn bookings(&self, court_id: CourtId, window: Span) -> Result<Vec<Booking>, StorageError> {
        self.inner.bookings(court_id, window).await
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StorageError> {
        self.inner.booking(id).await
    }

    async fn price_bands(&self, court_id: CourtId) -> Result<Vec<PriceBand>, StorageError> {
        self.read_through(&self.bands, court_id, "price_bands", || self.inner.price_bands(court_id))
            .await
    }

    async fn save_court(&self, court: Court) -> Result<(), StorageError> {
        let (court_id, arena_id) = (court.id, court.arena_id);
        self.inner.save_court(court).await?;
        // The court may have moved arenas: drop every list that mentions it.
        self.courts
            .retain(|arena, list| *arena != arena_id && !list.value.iter().any(|c| c.id == court_id));
        debug!("cache: courts invalidated for arena {arena_id}");
        Ok(())
    }

    async fn save_business_hour(&self, rule: BusinessHourRule) -> Result<(), StorageError> {
        let arena_id = rule.arena_id;
        self.inner.save_business_hour(rule).await?;
        self.hours.retain(|(arena, _), _| *arena != arena_id);
        debug!("cache: business hours invalidated for arena {arena_id}");
        Ok(())
    }

    async fn save_blackout(&self, blackout: Blackout) -> Result<(), StorageError> {
        let arena_id = blackout.arena_id;
        self.inner.save_blackout(blackout).await?;
        self.blackouts.remove(&arena_id);
        debug!("cache: blackouts invalidated for arena {arena_id}");
        Ok(())
    }

    async fn save_price_band(&self, band: PriceBand) -> Result<(), StorageError> {
        let court_id = band.court_id;
        self.inner.save_price_band(band).await?;
        self.bands.remove(&court_id);
        Ok(())
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StorageError> {
        self.inner.insert_booking(booking).await
    }

    async fn cancel_booking(&self, id: BookingId) -> Result<Booking, StorageError> {
        self.inner.cancel_booking(id).await
    }
}
