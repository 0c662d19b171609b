use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::model::*;
use crate::wal::JournalHandle;

use super::{Storage, StorageError};

/// Bookings of one court, sorted by `start_at`.
#[derive(Debug, Default)]
struct CourtBookings {
    bookings: Vec<Booking>,
}

impl CourtBookings {
    fn insert(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start_at, |b| b.start_at)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    fn get_mut(&mut self, id: &BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings (any status) whose span overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.start_at < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span().overlaps(query))
    }
}

type SharedCourtBookings = Arc<RwLock<CourtBookings>>;

/// In-process [`Storage`], optionally journaled through a [`JournalHandle`].
pub struct MemoryStore {
    courts: DashMap<CourtId, Court>,
    arena_courts: DashMap<ArenaId, Vec<CourtId>>,
    business_hours: DashMap<ArenaId, Vec<BusinessHourRule>>,
    blackouts: DashMap<ArenaId, Vec<Blackout>>,
    price_bands: DashMap<CourtId, Vec<PriceBand>>,
    bookings: DashMap<CourtId, SharedCourtBookings>,
    booking_to_court: DashMap<BookingId, CourtId>,
    /// Serializes journal-append + apply for the non-booking tables.
    config_lock: Mutex<()>,
    /// Every journaled write holds this shared; compaction holds it
    /// exclusively, so the snapshot it writes contains every acknowledged
    /// write and no write lands in the file it replaces.
    writes: RwLock<()>,
    journal: Option<JournalHandle>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store, nothing survives the process.
    pub fn new() -> Self {
        Self {
            courts: DashMap::new(),
            arena_courts: DashMap::new(),
            business_hours: DashMap::new(),
            blackouts: DashMap::new(),
            price_bands: DashMap::new(),
            bookings: DashMap::new(),
            booking_to_court: DashMap::new(),
            config_lock: Mutex::new(()),
            writes: RwLock::new(()),
            journal: None,
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Must be called inside a tokio runtime (the journal writer is a task).
    pub fn open(path: &Path) -> io::Result<Self> {
        let (journal, records) = JournalHandle::open(path)?;
        let mut store = Self::new();

        // Sole owner during replay: build booking lists unlocked, wrap at the end.
        let mut bookings: HashMap<CourtId, CourtBookings> = HashMap::new();
        for record in &records {
            match record {
                Record::BookingPlaced(b) => {
                    store.booking_to_court.insert(b.id, b.court_id);
                    bookings.entry(b.court_id).or_default().insert(b.clone());
                }
                Record::BookingCancelled { id, court_id } => {
                    if let Some(b) = bookings.get_mut(court_id).and_then(|cb| cb.get_mut(id)) {
                        b.status = BookingStatus::Cancelled;
                    }
                }
                other => store.apply_config(other),
            }
        }
        for (court_id, list) in bookings {
            store.bookings.insert(court_id, Arc::new(RwLock::new(list)));
        }

        info!("journal {} replayed: {} records", path.display(), records.len());
        store.journal = Some(journal);
        Ok(store)
    }

    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }

    async fn append_journal(&self, record: Record) -> Result<(), StorageError> {
        match &self.journal {
            Some(journal) => journal.append(record).await,
            None => Ok(()),
        }
    }

    /// Journal then apply a court / hours / blackout / price-band record.
    async fn persist_config(&self, record: Record) -> Result<(), StorageError> {
        let _writing = self.writes.read().await;
        let _guard = self.config_lock.lock().await;
        self.append_journal(record.clone()).await?;
        self.apply_config(&record);
        Ok(())
    }

    fn apply_config(&self, record: &Record) {
        match record {
            Record::CourtSaved(court) => {
                if let Some(prev) = self.courts.insert(court.id, court.clone())
                    && prev.arena_id != court.arena_id
                    && let Some(mut ids) = self.arena_courts.get_mut(&prev.arena_id)
                {
                    ids.retain(|id| *id != court.id);
                }
                let mut ids = self.arena_courts.entry(court.arena_id).or_default();
                if !ids.contains(&court.id) {
                    ids.push(court.id);
                }
            }
            Record::BusinessHourSaved(rule) => {
                upsert(&mut self.business_hours.entry(rule.arena_id).or_default(), rule.clone(), |r| r.id);
            }
            Record::BlackoutSaved(blackout) => {
                upsert(&mut self.blackouts.entry(blackout.arena_id).or_default(), blackout.clone(), |b| b.id);
            }
            Record::PriceBandSaved(band) => {
                upsert(&mut self.price_bands.entry(band.court_id).or_default(), band.clone(), |b| b.id);
            }
            Record::BookingPlaced(_) | Record::BookingCancelled { .. } => {
                debug!("booking records are applied under the court lock");
            }
        }
    }

    fn court_bookings(&self, court_id: CourtId) -> SharedCourtBookings {
        self.bookings.entry(court_id).or_default().value().clone()
    }

    /// Rewrite the journal with the minimal record set for the current state.
    /// No-op for a volatile store.
    pub async fn compact(&self) -> Result<(), StorageError> {
        let Some(journal) = &self.journal else { return Ok(()) };
        let _exclusive = self.writes.write().await;

        let mut records: Vec<Record> = Vec::new();
        records.extend(self.courts.iter().map(|e| Record::CourtSaved(e.value().clone())));
        for e in self.business_hours.iter() {
            records.extend(e.value().iter().cloned().map(Record::BusinessHourSaved));
        }
        for e in self.blackouts.iter() {
            records.extend(e.value().iter().cloned().map(Record::BlackoutSaved));
        }
        for e in self.price_bands.iter() {
            records.extend(e.value().iter().cloned().map(Record::PriceBandSaved));
        }

        // No writer holds `writes`, so every court list is complete and stable.
        let lists: Vec<SharedCourtBookings> = self.bookings.iter().map(|e| e.value().clone()).collect();
        for list in &lists {
            let guard = list.read().await;
            records.extend(guard.bookings.iter().cloned().map(Record::BookingPlaced));
        }

        let count = records.len();
        journal.rewrite(records).await?;
        info!("journal compacted to {count} records");
        Ok(())
    }

    /// Compact once the journal has grown past `threshold` appends.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, StorageError> {
        let Some(journal) = &self.journal else { return Ok(false) };
        if journal.backlog().await? < threshold {
            return Ok(false);
        }
        self.compact().await?;
        Ok(true)
    }
}

fn upsert<T>(list: &mut Vec<T>, item: T, id: impl Fn(&T) -> ulid::Ulid) {
    let key = id(&item);
    match list.iter_mut().find(|existing| id(existing) == key) {
        Some(slot) => *slot = item,
        None => list.push(item),
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn courts(&self, arena_id: ArenaId) -> Result<Vec<Court>, StorageError> {
        let ids = self
            .arena_courts
            .get(&arena_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.courts.get(id).map(|c| c.value().clone()))
            .collect())
    }

    async fn court(&self, court_id: CourtId) -> Result<Option<Court>, StorageError> {
        Ok(self.courts.get(&court_id).map(|c| c.value().clone()))
    }

    async fn business_hours(
        &self,
        arena_id: ArenaId,
        weekday: Weekday,
    ) -> Result<Vec<BusinessHourRule>, StorageError> {
        Ok(self
            .business_hours
            .get(&arena_id)
            .map(|rules| rules.iter().filter(|r| r.weekday == weekday).cloned().collect())
            .unwrap_or_default())
    }

    async fn blackouts(
        &self,
        arena_id: ArenaId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Blackout>, StorageError> {
        Ok(self
            .blackouts
            .get(&arena_id)
            .map(|list| {
                list.iter()
                    .filter(|b| b.date_start <= to && from <= b.date_end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn bookings(&self, court_id: CourtId, window: Span) -> Result<Vec<Booking>, StorageError> {
        let Some(list) = self.bookings.get(&court_id).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let guard = list.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StorageError> {
        let Some(court_id) = self.booking_to_court.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let list = self.court_bookings(court_id);
        let guard = list.read().await;
        Ok(guard.bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn price_bands(&self, court_id: CourtId) -> Result<Vec<PriceBand>, StorageError> {
        Ok(self
            .price_bands
            .get(&court_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn save_court(&self, court: Court) -> Result<(), StorageError> {
        self.persist_config(Record::CourtSaved(court)).await
    }

    async fn save_business_hour(&self, rule: BusinessHourRule) -> Result<(), StorageError> {
        self.persist_config(Record::BusinessHourSaved(rule)).await
    }

    async fn save_blackout(&self, blackout: Blackout) -> Result<(), StorageError> {
        self.persist_config(Record::BlackoutSaved(blackout)).await
    }

    async fn save_price_band(&self, band: PriceBand) -> Result<(), StorageError> {
        self.persist_config(Record::PriceBandSaved(band)).await
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StorageError> {
        if !self.courts.contains_key(&booking.court_id) {
            return Err(StorageError::NotFound(booking.court_id));
        }
        let _writing = self.writes.read().await;
        let list = self.court_bookings(booking.court_id);
        let mut guard = list.write().await;

        let span = booking.span();
        if let Some(existing) = guard.overlapping(&span).find(|b| b.is_confirmed()) {
            return Err(StorageError::Overlap(existing.id));
        }

        self.append_journal(Record::BookingPlaced(booking.clone())).await?;
        self.booking_to_court.insert(booking.id, booking.court_id);
        guard.insert(booking);
        Ok(())
    }

    async fn cancel_booking(&self, id: BookingId) -> Result<Booking, StorageError> {
        let court_id = self
            .booking_to_court
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StorageError::NotFound(id))?;
        let _writing = self.writes.read().await;
        let list = self.court_bookings(court_id);
        let mut guard = list.write().await;

        let already_cancelled = match guard.get_mut(&id) {
            Some(b) => b.status == BookingStatus::Cancelled,
            None => return Err(StorageError::NotFound(id)),
        };
        if !already_cancelled {
            self.append_journal(Record::BookingCancelled { id, court_id }).await?;
        }
        let booking = guard.get_mut(&id).ok_or(StorageError::NotFound(id))?;
        booking.status = BookingStatus::Cancelled;
        Ok(booking.clone())
    }
}
