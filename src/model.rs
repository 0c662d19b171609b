use std::collections::BTreeSet;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only instant type.
pub type Ms = i64;

pub type ArenaId = Ulid;
pub type CourtId = Ulid;
pub type BookingId = Ulid;

pub const MINUTE_MS: Ms = 60_000;
pub const MINUTES_PER_DAY: u16 = 1440;

/// Half-open overlap: `[a_start, a_end) ∩ [b_start, b_end) ≠ ∅`.
///
/// Every overlap decision in the crate (bookings, blackouts, price bands,
/// business-hour rules) goes through this function.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Half-open interval `[start, end)` of UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span starting at `start` lasting `minutes`.
    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + minutes as Ms * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Half-open minute-of-day window `[start, end)`, `0 <= start < end <= 1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinuteWindow {
    pub start: u16,
    pub end: u16,
}

impl MinuteWindow {
    /// Build a window, returning `None` when it is malformed.
    pub fn new(start: u16, end: u16) -> Option<Self> {
        let window = Self { start, end };
        window.is_well_formed().then_some(window)
    }

    /// Whole hours, e.g. `MinuteWindow::hours(9, 22)`.
    pub fn hours(start: u16, end: u16) -> Option<Self> {
        Self::new(start * 60, end * 60)
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end && self.end <= MINUTES_PER_DAY
    }

    pub fn overlaps(&self, other: &MinuteWindow) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// True if `[start, start + minutes)` lies entirely inside this window.
    pub fn contains(&self, start: u32, minutes: u32) -> bool {
        self.start as u32 <= start && start + minutes <= self.end as u32
    }

    pub fn contains_minute(&self, minute: u32) -> bool {
        self.start as u32 <= minute && minute < self.end as u32
    }

    pub fn len_minutes(&self) -> u32 {
        (self.end - self.start) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: CourtId,
    pub arena_id: ArenaId,
    pub name: String,
    /// Sport-type tag used by search filters ("beach_tennis", "futevolei", ...).
    pub sport: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHourRule {
    pub id: Ulid,
    pub arena_id: ArenaId,
    pub weekday: Weekday,
    pub window: MinuteWindow,
    pub active: bool,
}

/// Which courts a blackout applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourtScope {
    AllCourts,
    SpecificCourts(BTreeSet<CourtId>),
}

impl CourtScope {
    pub fn covers(&self, court_id: &CourtId) -> bool {
        match self {
            CourtScope::AllCourts => true,
            CourtScope::SpecificCourts(ids) => ids.contains(court_id),
        }
    }

    /// Map the nullable list shape (`null`, `[]`, `["01H..", ...]`) onto a scope.
    /// Missing and empty lists both mean every court.
    pub fn from_optional(ids: Option<Vec<CourtId>>) -> Self {
        match ids {
            Some(ids) if !ids.is_empty() => CourtScope::SpecificCourts(ids.into_iter().collect()),
            _ => CourtScope::AllCourts,
        }
    }

    /// Parse the JSON-array-or-null column format.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let ids: Option<Vec<CourtId>> = serde_json::from_str(raw)?;
        Ok(Self::from_optional(ids))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blackout {
    pub id: Ulid,
    pub arena_id: ArenaId,
    pub scope: CourtScope,
    /// Inclusive, arena-local calendar days.
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    /// Hour-of-day sub-range re-applied on each day; `None` blocks whole days.
    pub hours: Option<MinuteWindow>,
    pub reason: Option<String>,
    pub active: bool,
}

impl Blackout {
    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.date_start <= date && date <= self.date_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub court_id: CourtId,
    pub start_at: Ms,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub label: Option<String>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.start_at, self.duration_minutes)
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    pub id: Ulid,
    pub court_id: CourtId,
    pub window: MinuteWindow,
    pub hourly_rate_cents: i64,
    pub active: bool,
}

/// A candidate (court, start, duration) being evaluated. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub court_id: CourtId,
    pub start_at: Ms,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.start_at, self.duration_minutes)
    }
}

/// Journal record format: flat, one variant per storage write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    CourtSaved(Court),
    BusinessHourSaved(BusinessHourRule),
    BlackoutSaved(Blackout),
    PriceBandSaved(PriceBand),
    BookingPlaced(Booking),
    BookingCancelled { id: BookingId, court_id: CourtId },
}
