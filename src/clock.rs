//! Arena-local calendar arithmetic.
//!
//! Instants are always UTC milliseconds. The arena's civil day, weekday and
//! minute-of-day are derived through one fixed offset (no DST), carried
//! explicitly by [`ArenaClock`] so nothing in the engine reads the wall clock.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Timelike, Weekday};

use crate::engine::EngineError;
use crate::model::{MINUTE_MS, MINUTES_PER_DAY, Ms, Span};

/// America/Sao_Paulo has observed UTC-3 year-round since 2019.
pub const SAO_PAULO_OFFSET_MINUTES: i32 = -180;

const DAY_MS: Ms = MINUTES_PER_DAY as Ms * MINUTE_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaClock {
    offset: FixedOffset,
}

impl Default for ArenaClock {
    fn default() -> Self {
        Self::sao_paulo()
    }
}

impl ArenaClock {
    /// Clock for a fixed offset east of UTC, in minutes (negative = west).
    pub fn with_offset_minutes(minutes: i32) -> Result<Self, EngineError> {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(EngineError::InvalidInput("utc offset out of range"))?;
        Ok(Self { offset })
    }

    pub fn sao_paulo() -> Self {
        Self {
            offset: FixedOffset::east_opt(SAO_PAULO_OFFSET_MINUTES * 60).expect("UTC-3 is a valid offset"),
        }
    }

    pub fn utc() -> Self {
        Self {
            offset: FixedOffset::east_opt(0).expect("UTC is a valid offset"),
        }
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    /// UTC instant of local midnight starting `date`.
    pub fn day_start(&self, date: NaiveDate) -> Ms {
        let midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        midnight - self.offset.local_minus_utc() as Ms * 1000
    }

    /// Local `[00:00, 24:00)` of `date` as a UTC span.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.day_start(date);
        Span::new(start, start + DAY_MS)
    }

    /// UTC instant of `date` at `minute_of_day` local.
    pub fn at_minute(&self, date: NaiveDate, minute_of_day: u32) -> Ms {
        self.day_start(date) + minute_of_day as Ms * MINUTE_MS
    }

    /// UTC instant of `date` at local wall time `time`.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> Ms {
        self.at_minute(date, minute_of_day(time))
    }

    /// Local civil date containing `instant`.
    pub fn local_date(&self, instant: Ms) -> NaiveDate {
        self.local(instant).date_naive()
    }

    /// Local minute-of-day of `instant` (seconds are truncated).
    pub fn local_minute(&self, instant: Ms) -> u32 {
        let local = self.local(instant);
        local.hour() * 60 + local.minute()
    }

    /// Every local calendar day touched by `span` (end exclusive).
    pub fn days_spanned(&self, span: &Span) -> Vec<NaiveDate> {
        let first = self.local_date(span.start);
        let last = self.local_date(span.end - 1);
        first.iter_days().take_while(|d| *d <= last).collect()
    }

    fn local(&self, instant: Ms) -> DateTime<FixedOffset> {
        // Out-of-range instants clamp to the epoch; callers validate inputs first.
        DateTime::from_timestamp_millis(instant)
            .unwrap_or_default()
            .with_timezone(&self.offset)
    }
}

pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

pub fn time_of_minute(minute: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
}

/// 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

pub fn weekday_from_index(index: u8) -> Result<Weekday, EngineError> {
    match index {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        _ => Err(EngineError::InvalidInput("weekday must be 0..=6")),
    }
}

pub fn weekday_of(date: NaiveDate) -> Weekday {
    date.weekday()
}

/// Parse an arena-local civil date, `YYYY-MM-DD`.
pub fn parse_civil_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidInput("date must be YYYY-MM-DD"))
}

/// Parse a time-of-day, `HH:MM` (seconds tolerated).
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, EngineError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| EngineError::InvalidInput("time must be HH:MM"))
}

pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Parse an RFC 3339 instant (`2025-03-04T14:00:00Z`) into UTC milliseconds.
/// A missing seconds field (`2025-03-04T14:00Z`) is accepted.
pub fn parse_instant(raw: &str) -> Result<Ms, EngineError> {
    let raw = raw.trim();
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt),
        Err(e) => match with_seconds(raw) {
            Some(padded) => DateTime::parse_from_rfc3339(&padded),
            None => Err(e),
        },
    };
    parsed
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| EngineError::InvalidInput("instant must be RFC 3339"))
}

/// `2025-03-04T14:00Z` -> `2025-03-04T14:00:00Z`.
fn with_seconds(raw: &str) -> Option<String> {
    let (date, rest) = raw.split_once('T')?;
    if rest.len() < 5 || !rest.is_char_boundary(5) || rest.as_bytes().get(5) == Some(&b':') {
        return None;
    }
    Some(format!("{date}T{}:00{}", &rest[..5], &rest[5..]))
}

/// Number of days in `[start, end]`, or `None` when `end < start`.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> Option<i64> {
    (start <= end).then(|| (end - start).num_days() + 1)
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}
