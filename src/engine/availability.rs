use std::iter::StepBy;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use futures::future::try_join_all;
use tracing::debug;

use crate::clock::{ArenaClock, minute_of_day, time_of_minute, weekday_of};
use crate::limits::*;
use crate::model::*;
use crate::observability::AVAILABILITY_QUERIES_TOTAL;
use crate::store::Storage;

use super::blackout::find_blackout_conflict;
use super::conflict::first_booking_conflict;
use super::hours::rules_admit;
use super::{EngineError, validate_duration};

/// Narrows a search to one court and/or one sport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourtFilter {
    pub court_id: Option<CourtId>,
    pub sport: Option<String>,
}

impl CourtFilter {
    pub fn court(court_id: CourtId) -> Self {
        Self {
            court_id: Some(court_id),
            sport: None,
        }
    }

    pub fn sport(sport: impl Into<String>) -> Self {
        Self {
            court_id: None,
            sport: Some(sport.into()),
        }
    }

    /// Sport tags compare case-insensitively; an untagged court never
    /// matches a sport filter.
    pub fn matches(&self, court: &Court) -> bool {
        if self.court_id.is_some_and(|id| id != court.id) {
            return false;
        }
        match (&self.sport, &court.sport) {
            (None, _) => true,
            (Some(want), Some(have)) => want.trim().to_lowercase() == have.trim().to_lowercase(),
            (Some(_), None) => false,
        }
    }
}

/// Local start times checked by a start-time search: every
/// `granularity_minutes` from `first_start_minute` through
/// `last_start_minute`, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub first_start_minute: u32,
    pub last_start_minute: u32,
    pub granularity_minutes: u32,
}

impl Default for ScanWindow {
    fn default() -> Self {
        Self {
            first_start_minute: 6 * 60,
            last_start_minute: 23 * 60,
            granularity_minutes: 60,
        }
    }
}

impl ScanWindow {
    pub fn new(
        first_start_minute: u32,
        last_start_minute: u32,
        granularity_minutes: u32,
    ) -> Result<Self, EngineError> {
        if granularity_minutes == 0 || granularity_minutes > MINUTES_PER_DAY as u32 {
            return Err(EngineError::InvalidInput("scan granularity must be within one day"));
        }
        if first_start_minute > last_start_minute || last_start_minute >= MINUTES_PER_DAY as u32 {
            return Err(EngineError::InvalidInput("scan window must be ordered and within one day"));
        }
        Ok(Self {
            first_start_minute,
            last_start_minute,
            granularity_minutes,
        })
    }

    pub fn candidates(&self) -> StepBy<RangeInclusive<u32>> {
        (self.first_start_minute..=self.last_start_minute).step_by(self.granularity_minutes as usize)
    }
}

/// Everything a day's availability depends on, read once per query.
struct DaySnapshot {
    rules: Vec<BusinessHourRule>,
    blackouts: Vec<Blackout>,
    courts: Vec<(Court, Vec<Booking>)>,
}

impl DaySnapshot {
    fn court_free(&self, court: &Court, bookings: &[Booking], span: &Span, clock: &ArenaClock) -> bool {
        find_blackout_conflict(&self.blackouts, &court.id, span, clock).is_none()
            && first_booking_conflict(bookings, span).is_none()
    }
}

/// Answers "when is something free" and "what is free then" for an arena day.
pub struct AvailabilityPlanner<S> {
    store: Arc<S>,
    clock: ArenaClock,
    scan: ScanWindow,
}

impl<S: Storage> AvailabilityPlanner<S> {
    pub fn new(store: Arc<S>, clock: ArenaClock, scan: ScanWindow) -> Self {
        Self { store, clock, scan }
    }

    pub fn scan(&self) -> ScanWindow {
        self.scan
    }

    /// Ascending local start times at which at least one matching court can
    /// take a booking of `duration_minutes`.
    pub async fn list_available_start_times(
        &self,
        arena_id: ArenaId,
        date: NaiveDate,
        duration_minutes: u32,
        filter: Option<&CourtFilter>,
    ) -> Result<Vec<NaiveTime>, EngineError> {
        validate_duration(duration_minutes)?;
        if duration_minutes % self.scan.granularity_minutes != 0 {
            return Err(EngineError::InvalidInput("duration must be a multiple of the scan granularity"));
        }
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "query" => "start_times").increment(1);

        let window = Span::new(
            self.clock.at_minute(date, self.scan.first_start_minute),
            self.clock.at_minute(date, self.scan.last_start_minute + duration_minutes),
        );
        let Some(day) = self.snapshot(arena_id, date, window, filter).await? else {
            return Ok(Vec::new());
        };

        let mut times = Vec::new();
        for minute in self.scan.candidates() {
            if !rules_admit(&day.rules, minute, duration_minutes) {
                continue;
            }
            let span = Span::from_minutes(self.clock.at_minute(date, minute), duration_minutes);
            let any_free = day
                .courts
                .iter()
                .any(|(court, bookings)| day.court_free(court, bookings, &span, &self.clock));
            if any_free && let Some(time) = time_of_minute(minute) {
                times.push(time);
            }
        }
        debug!(
            "availability: {} start times for arena {arena_id} on {date} ({duration_minutes}m)",
            times.len()
        );
        Ok(times)
    }

    /// Matching courts free for the slot starting at local `start_time`,
    /// ordered by name case-insensitively, then id.
    pub async fn list_available_courts(
        &self,
        arena_id: ArenaId,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        filter: Option<&CourtFilter>,
    ) -> Result<Vec<CourtId>, EngineError> {
        validate_duration(duration_minutes)?;
        metrics::counter!(AVAILABILITY_QUERIES_TOTAL, "query" => "courts").increment(1);

        let minute = minute_of_day(start_time);
        let span = Span::from_minutes(self.clock.at_minute(date, minute), duration_minutes);
        let Some(day) = self.snapshot(arena_id, date, span, filter).await? else {
            return Ok(Vec::new());
        };
        if !rules_admit(&day.rules, minute, duration_minutes) {
            return Ok(Vec::new());
        }

        let mut free: Vec<&Court> = day
            .courts
            .iter()
            .filter(|(court, bookings)| day.court_free(court, bookings, &span, &self.clock))
            .map(|(court, _)| court)
            .collect();
        free.sort_by_cached_key(|c| (c.name.to_lowercase(), c.id));
        Ok(free.into_iter().map(|c| c.id).collect())
    }

    /// `None` when no active court matches; nothing else is read then.
    async fn snapshot(
        &self,
        arena_id: ArenaId,
        date: NaiveDate,
        window: Span,
        filter: Option<&CourtFilter>,
    ) -> Result<Option<DaySnapshot>, EngineError> {
        let courts: Vec<Court> = self
            .store
            .courts(arena_id)
            .await?
            .into_iter()
            .filter(|c| c.active && filter.is_none_or(|f| f.matches(c)))
            .collect();
        if courts.is_empty() {
            return Ok(None);
        }
        if courts.len() > MAX_COURTS_PER_QUERY {
            return Err(EngineError::LimitExceeded("too many courts in arena"));
        }

        let rules = self.store.business_hours(arena_id, weekday_of(date)).await?;
        let blackouts = self
            .store
            .blackouts(
                arena_id,
                self.clock.local_date(window.start),
                self.clock.local_date(window.end - 1),
            )
            .await?;
        let store = &self.store;
        let bookings = try_join_all(courts.iter().map(|c| store.bookings(c.id, window))).await?;

        Ok(Some(DaySnapshot {
            rules,
            blackouts,
            courts: courts.into_iter().zip(bookings).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_civil_date;
    use crate::store::MemoryStore;
    use chrono::Weekday;
    use ulid::Ulid;

    fn court(arena_id: ArenaId, name: &str, sport: Option<&str>) -> Court {
        Court {
            id: Ulid::new(),
            arena_id,
            name: name.into(),
            sport: sport.map(Into::into),
            active: true,
        }
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn scan_window_includes_last_start() {
        let scan = ScanWindow::default();
        let starts: Vec<u32> = scan.candidates().collect();
        assert_eq!(starts.len(), 18);
        assert_eq!(starts.first(), Some(&360));
        assert_eq!(starts.last(), Some(&1380));

        let half = ScanWindow::new(600, 660, 30).unwrap();
        assert_eq!(half.candidates().collect::<Vec<_>>(), vec![600, 630, 660]);
    }

    #[test]
    fn scan_window_validation() {
        assert!(ScanWindow::new(600, 540, 60).is_err());
        assert!(ScanWindow::new(600, 1440, 60).is_err());
        assert!(ScanWindow::new(600, 660, 0).is_err());
    }

    #[test]
    fn filter_matching() {
        let arena = Ulid::new();
        let padel = court(arena, "Padel 1", Some("Padel"));
        let bare = court(arena, "Quadra 2", None);

        assert!(CourtFilter::default().matches(&padel));
        assert!(CourtFilter::sport("padel").matches(&padel));
        assert!(CourtFilter::sport(" PADEL ").matches(&padel));
        assert!(!CourtFilter::sport("tennis").matches(&padel));
        assert!(!CourtFilter::sport("padel").matches(&bare));
        assert!(CourtFilter::court(bare.id).matches(&bare));
        assert!(!CourtFilter::court(bare.id).matches(&padel));
    }

    #[tokio::test]
    async fn no_courts_means_no_times() {
        let planner = AvailabilityPlanner::new(Arc::new(MemoryStore::new()), ArenaClock::utc(), ScanWindow::default());
        let date = parse_civil_date("2025-03-04").unwrap();
        assert!(planner.list_available_start_times(Ulid::new(), date, 60, None).await.unwrap().is_empty());
        assert!(planner.list_available_courts(Ulid::new(), date, hm(10, 0), 60, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duration_must_match_granularity() {
        let planner = AvailabilityPlanner::new(Arc::new(MemoryStore::new()), ArenaClock::utc(), ScanWindow::default());
        let date = parse_civil_date("2025-03-04").unwrap();
        assert!(matches!(
            planner.list_available_start_times(Ulid::new(), date, 90, None).await,
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            planner.list_available_start_times(Ulid::new(), date, 0, None).await,
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn inactive_courts_skipped() {
        let store = Arc::new(MemoryStore::new());
        let arena = Ulid::new();
        let mut closed = court(arena, "Antiga", None);
        closed.active = false;
        store.save_court(closed).await.unwrap();
        store
            .save_business_hour(BusinessHourRule {
                id: Ulid::new(),
                arena_id: arena,
                weekday: Weekday::Tue,
                window: MinuteWindow::hours(9, 22).unwrap(),
                active: true,
            })
            .await
            .unwrap();

        let planner = AvailabilityPlanner::new(store, ArenaClock::utc(), ScanWindow::default());
        let date = parse_civil_date("2025-03-04").unwrap();
        assert!(planner.list_available_start_times(arena, date, 60, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn courts_sorted_by_name_ignoring_case() {
        let store = Arc::new(MemoryStore::new());
        let arena = Ulid::new();
        let names = ["beta", "Alpha", "gamma", "Beta"];
        for name in names {
            store.save_court(court(arena, name, None)).await.unwrap();
        }
        store
            .save_business_hour(BusinessHourRule {
                id: Ulid::new(),
                arena_id: arena,
                weekday: Weekday::Tue,
                window: MinuteWindow::hours(9, 22).unwrap(),
                active: true,
            })
            .await
            .unwrap();

        let planner = AvailabilityPlanner::new(store.clone(), ArenaClock::utc(), ScanWindow::default());
        let date = parse_civil_date("2025-03-04").unwrap();
        let ids = planner.list_available_courts(arena, date, hm(10, 0), 60, None).await.unwrap();

        let all = store.courts(arena).await.unwrap();
        let name_of = |id: &CourtId| all.iter().find(|c| c.id == *id).unwrap().name.to_lowercase();
        let sorted: Vec<String> = ids.iter().map(name_of).collect();
        assert_eq!(sorted, vec!["alpha", "beta", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn closed_slot_returns_no_courts() {
        let store = Arc::new(MemoryStore::new());
        let arena = Ulid::new();
        store.save_court(court(arena, "Quadra 1", None)).await.unwrap();
        store
            .save_business_hour(BusinessHourRule {
                id: Ulid::new(),
                arena_id: arena,
                weekday: Weekday::Tue,
                window: MinuteWindow::hours(9, 22).unwrap(),
                active: true,
            })
            .await
            .unwrap();

        let planner = AvailabilityPlanner::new(store, ArenaClock::utc(), ScanWindow::default());
        let date = parse_civil_date("2025-03-04").unwrap();
        assert!(planner.list_available_courts(arena, date, hm(8, 0), 60, None).await.unwrap().is_empty());
        assert!(planner.list_available_courts(arena, date, hm(21, 30), 60, None).await.unwrap().is_empty());
        assert_eq!(planner.list_available_courts(arena, date, hm(21, 0), 60, None).await.unwrap().len(), 1);
    }
}
