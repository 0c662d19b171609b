use std::sync::Arc;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::{ArenaClock, inclusive_days};
use crate::limits::*;
use crate::model::*;
use crate::store::Storage;

use super::{EngineError, validate_duration, validate_instant, validate_window};

/// Effective UTC interval of `blackout` on local day `date`, or `None` when
/// the day is outside its date range. The hour sub-range is re-applied on
/// every day; without one the whole day is blocked.
pub fn effective_span(blackout: &Blackout, clock: &ArenaClock, date: NaiveDate) -> Option<Span> {
    if !blackout.covers_date(date) {
        return None;
    }
    Some(match blackout.hours {
        Some(hours) => Span::new(
            clock.at_minute(date, hours.start as u32),
            clock.at_minute(date, hours.end as u32),
        ),
        None => clock.day_span(date),
    })
}

/// First active blackout covering `court_id` whose effective interval on any
/// local day touched by `span` overlaps it.
pub fn find_blackout_conflict<'a>(
    blackouts: &'a [Blackout],
    court_id: &CourtId,
    span: &Span,
    clock: &ArenaClock,
) -> Option<&'a Blackout> {
    let days = clock.days_spanned(span);
    blackouts
        .iter()
        .filter(|b| b.active && b.scope.covers(court_id))
        .find(|b| {
            days.iter()
                .filter_map(|d| effective_span(b, clock, *d))
                .any(|blocked| blocked.overlaps(span))
        })
}

/// Administrator-defined windows during which courts cannot be booked.
pub struct BlackoutRegistry<S> {
    store: Arc<S>,
    clock: ArenaClock,
}

impl<S: Storage> BlackoutRegistry<S> {
    pub fn new(store: Arc<S>, clock: ArenaClock) -> Self {
        Self { store, clock }
    }

    pub async fn conflicts(
        &self,
        court_id: CourtId,
        arena_id: ArenaId,
        start_at: Ms,
        duration_minutes: u32,
    ) -> Result<bool, EngineError> {
        Ok(self
            .conflicting_blackout(court_id, arena_id, start_at, duration_minutes)
            .await?
            .is_some())
    }

    /// Id of the first blackout blocking the candidate slot.
    pub async fn conflicting_blackout(
        &self,
        court_id: CourtId,
        arena_id: ArenaId,
        start_at: Ms,
        duration_minutes: u32,
    ) -> Result<Option<Ulid>, EngineError> {
        validate_duration(duration_minutes)?;
        validate_instant(start_at)?;
        let span = Span::from_minutes(start_at, duration_minutes);
        let blackouts = self.load(arena_id, &span).await?;
        Ok(find_blackout_conflict(&blackouts, &court_id, &span, &self.clock).map(|b| b.id))
    }

    /// Blackouts of the arena touching any local day of `span`.
    pub(crate) async fn load(&self, arena_id: ArenaId, span: &Span) -> Result<Vec<Blackout>, EngineError> {
        let first = self.clock.local_date(span.start);
        let last = self.clock.local_date(span.end - 1);
        Ok(self.store.blackouts(arena_id, first, last).await?)
    }

    pub fn validate(blackout: &Blackout) -> Result<(), EngineError> {
        let days = inclusive_days(blackout.date_start, blackout.date_end)
            .ok_or(EngineError::InvalidInput("blackout start date must not be after end date"))?;
        if days > MAX_BLACKOUT_DAYS {
            return Err(EngineError::LimitExceeded("blackout spans too many days"));
        }
        if let Some(hours) = &blackout.hours {
            validate_window(hours)?;
        }
        if let CourtScope::SpecificCourts(ids) = &blackout.scope
            && ids.len() > MAX_COURTS_PER_QUERY
        {
            return Err(EngineError::LimitExceeded("blackout names too many courts"));
        }
        if let Some(reason) = &blackout.reason
            && reason.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("blackout reason too long"));
        }
        Ok(())
    }

    /// Validate then persist a create or update.
    pub async fn save_blackout(&self, blackout: Blackout) -> Result<(), EngineError> {
        Self::validate(&blackout)?;
        self.store.save_blackout(blackout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::parse_civil_date;
    use crate::store::MemoryStore;

    fn date(raw: &str) -> NaiveDate {
        parse_civil_date(raw).unwrap()
    }

    fn blackout(arena_id: ArenaId, start: &str, end: &str, hours: Option<(u16, u16)>) -> Blackout {
        Blackout {
            id: Ulid::new(),
            arena_id,
            scope: CourtScope::AllCourts,
            date_start: date(start),
            date_end: date(end),
            hours: hours.map(|(s, e)| MinuteWindow::hours(s, e).unwrap()),
            reason: Some("manutenção".into()),
            active: true,
        }
    }

    fn slot(clock: &ArenaClock, day: &str, hour: u32, minutes: u32) -> Span {
        Span::from_minutes(clock.at_minute(date(day), hour * 60), minutes)
    }

    #[test]
    fn hour_range_reapplied_every_day() {
        let clock = ArenaClock::sao_paulo();
        let court = Ulid::new();
        let list = vec![blackout(Ulid::new(), "2025-03-01", "2025-03-03", Some((22, 23)))];

        for day in ["2025-03-01", "2025-03-02", "2025-03-03"] {
            assert!(find_blackout_conflict(&list, &court, &slot(&clock, day, 22, 60), &clock).is_some());
            assert!(find_blackout_conflict(&list, &court, &slot(&clock, day, 20, 60), &clock).is_none());
        }
        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-04", 22, 60), &clock).is_none());
    }

    #[test]
    fn whole_day_blackout() {
        let clock = ArenaClock::sao_paulo();
        let court = Ulid::new();
        let list = vec![blackout(Ulid::new(), "2025-03-02", "2025-03-02", None)];

        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-02", 0, 60), &clock).is_some());
        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-02", 23, 60), &clock).is_some());
        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-01", 22, 60), &clock).is_none());
        // Crosses local midnight into the blocked day.
        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-01", 23, 120), &clock).is_some());
    }

    #[test]
    fn adjacent_to_hour_range_is_free() {
        let clock = ArenaClock::sao_paulo();
        let court = Ulid::new();
        let list = vec![blackout(Ulid::new(), "2025-03-01", "2025-03-01", Some((18, 20)))];
        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-01", 17, 60), &clock).is_none());
        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-01", 20, 60), &clock).is_none());
        assert!(find_blackout_conflict(&list, &court, &slot(&clock, "2025-03-01", 17, 90), &clock).is_some());
    }

    #[test]
    fn court_scope_respected() {
        let clock = ArenaClock::sao_paulo();
        let (a, b) = (Ulid::new(), Ulid::new());
        let mut scoped = blackout(Ulid::new(), "2025-03-01", "2025-03-01", Some((10, 12)));
        scoped.scope = CourtScope::SpecificCourts([a].into_iter().collect());
        let list = vec![scoped];
        let s = slot(&clock, "2025-03-01", 10, 60);

        assert!(find_blackout_conflict(&list, &a, &s, &clock).is_some());
        assert!(find_blackout_conflict(&list, &b, &s, &clock).is_none());
    }

    #[test]
    fn inactive_blackout_ignored() {
        let clock = ArenaClock::sao_paulo();
        let mut b = blackout(Ulid::new(), "2025-03-01", "2025-03-01", None);
        b.active = false;
        assert!(find_blackout_conflict(&[b], &Ulid::new(), &slot(&clock, "2025-03-01", 10, 60), &clock).is_none());
    }

    #[test]
    fn validation() {
        let arena = Ulid::new();
        assert!(BlackoutRegistry::<MemoryStore>::validate(&blackout(arena, "2025-03-01", "2025-03-01", None)).is_ok());
        assert!(matches!(
            BlackoutRegistry::<MemoryStore>::validate(&blackout(arena, "2025-03-02", "2025-03-01", None)),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            BlackoutRegistry::<MemoryStore>::validate(&blackout(arena, "2025-01-01", "2026-12-31", None)),
            Err(EngineError::LimitExceeded(_))
        ));
        let mut bad_hours = blackout(arena, "2025-03-01", "2025-03-01", None);
        bad_hours.hours = Some(MinuteWindow { start: 23 * 60, end: 22 * 60 });
        assert!(matches!(
            BlackoutRegistry::<MemoryStore>::validate(&bad_hours),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn registry_reads_store() {
        let clock = ArenaClock::sao_paulo();
        let store = Arc::new(MemoryStore::new());
        let registry = BlackoutRegistry::new(store, clock);
        let arena = Ulid::new();
        let court = Ulid::new();
        let b = blackout(arena, "2025-03-01", "2025-03-03", Some((22, 23)));
        registry.save_blackout(b.clone()).await.unwrap();

        let at = |day: &str, hour: u32| clock.at_minute(date(day), hour * 60);
        assert!(registry.conflicts(court, arena, at("2025-03-02", 22), 60).await.unwrap());
        assert!(!registry.conflicts(court, arena, at("2025-03-02", 21), 60).await.unwrap());
        assert_eq!(
            registry.conflicting_blackout(court, arena, at("2025-03-03", 21), 120).await.unwrap(),
            Some(b.id)
        );
        // Other arenas are unaffected.
        assert!(!registry.conflicts(court, Ulid::new(), at("2025-03-02", 22), 60).await.unwrap());
    }
}
