use std::sync::Arc;

use ulid::Ulid;

use crate::model::*;
use crate::store::Storage;

use super::{EngineError, validate_duration, validate_window};

/// Keeps each court's active price bands pairwise disjoint and prices slots
/// against them.
pub struct PriceTableValidator<S> {
    store: Arc<S>,
}

impl<S: Storage> PriceTableValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Reject `candidate` if its window is malformed or overlaps another
    /// active band of the same court. `excluding` skips the band being
    /// updated.
    pub async fn validate_no_overlap(
        &self,
        court_id: CourtId,
        candidate: &PriceBand,
        excluding: Option<Ulid>,
    ) -> Result<(), EngineError> {
        validate_window(&candidate.window)?;
        if candidate.court_id != court_id {
            return Err(EngineError::InvalidInput("price band belongs to another court"));
        }
        if candidate.hourly_rate_cents < 0 {
            return Err(EngineError::InvalidInput("hourly rate must not be negative"));
        }
        if !candidate.active {
            return Ok(());
        }
        let bands = self.store.price_bands(court_id).await?;
        if let Some(clash) = bands
            .iter()
            .filter(|b| b.active && Some(b.id) != excluding)
            .find(|b| b.window.overlaps(&candidate.window))
        {
            return Err(EngineError::PriceBandOverlap(clash.id));
        }
        Ok(())
    }

    /// Validate then persist a create or update. An update never clashes
    /// with its own previous version.
    pub async fn save_band(&self, band: PriceBand) -> Result<(), EngineError> {
        self.validate_no_overlap(band.court_id, &band, Some(band.id))
            .await?;
        self.store.save_price_band(band).await?;
        Ok(())
    }

    /// Hourly rate in effect at `minute` of the day.
    pub async fn rate_at(&self, court_id: CourtId, minute: u32) -> Result<Option<i64>, EngineError> {
        let bands = self.store.price_bands(court_id).await?;
        Ok(bands
            .iter()
            .find(|b| b.active && b.window.contains_minute(minute))
            .map(|b| b.hourly_rate_cents))
    }

    /// Price in cents of a slot, prorated per minute across bands and
    /// rounded half up. `None` if any minute is not covered by a band.
    pub async fn quote(
        &self,
        court_id: CourtId,
        start_minute: u32,
        duration_minutes: u32,
    ) -> Result<Option<i64>, EngineError> {
        validate_duration(duration_minutes)?;
        if start_minute >= MINUTES_PER_DAY as u32 {
            return Err(EngineError::InvalidInput("start minute must be within the day"));
        }
        let end_minute = start_minute + duration_minutes;
        if end_minute > MINUTES_PER_DAY as u32 {
            return Ok(None);
        }
        let bands = self.store.price_bands(court_id).await?;
        let mut active: Vec<&PriceBand> = bands.iter().filter(|b| b.active).collect();
        active.sort_by_key(|b| b.window.start);

        let mut cursor = start_minute;
        let mut rate_minutes: i64 = 0;
        for band in active {
            let (start, end) = (band.window.start as u32, band.window.end as u32);
            if end <= cursor {
                continue;
            }
            if start > cursor {
                return Ok(None);
            }
            let covered = end.min(end_minute) - cursor;
            rate_minutes += band.hourly_rate_cents * covered as i64;
            cursor += covered;
            if cursor == end_minute {
                return Ok(Some((rate_minutes + 30) / 60));
            }
        }
        Ok(None)
    }
}
