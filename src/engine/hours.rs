use std::sync::Arc;

use chrono::Weekday;
use ulid::Ulid;

use crate::model::*;
use crate::store::Storage;

use super::{EngineError, validate_duration, validate_window};

/// True if one active rule fully contains `[start_minute, start_minute + minutes)`.
/// Adjacent rules are not merged: a slot straddling two of them is closed.
pub fn rules_admit(rules: &[BusinessHourRule], start_minute: u32, minutes: u32) -> bool {
    rules
        .iter()
        .filter(|r| r.active)
        .any(|r| r.window.contains(start_minute, minutes))
}

/// Per-arena, per-weekday opening hours.
pub struct BusinessHoursCalendar<S> {
    store: Arc<S>,
}

impl<S: Storage> BusinessHoursCalendar<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// An arena (or weekday) without rules is closed. Only storage failures error.
    pub async fn is_open(
        &self,
        arena_id: ArenaId,
        weekday: Weekday,
        start_minute: u32,
        duration_minutes: u32,
    ) -> Result<bool, EngineError> {
        validate_duration(duration_minutes)?;
        if start_minute >= MINUTES_PER_DAY as u32 {
            return Err(EngineError::InvalidInput("start minute must be within the day"));
        }
        let rules = self.store.business_hours(arena_id, weekday).await?;
        Ok(rules_admit(&rules, start_minute, duration_minutes))
    }

    /// Reject malformed windows and overlap with another active rule of the
    /// same arena and weekday. `excluding` skips the rule being updated.
    pub async fn validate_rule(
        &self,
        rule: &BusinessHourRule,
        excluding: Option<Ulid>,
    ) -> Result<(), EngineError> {
        validate_window(&rule.window)?;
        if !rule.active {
            return Ok(());
        }
        let existing = self.store.business_hours(rule.arena_id, rule.weekday).await?;
        if let Some(clash) = existing
            .iter()
            .filter(|r| r.active && Some(r.id) != excluding && r.id != rule.id)
            .find(|r| r.window.overlaps(&rule.window))
        {
            return Err(EngineError::BusinessHourOverlap(clash.id));
        }
        Ok(())
    }

    /// Validate then persist a create or update.
    pub async fn save_rule(&self, rule: BusinessHourRule) -> Result<(), EngineError> {
        self.validate_rule(&rule, None).await?;
        self.store.save_business_hour(rule).await?;
        Ok(())
    }

    /// Soft-disable a rule; rules are never deleted.
    pub async fn deactivate_rule(
        &self,
        arena_id: ArenaId,
        weekday: Weekday,
        rule_id: Ulid,
    ) -> Result<(), EngineError> {
        let mut rule = self
            .store
            .business_hours(arena_id, weekday)
            .await?
            .into_iter()
            .find(|r| r.id == rule_id)
            .ok_or(EngineError::NotFound(rule_id))?;
        rule.active = false;
        self.store.save_business_hour(rule).await?;
        Ok(())
    }
}
