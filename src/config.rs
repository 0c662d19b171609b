use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::clock::{ArenaClock, SAO_PAULO_OFFSET_MINUTES};
use crate::engine::{EngineError, ScanWindow};

/// Journal file name inside `data_dir`.
pub const JOURNAL_FILE: &str = "quadra.wal";

/// Runtime settings, read from `QUADRA_*` environment variables.
/// Unset or unparsable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Arena offset from UTC in minutes (`QUADRA_UTC_OFFSET_MINUTES`).
    pub utc_offset_minutes: i32,
    /// First candidate start hour of a start-time search (`QUADRA_SCAN_START_HOUR`).
    pub scan_start_hour: u32,
    /// Last candidate start hour, inclusive (`QUADRA_SCAN_END_HOUR`).
    pub scan_end_hour: u32,
    /// Step between candidate starts (`QUADRA_GRANULARITY_MINUTES`).
    pub granularity_minutes: u32,
    /// TTL for cached courts, hours, blackouts and bands (`QUADRA_CACHE_TTL_SECS`).
    pub cache_ttl: Duration,
    /// Journal directory; `None` keeps everything in memory (`QUADRA_DATA_DIR`).
    pub data_dir: Option<PathBuf>,
    /// Journal appends between compactions (`QUADRA_COMPACT_THRESHOLD`).
    pub compact_threshold: u64,
    /// Prometheus listener port (`QUADRA_METRICS_PORT`).
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            utc_offset_minutes: SAO_PAULO_OFFSET_MINUTES,
            scan_start_hour: 6,
            scan_end_hour: 23,
            granularity_minutes: 60,
            cache_ttl: Duration::from_secs(30),
            data_dir: None,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            utc_offset_minutes: env(&lookup, "QUADRA_UTC_OFFSET_MINUTES").unwrap_or(defaults.utc_offset_minutes),
            scan_start_hour: env(&lookup, "QUADRA_SCAN_START_HOUR").unwrap_or(defaults.scan_start_hour),
            scan_end_hour: env(&lookup, "QUADRA_SCAN_END_HOUR").unwrap_or(defaults.scan_end_hour),
            granularity_minutes: env(&lookup, "QUADRA_GRANULARITY_MINUTES")
                .unwrap_or(defaults.granularity_minutes),
            cache_ttl: env::<u64>(&lookup, "QUADRA_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            data_dir: lookup("QUADRA_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            compact_threshold: env(&lookup, "QUADRA_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            metrics_port: env::<u16>(&lookup, "QUADRA_METRICS_PORT"),
        }
    }

    pub fn clock(&self) -> Result<ArenaClock, EngineError> {
        ArenaClock::with_offset_minutes(self.utc_offset_minutes)
    }

    pub fn scan_window(&self) -> Result<ScanWindow, EngineError> {
        let first = self
            .scan_start_hour
            .checked_mul(60)
            .ok_or(EngineError::InvalidInput("scan start hour out of range"))?;
        let last = self
            .scan_end_hour
            .checked_mul(60)
            .ok_or(EngineError::InvalidInput("scan end hour out of range"))?;
        ScanWindow::new(first, last, self.granularity_minutes)
    }

    pub fn journal_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(JOURNAL_FILE))
    }
}

fn env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|raw| raw.trim().parse().ok())
}
