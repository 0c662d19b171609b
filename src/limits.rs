use crate::model::Ms;

/// Longest slot or booking, in minutes. Bookings stay within one day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// Longest blackout, in calendar days.
pub const MAX_BLACKOUT_DAYS: i64 = 366;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 4096;

/// Courts evaluated in one availability query.
pub const MAX_COURTS_PER_QUERY: usize = 512;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
