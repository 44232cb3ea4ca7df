//! Wall-clock helpers
//!
//! All pool timestamps are unix seconds; the daily quota window rolls over
//! at UTC midnight, which is a whole multiple of 86 400 in unix time.

use std::time::{SystemTime, UNIX_EPOCH};

const SECONDS_PER_DAY: u64 = 86_400;

/// Daily reset runs slightly after midnight so counter TTLs have expired.
const DAILY_RESET_OFFSET_SECS: u64 = 5;

/// Current unix time in seconds, fractional.
pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Seconds until the next UTC midnight; never zero.
pub(crate) fn seconds_until_utc_midnight() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    SECONDS_PER_DAY - (now % SECONDS_PER_DAY)
}

/// Seconds until the next daily reset slot (00:00:05 UTC).
pub(crate) fn seconds_until_daily_reset() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let into_day = now % SECONDS_PER_DAY;
    if into_day < DAILY_RESET_OFFSET_SECS {
        DAILY_RESET_OFFSET_SECS - into_day
    } else {
        SECONDS_PER_DAY - into_day + DAILY_RESET_OFFSET_SECS
    }
}
