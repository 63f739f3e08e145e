//! Exposure key interval arithmetic.
//!
//! Temporary exposure keys rotate on 10-minute boundaries. An interval number
//! is the count of 10-minute windows since the Unix epoch; a key is valid for
//! `interval_count` windows starting at `interval_number`. All arithmetic is
//! UTC only.

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Length of a single exposure key interval.
pub const INTERVAL_LENGTH_SECS: i64 = 600;

/// Maximum number of intervals a single key may span (one day).
pub const MAX_INTERVAL_COUNT: i32 = 144;

/// Returns the interval number containing `t`.
pub fn interval_number(t: DateTime<Utc>) -> i32 {
    (t.timestamp() / INTERVAL_LENGTH_SECS) as i32
}

/// Returns the start time of interval `n`.
pub fn time_for_interval(n: i32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(n) * INTERVAL_LENGTH_SECS, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Truncates `t` to the preceding UTC midnight.
pub fn utc_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    let day = 86_400;
    Utc.timestamp_opt(secs - secs.rem_euclid(day), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Truncates `t` down to a multiple of `window`.
///
/// A non-positive window leaves `t` untouched.
pub fn truncate_window(t: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let w = window.num_seconds();
    if w <= 0 {
        return t;
    }
    let secs = t.timestamp();
    Utc.timestamp_opt(secs - secs.rem_euclid(w), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Number of whole days between a symptom onset interval and a key's start
/// interval, rounded to the nearest day.
///
/// The distance is divided by the daily interval count with truncation toward
/// zero; a remainder strictly beyond half a day adjusts the result one day
/// toward its sign. A remainder of exactly half a day does not adjust.
pub fn days_from_symptom_onset(onset_interval: i32, key_interval: i32) -> i32 {
    let distance = key_interval.wrapping_sub(onset_interval);
    let mut days = distance / MAX_INTERVAL_COUNT;
    let remainder = distance % MAX_INTERVAL_COUNT;
    if remainder > MAX_INTERVAL_COUNT / 2 {
        days += 1;
    } else if remainder < -(MAX_INTERVAL_COUNT / 2) {
        days -= 1;
    }
    days
}
