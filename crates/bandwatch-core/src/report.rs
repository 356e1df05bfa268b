//! Daily heart-rate summary.

use chrono::{DateTime, Days, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{BandwatchError, Result};

/// Aggregate over one day's samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    /// Number of samples.
    pub count: u64,
    /// Mean bpm.
    pub average: f64,
    /// Lowest bpm.
    pub min: u8,
    /// Highest bpm.
    pub max: u8,
}

/// UTC bounds `[start, end)` of `day` in `tz`.
///
/// # Errors
///
/// Returns [`BandwatchError::InvalidInput`] if local midnight does not exist
/// in `tz` and no later instant on that day can stand in for it.
pub fn local_day_bounds(day: NaiveDate, tz: Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let next = day
        .checked_add_days(Days::new(1))
        .ok_or_else(|| BandwatchError::InvalidInput(format!("no day after {day}")))?;
    Ok((local_midnight(day, tz)?, local_midnight(next, tz)?))
}

fn local_midnight(day: NaiveDate, tz: Tz) -> Result<DateTime<Utc>> {
    // Midnight can fall into a DST gap; step forward an hour at a time.
    (0..3)
        .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
        .find_map(|naive| match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
            LocalResult::None => None,
        })
        .ok_or_else(|| BandwatchError::InvalidInput(format!("no local midnight for {day} in {tz}")))
}

/// Human-readable report text.
#[must_use]
pub fn format_daily_report(day: NaiveDate, stats: &DailyStats) -> String {
    format!(
        "Daily health report\nDate: {}\n\nAverage BPM: {:.1}\nMinimum BPM: {}\nMaximum BPM: {}\nSamples: {}",
        day.format("%d/%m/%Y"),
        stats.average,
        stats.min,
        stats.max,
        stats.count
    )
}
