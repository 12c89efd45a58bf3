//! Previous-day occupancy statistics, evaluated in the location's time zone.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::Ledger;
use crate::error::CoreError;
use crate::storage::models::CheckIn;

/// Occupancy of one local calendar day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YesterdayStats {
    pub available_yesterday: u32,
    pub capacity_yesterday: u32,
    /// When the day's check-ins first reached its capacity
    pub yesterday_full_at: Option<DateTime<Utc>>,
}

/// Local calendar date of `at` in `tz`
pub fn local_today(tz: Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// UTC instants bounding the local day `date` in `tz`, as `[start, end)`.
/// Days are 23 or 25 hours long across DST changes.
pub fn local_day_bounds(tz: Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.succ_opt().unwrap_or(date);
    (local_midnight(tz, date), local_midnight(tz, next))
}

fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);

    // Zones that skip midnight start the day at the first instant after the gap
    let mut candidate = midnight;
    for _ in 0..4 {
        if let Some(start) = tz.from_local_datetime(&candidate).earliest() {
            return start.with_timezone(&Utc);
        }
        candidate += Duration::minutes(30);
    }
    Utc.from_utc_datetime(&midnight)
}

/// Fold a day's check-ins, oldest first, into its statistics. Days without
/// check-ins report the current capacity.
pub fn summarize(check_ins: &[CheckIn], current_capacity: u32) -> YesterdayStats {
    let capacity = check_ins
        .iter()
        .map(|c| c.capacity_snapshot)
        .max()
        .unwrap_or(current_capacity);

    let count = u32::try_from(check_ins.len()).unwrap_or(u32::MAX);

    let full_at = if capacity == 0 {
        None
    } else {
        usize::try_from(capacity)
            .ok()
            .and_then(|n| check_ins.get(n - 1))
            .map(|c| c.created_at)
    };

    YesterdayStats {
        available_yesterday: capacity.saturating_sub(count),
        capacity_yesterday: capacity,
        yesterday_full_at: full_at,
    }
}

impl Ledger {
    /// Statistics for the local day before `as_of`
    pub fn compute_yesterday_stats(
        &self,
        location_id: &str,
        as_of: NaiveDate,
    ) -> Result<YesterdayStats, CoreError> {
        let location = self.get_location(location_id)?;
        let yesterday = as_of
            .pred_opt()
            .ok_or_else(|| CoreError::Invalid(format!("no day before {as_of}")))?;

        let (start, end) = local_day_bounds(location.time_zone, yesterday);
        let check_ins = self.db.get_check_ins_between(location_id, start, end)?;
        Ok(summarize(&check_ins, location.capacity))
    }
}
