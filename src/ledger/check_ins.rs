use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use super::stats::{local_day_bounds, local_today};
use super::Ledger;
use crate::error::CoreError;
use crate::storage::models::CheckIn;
use crate::storage::DatabaseError;

/// Failure of a check-in write that may only need another rollover
enum Attempt {
    /// The location has not been rolled over to the caller's day yet
    DayChanged,
    Failed(CoreError),
}

impl From<CoreError> for Attempt {
    fn from(err: CoreError) -> Self {
        Attempt::Failed(err)
    }
}

impl From<DatabaseError> for Attempt {
    fn from(err: DatabaseError) -> Self {
        Attempt::Failed(err.into())
    }
}

/// The location's current local day as seen from inside a write transaction.
/// A location still on a day before `now` must be rolled over first; one
/// already rolled past `now` keeps its own day.
fn current_day(tz: Tz, stats_date: Option<NaiveDate>, now: DateTime<Utc>) -> Result<NaiveDate, Attempt> {
    match stats_date {
        Some(date) if date >= local_today(tz, now) => Ok(date),
        _ => Err(Attempt::DayChanged),
    }
}

impl Ledger {
    /// Admit one visitor group from a school, consuming one unit of
    /// availability. Refused with `CapacityExceeded` when none is left.
    pub fn create_check_in(&self, location_id: &str, school_id: &str) -> Result<CheckIn, CoreError> {
        self.create_check_in_at(location_id, school_id, Utc::now())
    }

    pub(crate) fn create_check_in_at(
        &self,
        location_id: &str,
        school_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckIn, CoreError> {
        let (location, check_in) = loop {
            // A check-in after local midnight must count against the new day
            self.roll_over_at(location_id, now)?;

            let attempt = self.db.insert_check_in_with(location_id, school_id, |loc| {
                let day = current_day(loc.time_zone, loc.stats_date, now)?;
                if loc.available == 0 {
                    return Err(Attempt::Failed(CoreError::CapacityExceeded));
                }
                loc.available -= 1;

                // Stamped no earlier than the start of the day it is counted in
                let (day_start, _) = local_day_bounds(loc.time_zone, day);
                Ok(CheckIn {
                    capacity_snapshot: loc.capacity,
                    created_at: now.max(day_start),
                    id: uuid::Uuid::new_v4().to_string(),
                    location_id: loc.id.clone(),
                    school_id: school_id.to_string(),
                })
            });

            match attempt {
                Ok(done) => break done,
                Err(Attempt::DayChanged) => continue,
                Err(Attempt::Failed(e)) => return Err(e),
            }
        };

        tracing::debug!(
            location_id = %location.id,
            check_in_id = %check_in.id,
            available = location.available,
            "Checked in"
        );
        self.publish(&location);
        Ok(check_in)
    }

    /// Undo a check-in made earlier on the location's current local day,
    /// giving the unit of availability back.
    pub fn delete_check_in(&self, location_id: &str, check_in_id: &str) -> Result<CheckIn, CoreError> {
        self.delete_check_in_at(location_id, check_in_id, Utc::now())
    }

    pub(crate) fn delete_check_in_at(
        &self,
        location_id: &str,
        check_in_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckIn, CoreError> {
        let (location, check_in) = loop {
            self.roll_over_at(location_id, now)?;

            let attempt = self
                .db
                .delete_check_in_with(location_id, check_in_id, |loc, check_in| {
                    let day = current_day(loc.time_zone, loc.stats_date, now)?;
                    if local_today(loc.time_zone, check_in.created_at) != day {
                        return Err(Attempt::Failed(CoreError::NotToday));
                    }
                    loc.available = loc.available.saturating_add(1).min(loc.capacity);
                    Ok(())
                });

            match attempt {
                Ok(done) => break done,
                Err(Attempt::DayChanged) => continue,
                Err(Attempt::Failed(e)) => return Err(e),
            }
        };

        tracing::debug!(
            location_id = %location.id,
            check_in_id = %check_in.id,
            available = location.available,
            "Check-in removed"
        );
        self.publish(&location);
        Ok(check_in)
    }

    /// All check-ins of a location, oldest first
    pub fn list_check_ins(&self, location_id: &str) -> Result<Vec<CheckIn>, CoreError> {
        self.get_location(location_id)?;
        Ok(self.db.get_check_ins_by_location(location_id)?)
    }
}
