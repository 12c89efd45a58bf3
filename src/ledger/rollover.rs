//! Daily rollover: when a location's local date advances, yesterday's
//! statistics are frozen and availability resets for the new day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::stats::{local_day_bounds, local_today, summarize};
use super::Ledger;
use crate::error::CoreError;
use crate::AppState;

impl Ledger {
    /// Roll a location over to the current local day. Returns `false` when
    /// it was already current.
    pub fn roll_over(&self, location_id: &str) -> Result<bool, CoreError> {
        self.roll_over_at(location_id, Utc::now())
    }

    pub(crate) fn roll_over_at(&self, location_id: &str, now: DateTime<Utc>) -> Result<bool, CoreError> {
        let location = self.get_location(location_id)?;
        let tz = location.time_zone;
        let today = local_today(tz, now);
        if location.stats_date.is_some_and(|d| d >= today) {
            return Ok(false);
        }

        let yesterday = today
            .pred_opt()
            .ok_or_else(|| CoreError::Invalid(format!("no day before {today}")))?;
        let (yesterday_start, today_start) = local_day_bounds(tz, yesterday);

        // Both days' check-ins are read inside the transaction that resets
        // availability
        let (location, rolled) =
            self.db
                .update_location_with_recent(location_id, yesterday_start, |loc, recent| {
                    // Lost a race with another rollover
                    if loc.stats_date.is_some_and(|d| d >= today) {
                        return Ok::<bool, CoreError>(false);
                    }

                    let split = recent.partition_point(|c| c.created_at < today_start);
                    let (yesterdays, todays) = recent.split_at(split);
                    let stats = summarize(yesterdays, loc.capacity);

                    loc.available_yesterday = stats.available_yesterday;
                    loc.capacity_yesterday = stats.capacity_yesterday;
                    loc.yesterday_full_at = stats.yesterday_full_at;
                    let taken = u32::try_from(todays.len()).unwrap_or(u32::MAX);
                    loc.available = loc.capacity.saturating_sub(taken);
                    loc.stats_date = Some(today);
                    Ok(true)
                })?;

        if rolled {
            debug!(
                location_id = %location.id,
                date = %today,
                capacity_yesterday = location.capacity_yesterday,
                available_yesterday = location.available_yesterday,
                "Rolled location over to new day"
            );
            self.publish(&location);
        }
        Ok(rolled)
    }

    /// Roll over every location whose local day changed
    pub fn roll_over_all(&self) -> Result<usize, CoreError> {
        self.roll_over_all_at(Utc::now())
    }

    pub(crate) fn roll_over_all_at(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let mut rolled = 0;
        for location in self.db.get_all_locations()? {
            match self.roll_over_at(&location.id, now) {
                Ok(true) => rolled += 1,
                Ok(false) => {}
                // Deleted since the listing
                Err(CoreError::NotFound(_)) => {}
                Err(e) => warn!(location_id = %location.id, error = %e, "Rollover failed"),
            }
        }
        Ok(rolled)
    }
}

/// Start the background daily rollover task
pub fn start_rollover_task(state: Arc<AppState>) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.ledger.rollover_interval_seconds);

    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);

        loop {
            interval_timer.tick().await;
            run_rollover(&state).await;
        }
    })
}

async fn run_rollover(state: &AppState) {
    let ledger = state.ledger.clone();
    let result = tokio::task::spawn_blocking(move || ledger.roll_over_all()).await;

    match result {
        Ok(Ok(count)) if count > 0 => debug!(locations_rolled = count, "Daily rollover applied"),
        Ok(Err(e)) => error!(error = %e, "Daily rollover failed"),
        Err(e) => error!(error = %e, "Daily rollover task panicked"),
        _ => {}
    }
}
