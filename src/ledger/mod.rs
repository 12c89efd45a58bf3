//! Capacity ledger: location availability, check-ins and daily statistics.
//!
//! Every read-modify-write of a location runs inside one store write
//! transaction, which redb serializes, so per-location mutations are
//! linearizable. Committed changes are published to the broadcast hub.

mod check_ins;
mod names;
pub mod rollover;
pub mod stats;

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;

use crate::broadcast::{BroadcastHub, LocationState, TopicSelector};
use crate::error::CoreError;
use crate::storage::models::{Location, School};
use crate::storage::Database;

pub use names::normalize_name;
pub use stats::YesterdayStats;

#[derive(Clone)]
pub struct Ledger {
    db: Database,
    hub: Arc<BroadcastHub>,
}

impl Ledger {
    pub fn new(db: Database, hub: Arc<BroadcastHub>) -> Self {
        Self { db, hub }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    // ========================================================================
    // Schools
    // ========================================================================

    pub fn register_school(&self, name: &str) -> Result<School, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Invalid("school name is required".to_string()));
        }

        let school = School {
            created_at: Utc::now(),
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        self.db.put_school(&school)?;
        tracing::debug!(school_id = %school.id, "Registered school");
        Ok(school)
    }

    pub fn get_school(&self, id: &str) -> Result<School, CoreError> {
        self.db.get_school(id)?.ok_or(CoreError::NotFound("school"))
    }

    // ========================================================================
    // Locations
    // ========================================================================

    /// Register a location. Availability starts at full capacity.
    pub fn register_location(
        &self,
        owner_user_id: &str,
        name: &str,
        capacity: u32,
        time_zone: &str,
    ) -> Result<Location, CoreError> {
        let normalized_name = normalize_name(name);
        if normalized_name.is_empty() {
            return Err(CoreError::Invalid(
                "name must contain at least one letter or digit".to_string(),
            ));
        }
        let time_zone: Tz = time_zone
            .parse()
            .map_err(|_| CoreError::Invalid(format!("unknown time zone: {time_zone}")))?;

        let now = Utc::now();
        let location = Location {
            available: capacity,
            available_yesterday: capacity,
            capacity,
            capacity_yesterday: capacity,
            created_at: now,
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            normalized_name,
            owner_user_id: owner_user_id.to_string(),
            stats_date: Some(stats::local_today(time_zone, now)),
            time_zone,
            version: 0,
            yesterday_full_at: None,
        };

        self.db.insert_location(&location)?;
        tracing::info!(
            location_id = %location.id,
            normalized_name = %location.normalized_name,
            capacity,
            "Registered location"
        );
        self.publish(&location);
        Ok(location)
    }

    pub fn get_location(&self, id: &str) -> Result<Location, CoreError> {
        self.db.get_location(id)?.ok_or(CoreError::NotFound("location"))
    }

    pub fn get_location_by_name(&self, normalized_name: &str) -> Result<Location, CoreError> {
        self.db
            .get_location_by_name(normalized_name)?
            .ok_or(CoreError::NotFound("location"))
    }

    pub fn list_locations(&self) -> Result<Vec<Location>, CoreError> {
        let mut locations = self.db.get_all_locations()?;
        locations.sort_by(|a, b| a.normalized_name.cmp(&b.normalized_name));
        Ok(locations)
    }

    /// Delete a location and all of its check-ins
    pub fn delete_location(&self, id: &str) -> Result<Location, CoreError> {
        let location = self
            .db
            .delete_location(id)?
            .ok_or(CoreError::NotFound("location"))?;
        tracing::info!(location_id = %id, "Deleted location");
        Ok(location)
    }

    /// Change capacity, shifting availability by the same delta. Availability
    /// is clamped to `[0, new_capacity]`.
    pub fn update_capacity(&self, id: &str, new_capacity: u32) -> Result<Location, CoreError> {
        let (location, old_capacity) = self.db.update_location_with(id, |loc| {
            let old = loc.capacity;
            loc.available = if new_capacity >= old {
                loc.available.saturating_add(new_capacity - old)
            } else {
                loc.available.saturating_sub(old - new_capacity)
            }
            .min(new_capacity);
            loc.capacity = new_capacity;
            Ok::<u32, CoreError>(old)
        })?;

        tracing::debug!(
            location_id = %id,
            old_capacity,
            new_capacity,
            available = location.available,
            "Updated capacity"
        );
        self.publish(&location);
        Ok(location)
    }

    /// Current state of every location the selector matches
    pub fn current_states(&self, selector: &TopicSelector) -> Result<Vec<LocationState>, CoreError> {
        Ok(self
            .list_locations()?
            .iter()
            .filter(|l| selector.matches(&l.normalized_name))
            .map(LocationState::from)
            .collect())
    }

    fn publish(&self, location: &Location) {
        self.hub.publish(&LocationState::from(location));
    }
}

#[cfg(test)]
impl Ledger {
    /// Pretend the location was last rolled over on `date`
    pub(crate) fn set_stats_date(&self, location_id: &str, date: chrono::NaiveDate) {
        self.db
            .update_location_with(location_id, |loc| {
                loc.stats_date = Some(date);
                Ok::<(), CoreError>(())
            })
            .unwrap();
    }
}
