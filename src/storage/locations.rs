use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{
    check_in_bound, check_in_key, check_in_prefix_range, Database, DatabaseError,
};
use super::models::{CheckIn, Location, School};
use super::tables::*;

impl Database {
    // ========================================================================
    // School operations
    // ========================================================================

    /// Store a school
    pub fn put_school(&self, school: &School) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(SCHOOLS)?;
            let data = rmp_serde::to_vec_named(school)?;
            table.insert(school.id.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a school by ID
    pub fn get_school(&self, id: &str) -> Result<Option<School>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SCHOOLS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Location operations
    // ========================================================================

    /// Insert a new location. Fails with `UniqueViolation` when another
    /// location already owns the normalized name.
    pub fn insert_location(&self, location: &Location) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut names = write_txn.open_table(LOCATION_NAMES)?;
            if names.get(location.normalized_name.as_str())?.is_some() {
                return Err(DatabaseError::UniqueViolation(
                    location.normalized_name.clone(),
                ));
            }
            names.insert(location.normalized_name.as_str(), location.id.as_str())?;
        }
        write_location_in(&write_txn, location)?;
        write_txn.commit()?;
        Ok(())
    }

    /// Get a location by ID
    pub fn get_location(&self, id: &str) -> Result<Option<Location>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(LOCATIONS)?;

        match table.get(id)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Resolve a normalized name to its location
    pub fn get_location_by_name(
        &self,
        normalized_name: &str,
    ) -> Result<Option<Location>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let names = read_txn.open_table(LOCATION_NAMES)?;
        let table = read_txn.open_table(LOCATIONS)?;

        let id = match names.get(normalized_name)? {
            Some(id) => id.value().to_string(),
            None => return Ok(None),
        };

        match table.get(id.as_str())? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    /// Get all locations
    pub fn get_all_locations(&self) -> Result<Vec<Location>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(LOCATIONS)?;

        let mut locations = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            locations.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(locations)
    }

    /// Read-modify-write a location in one transaction. If `apply` fails the
    /// transaction is dropped, which rolls it back.
    pub fn update_location_with<T, E, F>(&self, id: &str, apply: F) -> Result<(Location, T), E>
    where
        E: From<DatabaseError>,
        F: FnOnce(&mut Location) -> Result<T, E>,
    {
        let write_txn = self.begin_write()?;
        let mut location =
            read_location_in(&write_txn, id)?.ok_or(DatabaseError::NotFound("location"))?;

        let output = apply(&mut location)?;

        save_location_in(&write_txn, &mut location)?;
        write_txn.commit().map_err(DatabaseError::from)?;
        Ok((location, output))
    }

    /// Like [`Database::update_location_with`], but `apply` also receives the
    /// location's check-ins created at or after `since`, oldest first, read
    /// inside the same transaction.
    pub fn update_location_with_recent<T, E, F>(
        &self,
        id: &str,
        since: DateTime<Utc>,
        apply: F,
    ) -> Result<(Location, T), E>
    where
        E: From<DatabaseError>,
        F: FnOnce(&mut Location, &[CheckIn]) -> Result<T, E>,
    {
        let write_txn = self.begin_write()?;
        let mut location =
            read_location_in(&write_txn, id)?.ok_or(DatabaseError::NotFound("location"))?;

        let recent = read_check_ins_since_in(&write_txn, id, &since)?;
        let output = apply(&mut location, &recent)?;

        save_location_in(&write_txn, &mut location)?;
        write_txn.commit().map_err(DatabaseError::from)?;
        Ok((location, output))
    }

    /// Delete a location with its name index entry and all of its check-ins
    pub fn delete_location(&self, id: &str) -> Result<Option<Location>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let Some(location) = read_location_in(&write_txn, id)? else {
            return Ok(None);
        };

        {
            let mut table = write_txn.open_table(LOCATIONS)?;
            table.remove(id)?;
        }
        {
            let mut names = write_txn.open_table(LOCATION_NAMES)?;
            names.remove(location.normalized_name.as_str())?;
        }

        let (lo, hi) = check_in_prefix_range(id);
        let removed: Vec<(String, String)> = {
            let mut table = write_txn.open_table(CHECK_INS)?;
            let mut keys = Vec::new();
            for entry in table.range(lo.as_str()..hi.as_str())? {
                let (key, value) = entry?;
                let check_in: CheckIn = rmp_serde::from_slice(value.value())?;
                keys.push((key.value().to_string(), check_in.id));
            }
            for (key, _) in &keys {
                table.remove(key.as_str())?;
            }
            keys
        };
        {
            let mut ids = write_txn.open_table(CHECK_IN_IDS)?;
            for (_, check_in_id) in &removed {
                ids.remove(check_in_id.as_str())?;
            }
        }

        write_txn.commit()?;
        tracing::debug!(
            location_id = %id,
            check_ins = removed.len(),
            "Deleted location and its check-ins"
        );
        Ok(Some(location))
    }

    // ========================================================================
    // Check-in operations
    // ========================================================================

    /// Record a check-in. `admit` runs against the locked location inside the
    /// write transaction and builds the check-in, or refuses it.
    pub fn insert_check_in_with<E, F>(
        &self,
        location_id: &str,
        school_id: &str,
        admit: F,
    ) -> Result<(Location, CheckIn), E>
    where
        E: From<DatabaseError>,
        F: FnOnce(&mut Location) -> Result<CheckIn, E>,
    {
        let write_txn = self.begin_write()?;
        let mut location = read_location_in(&write_txn, location_id)?
            .ok_or(DatabaseError::NotFound("location"))?;

        let school_exists = {
            let schools = write_txn.open_table(SCHOOLS).map_err(DatabaseError::from)?;
            let exists = schools.get(school_id).map_err(DatabaseError::from)?.is_some();
            exists
        };
        if !school_exists {
            return Err(DatabaseError::NotFound("school").into());
        }

        let check_in = admit(&mut location)?;

        save_location_in(&write_txn, &mut location)?;
        write_check_in_in(&write_txn, &check_in)?;
        write_txn.commit().map_err(DatabaseError::from)?;
        Ok((location, check_in))
    }

    /// Remove a check-in. `release` runs against the locked location and the
    /// check-in inside the write transaction and may refuse the deletion.
    pub fn delete_check_in_with<E, F>(
        &self,
        location_id: &str,
        check_in_id: &str,
        release: F,
    ) -> Result<(Location, CheckIn), E>
    where
        E: From<DatabaseError>,
        F: FnOnce(&mut Location, &CheckIn) -> Result<(), E>,
    {
        let write_txn = self.begin_write()?;
        let mut location = read_location_in(&write_txn, location_id)?
            .ok_or(DatabaseError::NotFound("location"))?;

        let key: Option<String> = {
            let ids = write_txn.open_table(CHECK_IN_IDS).map_err(DatabaseError::from)?;
            let result = ids
                .get(check_in_id)
                .map_err(DatabaseError::from)?
                .map(|key| key.value().to_string());
            result
        };
        let check_in = match key {
            Some(key) => read_check_in_in(&write_txn, &key)?,
            None => None,
        }
        .filter(|c| c.location_id == location_id)
        .ok_or(DatabaseError::NotFound("check-in"))?;

        release(&mut location, &check_in)?;

        save_location_in(&write_txn, &mut location)?;
        remove_check_in_in(&write_txn, &check_in)?;
        write_txn.commit().map_err(DatabaseError::from)?;
        Ok((location, check_in))
    }

    /// Check-ins of a location created in `[from, to)`, oldest first.
    pub fn get_check_ins_between(
        &self,
        location_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckIn>, DatabaseError> {
        let lo = check_in_bound(location_id, &from);
        let hi = check_in_bound(location_id, &to);
        self.scan_check_ins(&lo, &hi)
    }

    /// All check-ins of a location, oldest first
    pub fn get_check_ins_by_location(
        &self,
        location_id: &str,
    ) -> Result<Vec<CheckIn>, DatabaseError> {
        let (lo, hi) = check_in_prefix_range(location_id);
        self.scan_check_ins(&lo, &hi)
    }

    fn scan_check_ins(&self, lo: &str, hi: &str) -> Result<Vec<CheckIn>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(CHECK_INS)?;

        let mut check_ins = Vec::new();
        for result in table.range(lo..hi)? {
            let (_, value) = result?;
            check_ins.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(check_ins)
    }
}

fn read_location_in(
    write_txn: &WriteTransaction,
    id: &str,
) -> Result<Option<Location>, DatabaseError> {
    let table = write_txn.open_table(LOCATIONS)?;
    let result = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn write_location_in(write_txn: &WriteTransaction, location: &Location) -> Result<(), DatabaseError> {
    debug_assert!(
        location.available <= location.capacity,
        "available must never exceed capacity"
    );

    let mut table = write_txn.open_table(LOCATIONS)?;
    let data = rmp_serde::to_vec_named(location)?;
    table.insert(location.id.as_str(), data.as_slice())?;
    Ok(())
}

/// Persist a changed location under its next version
fn save_location_in(write_txn: &WriteTransaction, location: &mut Location) -> Result<(), DatabaseError> {
    location.version += 1;
    write_location_in(write_txn, location)
}

fn read_check_ins_since_in(
    write_txn: &WriteTransaction,
    location_id: &str,
    since: &DateTime<Utc>,
) -> Result<Vec<CheckIn>, DatabaseError> {
    let lo = check_in_bound(location_id, since);
    let (_, hi) = check_in_prefix_range(location_id);
    let table = write_txn.open_table(CHECK_INS)?;

    let mut check_ins = Vec::new();
    for entry in table.range(lo.as_str()..hi.as_str())? {
        let (_, value) = entry?;
        check_ins.push(rmp_serde::from_slice(value.value())?);
    }
    Ok(check_ins)
}

fn read_check_in_in(write_txn: &WriteTransaction, key: &str) -> Result<Option<CheckIn>, DatabaseError> {
    let table = write_txn.open_table(CHECK_INS)?;
    let result = match table.get(key)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn write_check_in_in(write_txn: &WriteTransaction, check_in: &CheckIn) -> Result<(), DatabaseError> {
    let key = check_in_key(&check_in.location_id, &check_in.created_at, &check_in.id);
    {
        let mut table = write_txn.open_table(CHECK_INS)?;
        let data = rmp_serde::to_vec_named(check_in)?;
        table.insert(key.as_str(), data.as_slice())?;
    }
    {
        let mut ids = write_txn.open_table(CHECK_IN_IDS)?;
        ids.insert(check_in.id.as_str(), key.as_str())?;
    }
    Ok(())
}

fn remove_check_in_in(write_txn: &WriteTransaction, check_in: &CheckIn) -> Result<(), DatabaseError> {
    let key = check_in_key(&check_in.location_id, &check_in.created_at, &check_in.id);
    {
        let mut table = write_txn.open_table(CHECK_INS)?;
        table.remove(key.as_str())?;
    }
    {
        let mut ids = write_txn.open_table(CHECK_IN_IDS)?;
        ids.remove(check_in.id.as_str())?;
    }
    Ok(())
}
