use chrono::{DateTime, Utc};
use redb::{Database as RedbDatabase, ReadTransaction, ReadableTable, Table, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
}

/// Handle to the embedded store. Cheap to clone; clones share one redb file.
#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("capacity-tracker.redb");
        let db = RedbDatabase::create(db_path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(TOKENS)?;
            write_txn.open_table(OWNER_TOKENS)?;
            write_txn.open_table(TOKEN_EXPIRY)?;
            write_txn.open_table(SCHOOLS)?;
            write_txn.open_table(LOCATIONS)?;
            write_txn.open_table(LOCATION_NAMES)?;
            write_txn.open_table(CHECK_INS)?;
            write_txn.open_table(CHECK_IN_IDS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction. redb admits one writer at a time, so every
    /// read-modify-write done inside a single write transaction is atomic.
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }
}

/// Ordered expiration index key: zero-padded millis so lexical order is time order.
pub(crate) fn expiry_key(expires_at: &DateTime<Utc>, hash: &str) -> String {
    format!("{:020}:{hash}", expires_at.timestamp_millis().max(0))
}

/// Extract the millisecond timestamp from an expiration index key.
pub(crate) fn expiry_key_ms(key: &str) -> Option<i64> {
    key.split_once(':').and_then(|(ms, _)| ms.parse().ok())
}

/// Ordered check-in key: all check-ins of a location are contiguous, sorted by time.
pub(crate) fn check_in_key(location_id: &str, created_at: &DateTime<Utc>, id: &str) -> String {
    format!(
        "{location_id}/{:020}/{id}",
        created_at.timestamp_millis().max(0)
    )
}

/// Lower bound of the check-in keys of `location_id` created at or after `at`.
pub(crate) fn check_in_bound(location_id: &str, at: &DateTime<Utc>) -> String {
    format!("{location_id}/{:020}/", at.timestamp_millis().max(0))
}

/// Key range covering every check-in of a location ('0' sorts right after '/').
pub(crate) fn check_in_prefix_range(location_id: &str) -> (String, String) {
    (format!("{location_id}/"), format!("{location_id}0"))
}

/// Append `value` to the msgpack `Vec<String>` stored under `key`.
pub(crate) fn index_push(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &str,
) -> Result<(), DatabaseError> {
    let mut values: Vec<String> = match table.get(key)? {
        Some(data) => rmp_serde::from_slice(data.value())?,
        None => Vec::new(),
    };

    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
        let data = rmp_serde::to_vec_named(&values)?;
        table.insert(key, data.as_slice())?;
    }
    Ok(())
}

/// Remove `value` from the msgpack `Vec<String>` under `key`, dropping the entry when empty.
pub(crate) fn index_remove(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &str,
) -> Result<(), DatabaseError> {
    let values: Option<Vec<String>> = match table.get(key)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };

    if let Some(mut values) = values {
        values.retain(|v| v != value);
        if values.is_empty() {
            table.remove(key)?;
        } else {
            let data = rmp_serde::to_vec_named(&values)?;
            table.insert(key, data.as_slice())?;
        }
    }
    Ok(())
}
