//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use crate::broadcast::BroadcastHub;
use crate::config::{BroadcastConfig, Config, LedgerConfig, NodeConfig, TokenConfig};
use crate::ledger::{normalize_name, Ledger};
use crate::storage::models::{CheckIn, Location, School, Token, TokenScope};
use crate::storage::Database;
use crate::AppState;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard; the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A ledger over a fresh database with its own hub
pub fn test_ledger() -> (Ledger, TempDir) {
    let (db, temp_dir) = setup_db();
    (Ledger::new(db, Arc::new(BroadcastHub::new())), temp_dir)
}

/// A `Config` with defaults and a short flush interval.
pub fn test_config() -> Config {
    Config {
        broadcast: BroadcastConfig {
            flush_interval_ms: 10,
            ..BroadcastConfig::default()
        },
        ledger: LedgerConfig::default(),
        node: NodeConfig {
            bind_address: "127.0.0.1:8080".to_string(),
            data_dir: "/tmp/test".to_string(),
        },
        tokens: TokenConfig::default(),
    }
}

/// Build a full `Arc<AppState>` around the given database.
pub fn test_state(db: Database) -> Arc<AppState> {
    Arc::new(AppState::new(test_config(), db))
}

/// Create a `Token` with the given hash, owner and scope, valid for a day.
pub fn make_token(hash: &str, owner: &str, scope: TokenScope) -> Token {
    let now = Utc::now();
    Token {
        created_at: now,
        expires_at: now + chrono::Duration::hours(24),
        hash: hash.to_string(),
        owner_id: owner.to_string(),
        scope,
        used: false,
    }
}

/// Create a UTC `Location` owned by `owner-1`, fully available, with no
/// previous-day statistics.
pub fn make_location(id: &str, name: &str, capacity: u32) -> Location {
    Location {
        available: capacity,
        available_yesterday: 0,
        capacity,
        capacity_yesterday: 0,
        created_at: Utc::now(),
        id: id.to_string(),
        name: name.to_string(),
        normalized_name: normalize_name(name),
        owner_user_id: "owner-1".to_string(),
        stats_date: None,
        time_zone: chrono_tz::UTC,
        version: 0,
        yesterday_full_at: None,
    }
}

pub fn make_school(id: &str) -> School {
    School {
        created_at: Utc::now(),
        id: id.to_string(),
        name: format!("School {id}"),
    }
}

pub fn make_check_in(id: &str, location_id: &str, school_id: &str) -> CheckIn {
    CheckIn {
        capacity_snapshot: 10,
        created_at: Utc::now(),
        id: id.to_string(),
        location_id: location_id.to_string(),
        school_id: school_id.to_string(),
    }
}
