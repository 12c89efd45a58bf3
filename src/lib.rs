//! capacity-tracker - Live visitor capacity for physical locations
//!
//! This crate provides:
//! - A capacity ledger with linearizable check-ins and per-location time zones
//! - Daily rollover of previous-day statistics
//! - Access/refresh session tokens with rotation and reuse detection
//! - Coalescing WebSocket broadcast of location state to dashboards
//! - redb embedded database (ACID, MVCC, crash-safe)
//! - REST API

pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod expiration;
pub mod ledger;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use std::sync::Arc;

use broadcast::BroadcastHub;
use config::Config;
use ledger::Ledger;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub hub: Arc<BroadcastHub>,
    pub ledger: Ledger,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let ledger = Ledger::new(db.clone(), Arc::clone(&hub));
        Self {
            config,
            db,
            hub,
            ledger,
        }
    }
}
