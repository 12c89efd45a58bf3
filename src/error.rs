//! Error taxonomy shared by the token authority and the capacity ledger.
//!
//! Store failures are translated here, at the component boundary, so callers
//! only ever see these variants and never a redb or msgpack detail.

use thiserror::Error;

use crate::storage::DatabaseError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing, expired, or replayed session token
    #[error("Unauthorized")]
    Unauthorized,
    /// Authenticated, but not allowed to touch this resource
    #[error("Forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Unique value collision, e.g. a duplicate normalized location name
    #[error("{0} already exists")]
    Conflict(String),
    #[error("Location capacity exceeded")]
    CapacityExceeded,
    #[error("Check-in can only be removed on the day it was recorded")]
    NotToday,
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("Internal server error")]
    ServerFault,
}

impl From<DatabaseError> for CoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(entity) => CoreError::NotFound(entity),
            DatabaseError::UniqueViolation(value) => CoreError::Conflict(value),
            other => {
                tracing::error!(error = %other, "Store failure");
                CoreError::ServerFault
            }
        }
    }
}
