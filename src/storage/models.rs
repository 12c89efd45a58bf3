use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Purpose class of a session token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenScope {
    /// Short-lived, presented on every API call
    Access,
    /// Long-lived, only exchanged for a new token pair
    Refresh,
}

/// A persisted session token. The plaintext is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// When the token was issued
    pub created_at: DateTime<Utc>,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
    /// SHA-256 of the plaintext, hex encoded (primary key)
    pub hash: String,
    /// The user the session belongs to
    pub owner_id: String,
    pub scope: TokenScope,
    /// Set once when a refresh token is rotated
    pub used: bool,
}

impl Token {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of consuming a refresh token inside a single write transaction
#[derive(Debug)]
pub enum TokenUse {
    /// The token was active and is now marked used
    Rotated(Token),
    /// The token had already been rotated; every token of the owner was deleted
    Replayed { owner_id: String, revoked: usize },
    /// The token exists but is expired or is not a refresh token
    Rejected,
    /// No token with that hash
    Missing,
}

/// A visiting group that checks in to locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct School {
    pub created_at: DateTime<Utc>,
    pub id: String,
    pub name: String,
}

/// A physical location with a daily visitor capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Remaining check-ins allowed today; never exceeds `capacity`
    pub available: u32,
    /// Remaining capacity at the end of the previous local day
    pub available_yesterday: u32,
    pub capacity: u32,
    /// Peak capacity during the previous local day
    pub capacity_yesterday: u32,
    pub created_at: DateTime<Utc>,
    pub id: String,
    pub name: String,
    /// Unique slug of `name`, used as the broadcast topic key
    pub normalized_name: String,
    pub owner_user_id: String,
    /// Local date the yesterday statistics were last rolled over for
    pub stats_date: Option<NaiveDate>,
    pub time_zone: Tz,
    /// Bumped by every committed change, so published states can be ordered
    #[serde(default)]
    pub version: u64,
    /// When the previous local day first reached full capacity
    pub yesterday_full_at: Option<DateTime<Utc>>,
}

/// A recorded visit. Immutable except for same-day deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    /// Location capacity at the moment of check-in
    pub capacity_snapshot: u32,
    pub created_at: DateTime<Utc>,
    pub id: String,
    pub location_id: String,
    pub school_id: String,
}
