use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::storage::models::Location;

/// What a connection wants to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicSelector {
    AllLocations,
    /// Exactly one location, by normalized name
    SingleLocation(String),
}

impl TopicSelector {
    pub fn matches(&self, normalized_name: &str) -> bool {
        match self {
            TopicSelector::AllLocations => true,
            TopicSelector::SingleLocation(name) => name == normalized_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    AllLocations,
    SingleLocation,
}

/// First message a client sends after the WebSocket opens
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    #[serde(default)]
    pub normalized_name: Option<String>,
    pub topic: Topic,
}

impl TryFrom<SubscribeRequest> for TopicSelector {
    type Error = CoreError;

    fn try_from(req: SubscribeRequest) -> Result<Self, Self::Error> {
        match req.topic {
            Topic::AllLocations => Ok(TopicSelector::AllLocations),
            Topic::SingleLocation => match req.normalized_name {
                Some(name) if !name.trim().is_empty() => Ok(TopicSelector::SingleLocation(name)),
                _ => Err(CoreError::Invalid(
                    "normalizedName is required for single-location".to_string(),
                )),
            },
        }
    }
}

/// Occupancy snapshot pushed to dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationState {
    pub available: u32,
    pub available_yesterday: u32,
    pub capacity: u32,
    pub capacity_yesterday: u32,
    /// Location the state was read from; a re-created name gets a new id
    #[serde(skip)]
    pub location_id: String,
    pub normalized_name: String,
    /// Store version of the location when this state was read
    #[serde(skip)]
    pub version: u64,
    /// RFC 3339 in the location's own time zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yesterday_full_at: Option<String>,
}

impl From<&Location> for LocationState {
    fn from(location: &Location) -> Self {
        Self {
            available: location.available,
            available_yesterday: location.available_yesterday,
            capacity: location.capacity,
            capacity_yesterday: location.capacity_yesterday,
            location_id: location.id.clone(),
            normalized_name: location.normalized_name.clone(),
            version: location.version,
            yesterday_full_at: location
                .yesterday_full_at
                .map(|at| at.with_timezone(&location.time_zone).to_rfc3339()),
        }
    }
}
