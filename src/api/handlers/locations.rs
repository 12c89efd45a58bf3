use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::SessionOwner;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::error::CoreError;
use crate::storage::models::{CheckIn, Location};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateLocationRequest {
    pub capacity: u32,
    pub name: String,
    /// IANA zone name, e.g. `Europe/Berlin`
    pub time_zone: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateCapacityRequest {
    pub capacity: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateCheckInRequest {
    pub school_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocationResponse {
    pub available: u32,
    pub available_yesterday: u32,
    pub capacity: u32,
    pub capacity_yesterday: u32,
    pub created_at: String,
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub owner_user_id: String,
    pub time_zone: String,
    pub yesterday_full_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub capacity_snapshot: u32,
    pub created_at: String,
    pub id: String,
    pub location_id: String,
    pub school_id: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_locations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<Vec<LocationResponse>>>, ApiError> {
    let locations = state.ledger.list_locations()?;
    Ok(JSend::success(
        locations.iter().map(location_to_response).collect(),
    ))
}

pub async fn create_location(
    State(state): State<Arc<AppState>>,
    SessionOwner(owner_id): SessionOwner,
    AppJson(req): AppJson<CreateLocationRequest>,
) -> Result<Json<JSend<LocationResponse>>, ApiError> {
    let location =
        state
            .ledger
            .register_location(&owner_id, &req.name, req.capacity, &req.time_zone)?;
    Ok(JSend::success(location_to_response(&location)))
}

pub async fn get_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<LocationResponse>>, ApiError> {
    let location = state.ledger.get_location(&id)?;
    Ok(JSend::success(location_to_response(&location)))
}

pub async fn delete_location(
    State(state): State<Arc<AppState>>,
    SessionOwner(owner_id): SessionOwner,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    require_owner(&state, &id, &owner_id)?;
    state.ledger.delete_location(&id)?;
    Ok(JSend::success(()))
}

pub async fn update_capacity(
    State(state): State<Arc<AppState>>,
    SessionOwner(owner_id): SessionOwner,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateCapacityRequest>,
) -> Result<Json<JSend<LocationResponse>>, ApiError> {
    require_owner(&state, &id, &owner_id)?;
    let location = state.ledger.update_capacity(&id, req.capacity)?;
    Ok(JSend::success(location_to_response(&location)))
}

pub async fn list_check_ins(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<Vec<CheckInResponse>>>, ApiError> {
    let check_ins = state.ledger.list_check_ins(&id)?;
    Ok(JSend::success(
        check_ins.iter().map(check_in_to_response).collect(),
    ))
}

pub async fn create_check_in(
    State(state): State<Arc<AppState>>,
    SessionOwner(_): SessionOwner,
    Path(id): Path<String>,
    AppJson(req): AppJson<CreateCheckInRequest>,
) -> Result<Json<JSend<CheckInResponse>>, ApiError> {
    let check_in = state.ledger.create_check_in(&id, &req.school_id)?;
    Ok(JSend::success(check_in_to_response(&check_in)))
}

pub async fn delete_check_in(
    State(state): State<Arc<AppState>>,
    SessionOwner(_): SessionOwner,
    Path((id, check_in_id)): Path<(String, String)>,
) -> Result<Json<JSend<CheckInResponse>>, ApiError> {
    let check_in = state.ledger.delete_check_in(&id, &check_in_id)?;
    Ok(JSend::success(check_in_to_response(&check_in)))
}

// ============================================================================
// Helpers
// ============================================================================

fn require_owner(state: &AppState, location_id: &str, owner_id: &str) -> Result<(), CoreError> {
    let location = state.ledger.get_location(location_id)?;
    if location.owner_user_id != owner_id {
        tracing::debug!(location_id = %location_id, owner_id = %owner_id, "Not the location owner");
        return Err(CoreError::Forbidden);
    }
    Ok(())
}

fn location_to_response(location: &Location) -> LocationResponse {
    LocationResponse {
        available: location.available,
        available_yesterday: location.available_yesterday,
        capacity: location.capacity,
        capacity_yesterday: location.capacity_yesterday,
        created_at: location.created_at.to_rfc3339(),
        id: location.id.clone(),
        name: location.name.clone(),
        normalized_name: location.normalized_name.clone(),
        owner_user_id: location.owner_user_id.clone(),
        time_zone: location.time_zone.name().to_string(),
        yesterday_full_at: location
            .yesterday_full_at
            .map(|at| at.with_timezone(&location.time_zone).to_rfc3339()),
    }
}

fn check_in_to_response(check_in: &CheckIn) -> CheckInResponse {
    CheckInResponse {
        capacity_snapshot: check_in.capacity_snapshot,
        created_at: check_in.created_at.to_rfc3339(),
        id: check_in.id.clone(),
        location_id: check_in.location_id.clone(),
        school_id: check_in.school_id.clone(),
    }
}
