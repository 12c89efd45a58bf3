use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::SessionOwner;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::storage::models::School;
use crate::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSchoolRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchoolResponse {
    pub created_at: String,
    pub id: String,
    pub name: String,
}

impl From<School> for SchoolResponse {
    fn from(school: School) -> Self {
        Self {
            created_at: school.created_at.to_rfc3339(),
            id: school.id,
            name: school.name,
        }
    }
}

pub async fn create_school(
    State(state): State<Arc<AppState>>,
    SessionOwner(_): SessionOwner,
    AppJson(req): AppJson<CreateSchoolRequest>,
) -> Result<Json<JSend<SchoolResponse>>, ApiError> {
    let school = state.ledger.register_school(&req.name)?;
    Ok(JSend::success(school.into()))
}

pub async fn get_school(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<SchoolResponse>>, ApiError> {
    let school = state.ledger.get_school(&id)?;
    Ok(JSend::success(school.into()))
}
