use axum::extract::State;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::{
    read_cookie, with_session, without_session, SessionOwner, ACCESS_COOKIE, REFRESH_COOKIE,
};
use crate::api::response::{ApiError, AppJson, JSend};
use crate::tokens::{session, SessionPair};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSessionRequest {
    pub owner_id: String,
}

/// Token plaintexts only travel in cookies, never in the body
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub access_expires_at: String,
    pub owner_id: String,
    pub refresh_expires_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CurrentSessionResponse {
    pub owner_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignOutResponse {
    pub revoked: usize,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<(CookieJar, Json<JSend<SessionResponse>>), ApiError> {
    let pair = session::sign_in(&state.db, req.owner_id.trim(), &state.config.tokens)?;
    tracing::debug!(owner_id = %pair.owner_id, "Created session");
    Ok(session_reply(&state, jar, &pair))
}

pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<JSend<SessionResponse>>), ApiError> {
    let refresh = read_cookie(&jar, REFRESH_COOKIE).ok_or_else(ApiError::unauthorized)?;
    let pair = session::refresh(&state.db, &refresh, &state.config.tokens)?;
    Ok(session_reply(&state, jar, &pair))
}

pub async fn current_session(
    SessionOwner(owner_id): SessionOwner,
) -> Json<JSend<CurrentSessionResponse>> {
    JSend::success(CurrentSessionResponse { owner_id })
}

pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<JSend<SignOutResponse>>), ApiError> {
    let access = read_cookie(&jar, ACCESS_COOKIE);
    let refresh = read_cookie(&jar, REFRESH_COOKIE);
    let revoked = session::sign_out(&state.db, access.as_deref(), refresh.as_deref())?;

    Ok((
        without_session(jar, state.config.tokens.secure_cookies),
        JSend::success(SignOutResponse { revoked }),
    ))
}

pub async fn sign_out_everywhere(
    State(state): State<Arc<AppState>>,
    SessionOwner(owner_id): SessionOwner,
    jar: CookieJar,
) -> Result<(CookieJar, Json<JSend<SignOutResponse>>), ApiError> {
    let revoked = session::sign_out_everywhere(&state.db, &owner_id)?;
    tracing::debug!(owner_id = %owner_id, revoked, "Signed out everywhere");

    Ok((
        without_session(jar, state.config.tokens.secure_cookies),
        JSend::success(SignOutResponse { revoked }),
    ))
}

// ============================================================================
// Helpers
// ============================================================================

fn session_reply(
    state: &AppState,
    jar: CookieJar,
    pair: &SessionPair,
) -> (CookieJar, Json<JSend<SessionResponse>>) {
    (
        with_session(jar, pair, state.config.tokens.secure_cookies),
        JSend::success(SessionResponse {
            access_expires_at: pair.access.expires_at.to_rfc3339(),
            owner_id: pair.owner_id.clone(),
            refresh_expires_at: pair.refresh.expires_at.to_rfc3339(),
        }),
    )
}
