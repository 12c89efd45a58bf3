use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, ws};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Session routes -- cookie in, cookie out
    let session_routes = Router::new()
        .route(
            "/sessions",
            post(handlers::create_session).delete(handlers::sign_out),
        )
        .route("/sessions/all", delete(handlers::sign_out_everywhere))
        .route("/sessions/current", get(handlers::current_session))
        .route("/sessions/refresh", post(handlers::refresh_session));

    // Ledger routes -- mutations require an access cookie
    let ledger_routes = Router::new()
        .route(
            "/locations",
            get(handlers::list_locations).post(handlers::create_location),
        )
        .route(
            "/locations/:id",
            get(handlers::get_location).delete(handlers::delete_location),
        )
        .route("/locations/:id/capacity", put(handlers::update_capacity))
        .route(
            "/locations/:id/check-ins",
            get(handlers::list_check_ins).post(handlers::create_check_in),
        )
        .route(
            "/locations/:id/check-ins/:check_in_id",
            delete(handlers::delete_check_in),
        )
        .route("/schools", post(handlers::create_school))
        .route("/schools/:id", get(handlers::get_school));

    let internal_routes = Router::new().route("/_internal/health", get(handlers::health));

    Router::new()
        .merge(session_routes)
        .merge(ledger_routes)
        .merge(internal_routes)
        .route("/ws", get(ws::subscribe))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
