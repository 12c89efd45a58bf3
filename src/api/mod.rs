pub mod auth;
mod handlers;
pub mod response;
mod routes;
mod ws;

pub use routes::create_router;
