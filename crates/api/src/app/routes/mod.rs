use axum::{Router, routing::get};

pub mod system;

/// Router for endpoints the gateway answers itself (never forwarded).
pub fn router() -> Router {
    Router::new().route("/health", get(system::health))
}
