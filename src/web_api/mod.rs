//! WebAPI - REST Boundary
//!
//! ## Responsibilities
//!
//! - Read-only projections of fleet state, calls, and history
//! - Command endpoints (open door, administrative removal)
//! - Device-identity validation before anything reaches the core

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        device_count: state.fleet.device_count().await,
        open_calls: state.calls.open_count().await,
    };

    Json(response)
}
