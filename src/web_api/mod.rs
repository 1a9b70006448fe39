//! WebAPI - Local Control API
//!
//! ## Responsibilities
//!
//! - Expose the reconciliation store snapshot to a UI
//! - Forward user actions to the dispatcher
//! - Serve the latest notifications

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
        uptime_sec: state.started_at.elapsed().as_secs(),
        backend_url: state.config.backend_url.clone(),
        accepting_writes: !state.store.is_closed(),
    };

    Json(response)
}
