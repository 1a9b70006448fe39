//! API Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};

use crate::models::{ActivateRequest, AddPlateRequest, ApiResponse, NotificationQuery};
use crate::state::AppState;

const DEFAULT_NOTIFICATION_LIMIT: usize = 50;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(get_status))
        // Plates
        .route("/api/plates", post(add_plate))
        .route("/api/plates/:plate", delete(remove_plate))
        .route("/api/plates/:plate/activate", post(activate_plate))
        .route("/api/plates/:plate/deactivate", post(deactivate_plate))
        // Detection
        .route("/api/detection/start", post(start_detection))
        .route("/api/detection/stop", post(stop_detection))
        // Notifications
        .route("/api/notifications", get(list_notifications))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error("No such endpoint")),
    )
}

/// Current reconciled state
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.store.snapshot().await))
}

// ========================================
// Plate Handlers
// ========================================

async fn add_plate(
    State(state): State<AppState>,
    Json(req): Json<AddPlateRequest>,
) -> Result<impl IntoResponse, crate::Error> {
    state.dispatcher.add_plate(&req.license_plate).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(state.store.snapshot().await)),
    ))
}

async fn remove_plate(
    State(state): State<AppState>,
    Path(plate): Path<String>,
) -> Result<impl IntoResponse, crate::Error> {
    state.dispatcher.remove_plate(&plate).await?;
    Ok(Json(ApiResponse::success(state.store.snapshot().await)))
}

/// Activate parking; the body is optional
async fn activate_plate(
    State(state): State<AppState>,
    Path(plate): Path<String>,
    req: Option<Json<ActivateRequest>>,
) -> Result<impl IntoResponse, crate::Error> {
    let duration_minutes = req.and_then(|Json(r)| r.duration_minutes);
    state.dispatcher.activate(&plate, duration_minutes).await?;
    Ok(Json(ApiResponse::success(state.store.snapshot().await)))
}

async fn deactivate_plate(
    State(state): State<AppState>,
    Path(plate): Path<String>,
) -> Result<impl IntoResponse, crate::Error> {
    state.dispatcher.deactivate(&plate).await?;
    Ok(Json(ApiResponse::success(state.store.snapshot().await)))
}

// ========================================
// Detection Handlers
// ========================================

async fn start_detection(State(state): State<AppState>) -> Result<impl IntoResponse, crate::Error> {
    state.dispatcher.start_detection().await?;
    Ok(Json(ApiResponse::success(state.store.detection().await)))
}

async fn stop_detection(State(state): State<AppState>) -> Result<impl IntoResponse, crate::Error> {
    state.dispatcher.stop_detection().await?;
    Ok(Json(ApiResponse::success(state.store.detection().await)))
}

// ========================================
// Notification Handlers
// ========================================

/// Newest first
async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT);
    Json(ApiResponse::success(state.notifications.latest(limit).await))
}
