//! Liveness endpoint.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::models::HealthResponse;

/// `GET /health`: Reports the build version and database reachability.
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_connected = match &state.pool {
        Some(pool) => Some(sqlx::query("SELECT 1").execute(pool).await.is_ok()),
        None => None,
    };

    Ok(Json(HealthResponse {
        status: "ok".into(),
        version: warden_core::version().into(),
        db_connected,
    }))
}
