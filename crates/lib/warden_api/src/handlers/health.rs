//! Liveness and database health.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::warn;

use crate::AppState;
use crate::models::HealthResponse;

/// `GET /health`: 200 when the store answers, 503 otherwise.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("health check: database ping failed: {e}");
            false
        }
    };
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if db_ok { "ok" } else { "degraded" }.into(),
            server: "up".into(),
            database: if db_ok { "up" } else { "down" }.into(),
            timestamp: Utc::now(),
        }),
    )
}
