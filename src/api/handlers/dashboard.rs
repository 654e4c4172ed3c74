use axum::{extract::State, http::StatusCode, Json};
use std::time::Duration;
use tracing::info;

use super::error_response;
use crate::api::{state::AppState, types::*};
use crate::domain::{DashboardSnapshot, RefreshCause};

/// GET /health -- summary of the latest snapshot
pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.dashboard.snapshot();
    Json(HealthResponse::from_snapshot(&snapshot, state.uptime_seconds()))
}

/// GET /healthz -- process liveness
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /readyz -- ready once the first refresh has been published
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.dashboard.snapshot().is_loading() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /snapshot
pub async fn get_snapshot(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(state.dashboard.snapshot().as_ref().clone())
}

/// POST /refresh
pub async fn trigger_refresh(
    State(state): State<AppState>,
) -> std::result::Result<(StatusCode, Json<AckResponse>), (StatusCode, String)> {
    if state.dashboard.request_refresh(RefreshCause::Manual) {
        Ok((StatusCode::ACCEPTED, Json(AckResponse::accepted("refresh requested"))))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "dashboard aggregator is not running".to_string(),
        ))
    }
}

/// POST /reconnect
pub async fn force_reconnect(
    State(state): State<AppState>,
) -> std::result::Result<(StatusCode, Json<AckResponse>), (StatusCode, String)> {
    let connection = state.connection.as_ref().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "no event stream configured".to_string(),
    ))?;

    connection.force_reconnect().await;
    Ok((StatusCode::ACCEPTED, Json(AckResponse::accepted("reconnect started"))))
}

/// POST /auto-refresh
pub async fn set_auto_refresh(
    State(state): State<AppState>,
    Json(req): Json<AutoRefreshRequest>,
) -> std::result::Result<Json<AutoRefreshResponse>, (StatusCode, String)> {
    let mut scheduler = state.scheduler.lock().await;

    match req.interval_secs {
        Some(0) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "interval_secs must be positive".to_string(),
            ))
        }
        Some(secs) => scheduler.set_interval(Duration::from_secs(secs)),
        None => {}
    }
    scheduler.set_enabled(req.enabled);

    Ok(Json(AutoRefreshResponse {
        enabled: scheduler.is_enabled(),
        interval_secs: scheduler.interval().as_secs(),
    }))
}

/// POST /offline
pub async fn set_offline(
    State(state): State<AppState>,
    Json(req): Json<OfflineRequest>,
) -> std::result::Result<Json<AckResponse>, (StatusCode, String)> {
    state
        .dashboard
        .set_force_offline(req.enabled)
        .await
        .map_err(error_response)?;
    state.dashboard.request_refresh(RefreshCause::Manual);

    info!("Forced offline mode set to {} via API", req.enabled);
    Ok(Json(AckResponse::accepted(if req.enabled {
        "serving from record store"
    } else {
        "primary data path restored"
    })))
}
