use axum::{extract::State, http::StatusCode, Json};

use super::error_response;
use crate::api::{state::AppState, types::*};
use crate::coordination::KillswitchController;
use crate::domain::KillswitchActivation;

fn status_of(controller: &KillswitchController) -> KillswitchStatusResponse {
    KillswitchStatusResponse {
        phase: controller.phase(),
        last_activation: controller.last_activation(),
        activations: controller.history().len(),
    }
}

/// GET /killswitch
pub async fn get_killswitch(State(state): State<AppState>) -> Json<KillswitchStatusResponse> {
    Json(status_of(&state.killswitch))
}

/// POST /killswitch/arm
pub async fn arm_killswitch(
    State(state): State<AppState>,
) -> std::result::Result<Json<KillswitchStatusResponse>, (StatusCode, String)> {
    state.killswitch.request().map_err(error_response)?;
    Ok(Json(status_of(&state.killswitch)))
}

/// POST /killswitch/cancel
pub async fn cancel_killswitch(
    State(state): State<AppState>,
) -> std::result::Result<Json<KillswitchStatusResponse>, (StatusCode, String)> {
    state.killswitch.cancel().map_err(error_response)?;
    Ok(Json(status_of(&state.killswitch)))
}

/// POST /killswitch/confirm
///
/// 200 with the activation on success, 502 with the failed activation when
/// the external call failed. A client that hangs up early does not abort the
/// activation.
pub async fn confirm_killswitch(
    State(state): State<AppState>,
    body: Option<Json<KillswitchConfirmRequest>>,
) -> std::result::Result<(StatusCode, Json<KillswitchActivation>), (StatusCode, String)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let activation = state
        .killswitch
        .confirm(req.reason.as_deref())
        .await
        .map_err(error_response)?;

    let status = if activation.succeeded() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(activation)))
}
