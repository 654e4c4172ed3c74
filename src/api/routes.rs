use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState, websocket::websocket_handler};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::get_health))
        .route("/healthz", get(handlers::liveness))
        .route("/readyz", get(handlers::readiness))
        // Dashboard endpoints
        .route("/snapshot", get(handlers::get_snapshot))
        .route("/refresh", post(handlers::trigger_refresh))
        .route("/reconnect", post(handlers::force_reconnect))
        .route("/auto-refresh", post(handlers::set_auto_refresh))
        .route("/offline", post(handlers::set_offline))
        // Killswitch endpoints
        .route("/killswitch", get(handlers::get_killswitch))
        .route("/killswitch/arm", post(handlers::arm_killswitch))
        .route("/killswitch/cancel", post(handlers::cancel_killswitch))
        .route("/killswitch/confirm", post(handlers::confirm_killswitch))
        // Snapshot stream
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(cors)
}
