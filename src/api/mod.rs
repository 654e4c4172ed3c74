pub mod handlers;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use routes::create_router;
pub use state::AppState;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;

/// Serve the control/read API until the listener fails
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Dashboard API listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
