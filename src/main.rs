use sentinel::adapters::{OrchestratorClient, PostgresFallbackStore, ResilientKillswitch};
use sentinel::api::{self, AppState};
use sentinel::config::SentinelConfig;
use sentinel::coordination::{
    AggregatorSettings, DashboardAggregator, KillswitchController, RefreshScheduler,
};
use sentinel::error::Result;
use sentinel::gateway::{FallbackStore, HealthProbe, KillswitchGateway, RefreshRequester};
use sentinel::realtime::RealtimeConnectionManager;
use sentinel::services::EndpointHealthVerifier;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = SentinelConfig::load()?;
    init_logging(&config.logging, config.api.debug);

    info!(
        api = %config.api.base_url,
        probes = %config.probes.base_url,
        port = config.server.port,
        "Starting sentinel"
    );

    let verifier: Arc<dyn HealthProbe> = Arc::new(EndpointHealthVerifier::from_config(&config.probes)?);
    let client = Arc::new(OrchestratorClient::from_config(&config.api)?);
    let store = connect_fallback_store(&config).await;

    // Live event stream
    let connection = Arc::new(RealtimeConnectionManager::new(
        config.ws_url(),
        config.stream.clone(),
    ));
    let status = connection.subscribe_status();
    let messages = connection.subscribe_messages();
    connection.connect().await;

    // Aggregator
    let mut aggregator = DashboardAggregator::new(
        client.clone(),
        verifier,
        AggregatorSettings::from_config(&config),
    );
    if let Some(store) = &store {
        aggregator = aggregator.with_fallback(store.clone());
    }
    let (dashboard, aggregator_task) =
        aggregator.spawn(connection.state(), Some(status), Some(messages));

    let refresher: Arc<dyn RefreshRequester> = Arc::new(dashboard.clone());

    let mut scheduler = RefreshScheduler::new(
        refresher.clone(),
        config.dashboard.refresh_interval(),
    );
    scheduler.set_enabled(config.dashboard.auto_refresh);

    let gateway: Arc<dyn KillswitchGateway> =
        Arc::new(ResilientKillswitch::new(client.clone(), store.clone()));
    let killswitch = KillswitchController::new(gateway, refresher, config.api.killswitch_timeout());

    let state = AppState::new(
        dashboard.clone(),
        Some(connection.clone()),
        scheduler,
        killswitch,
    );

    let port = config.server.port;
    let server = tokio::spawn(async move {
        if let Err(e) = api::serve(state, port).await {
            error!("API server exited: {}", e);
        }
    });

    shutdown_signal().await;
    info!("Shutdown signal received");

    server.abort();
    connection.disconnect().await;
    dashboard.shutdown().await;
    if let Err(e) = aggregator_task.await {
        warn!("Aggregator task ended abnormally: {}", e);
    }

    info!("Sentinel stopped");
    Ok(())
}

/// The fallback store is optional; a store that can't be reached at startup
/// is logged and skipped.
async fn connect_fallback_store(config: &SentinelConfig) -> Option<Arc<dyn FallbackStore>> {
    let url = config.database.url.as_deref()?;

    let store = match PostgresFallbackStore::new(url, config.database.max_connections).await {
        Ok(store) => store,
        Err(e) => {
            warn!("Fallback store unavailable, continuing without it: {}", e);
            return None;
        }
    };
    if let Err(e) = store.migrate().await {
        warn!("Fallback store migration failed: {}", e);
    }

    info!("Fallback store connected");
    Some(Arc::new(store))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
