use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::coordination::{DashboardHandle, KillswitchController, RefreshScheduler};
use crate::realtime::RealtimeConnectionManager;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Front door to the aggregator task
    pub dashboard: DashboardHandle,

    /// Live event stream; absent when no stream is configured
    pub connection: Option<Arc<RealtimeConnectionManager>>,

    pub scheduler: Arc<Mutex<RefreshScheduler>>,

    /// Serializes its own transitions; never locked across the outbound call
    pub killswitch: Arc<KillswitchController>,

    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        dashboard: DashboardHandle,
        connection: Option<Arc<RealtimeConnectionManager>>,
        scheduler: RefreshScheduler,
        killswitch: KillswitchController,
    ) -> Self {
        Self {
            dashboard,
            connection,
            scheduler: Arc::new(Mutex::new(scheduler)),
            killswitch: Arc::new(killswitch),
            start_time: Utc::now(),
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
