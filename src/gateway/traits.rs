use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{
    AgentRecord, InboundEvent, KillswitchResponse, KillswitchState, RefreshCause, RegimeSnapshot,
    VerificationReport,
};
use crate::error::Result;

/// Raw records loaded in one pass from either data path
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardData {
    pub agents: Vec<AgentRecord>,
    /// Newest first
    pub events: Vec<InboundEvent>,
    pub regime: Option<RegimeSnapshot>,
    pub killswitch: Option<KillswitchState>,
}

/// Primary data path (the orchestrator API)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DashboardSource: Send + Sync {
    /// Load agents, recent events and regime. Any failure fails the whole load.
    async fn load(&self, event_limit: usize) -> Result<DashboardData>;
}

/// Secondary record store used while the primary path is down
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FallbackStore: Send + Sync {
    async fn load_agents(&self) -> Result<Vec<AgentRecord>>;

    async fn load_recent_events(&self, limit: usize) -> Result<Vec<InboundEvent>>;

    async fn load_regime(&self) -> Result<Option<RegimeSnapshot>>;

    async fn load_killswitch_state(&self) -> Result<Option<KillswitchState>>;

    async fn record_killswitch(&self, state: &KillswitchState) -> Result<()>;
}

/// The outbound emergency-stop call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KillswitchGateway: Send + Sync {
    async fn activate(&self, reason: &str) -> Result<KillswitchResponse>;
}

/// One full endpoint verification pass. Never fails: every outcome is a result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn verify(&self) -> VerificationReport;
}

/// Anything that can ask the aggregator for a refresh
#[cfg_attr(test, mockall::automock)]
pub trait RefreshRequester: Send + Sync {
    /// Returns false when the aggregator is gone.
    fn request_refresh(&self, cause: RefreshCause) -> bool;
}
