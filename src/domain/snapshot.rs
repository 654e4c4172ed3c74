//! Aggregate dashboard state for one refresh generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::agent::LivenessReport;
use super::connection::ConnectionState;
use super::event::InboundEvent;
use super::killswitch::KillswitchState;
use super::probe::VerificationReport;
use super::regime::RegimeSnapshot;

/// Overall system health shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemHealth {
    /// No refresh has completed yet
    Loading,
    Healthy,
    Degraded,
    NoData,
    Warning,
}

impl SystemHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemHealth::Loading => "loading",
            SystemHealth::Healthy => "healthy",
            SystemHealth::Degraded => "degraded",
            SystemHealth::NoData => "no-data",
            SystemHealth::Warning => "warning",
        }
    }
}

impl std::fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which data path fed a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataOrigin {
    Primary,
    Fallback,
    /// Nothing loaded yet
    None,
}

/// What started a refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshCause {
    Initial,
    Timer,
    Manual,
    Reconnected,
    Killswitch,
    StreamKillswitch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStats {
    pub started: u64,
    pub completed: u64,
    /// Stimuli dropped because a refresh was already in flight
    pub coalesced: u64,
}

/// The facts overall health is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthInputs {
    pub connected: bool,
    pub healthy_endpoints: usize,
    pub total_endpoints: usize,
    pub agent_count: usize,
    pub fallback_mode: bool,
}

/// Derive overall health. Fallback mode dominates; healthy needs a live
/// stream, at least four fifths of the endpoints OK and one agent.
pub fn derive_system_health(inputs: &HealthInputs) -> SystemHealth {
    let endpoints_ok = inputs.total_endpoints > 0
        && inputs.healthy_endpoints * 5 >= inputs.total_endpoints * 4;

    if inputs.fallback_mode {
        SystemHealth::Degraded
    } else if inputs.connected && endpoints_ok && inputs.agent_count > 0 {
        SystemHealth::Healthy
    } else if inputs.agent_count == 0 {
        SystemHealth::NoData
    } else {
        SystemHealth::Warning
    }
}

/// One complete, internally consistent rendering of dashboard state.
///
/// Published as `Arc<DashboardSnapshot>` and never mutated after publication.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub generation: u64,
    pub assembled_at: DateTime<Utc>,
    pub cause: Option<RefreshCause>,
    pub refresh_duration_ms: u64,
    pub fallback_mode: bool,
    pub data_origin: DataOrigin,
    pub connection_status: ConnectionState,
    pub verification: Option<VerificationReport>,
    pub liveness: LivenessReport,
    pub regime: Option<RegimeSnapshot>,
    pub recent_events: Vec<InboundEvent>,
    pub killswitch: Option<KillswitchState>,
    /// Per-source failures for this generation, keyed by source name
    pub errors: BTreeMap<String, String>,
    pub health: SystemHealth,
    pub stats: RefreshStats,
}

impl DashboardSnapshot {
    /// Placeholder published before the first refresh completes
    pub fn loading(connection_status: ConnectionState) -> Self {
        Self {
            generation: 0,
            assembled_at: Utc::now(),
            cause: None,
            refresh_duration_ms: 0,
            fallback_mode: false,
            data_origin: DataOrigin::None,
            connection_status,
            verification: None,
            liveness: LivenessReport::default(),
            regime: None,
            recent_events: Vec::new(),
            killswitch: None,
            errors: BTreeMap::new(),
            health: SystemHealth::Loading,
            stats: RefreshStats::default(),
        }
    }

    pub fn healthy_endpoints(&self) -> usize {
        self.verification
            .as_ref()
            .map(VerificationReport::healthy_endpoints)
            .unwrap_or(0)
    }

    pub fn total_endpoints(&self) -> usize {
        self.verification
            .as_ref()
            .map(VerificationReport::total_endpoints)
            .unwrap_or(0)
    }

    pub fn health_inputs(&self) -> HealthInputs {
        HealthInputs {
            connected: self.connection_status.is_connected(),
            healthy_endpoints: self.healthy_endpoints(),
            total_endpoints: self.total_endpoints(),
            agent_count: self.liveness.total,
            fallback_mode: self.fallback_mode,
        }
    }

    /// Re-derive health from this snapshot alone, without re-probing
    pub fn recompute_health(&self) -> SystemHealth {
        if self.generation == 0 {
            return SystemHealth::Loading;
        }
        derive_system_health(&self.health_inputs())
    }

    pub fn is_loading(&self) -> bool {
        self.generation == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(connected: bool, healthy: usize, agents: usize, fallback: bool) -> HealthInputs {
        HealthInputs {
            connected,
            healthy_endpoints: healthy,
            total_endpoints: 5,
            agent_count: agents,
            fallback_mode: fallback,
        }
    }

    #[test]
    fn test_healthy_requires_all_three() {
        assert_eq!(derive_system_health(&inputs(true, 4, 1, false)), SystemHealth::Healthy);
        assert_eq!(derive_system_health(&inputs(true, 5, 12, false)), SystemHealth::Healthy);
        assert_eq!(derive_system_health(&inputs(false, 5, 12, false)), SystemHealth::Warning);
        assert_eq!(derive_system_health(&inputs(true, 3, 12, false)), SystemHealth::Warning);
    }

    #[test]
    fn test_fallback_dominates() {
        assert_eq!(derive_system_health(&inputs(true, 5, 12, true)), SystemHealth::Degraded);
        assert_eq!(derive_system_health(&inputs(false, 0, 0, true)), SystemHealth::Degraded);
    }

    #[test]
    fn test_no_agents_is_no_data() {
        assert_eq!(derive_system_health(&inputs(true, 5, 0, false)), SystemHealth::NoData);
        assert_eq!(derive_system_health(&inputs(false, 0, 0, false)), SystemHealth::NoData);
    }

    #[test]
    fn test_two_of_five_is_warning() {
        assert_eq!(derive_system_health(&inputs(true, 2, 3, false)), SystemHealth::Warning);
    }

    #[test]
    fn test_loading_snapshot() {
        let snapshot = DashboardSnapshot::loading(ConnectionState::Connecting);
        assert!(snapshot.is_loading());
        assert_eq!(snapshot.health, SystemHealth::Loading);
        assert_eq!(snapshot.recompute_health(), SystemHealth::Loading);
        assert_eq!(snapshot.healthy_endpoints(), 0);
        assert_eq!(
            serde_json::to_value(SystemHealth::NoData).unwrap(),
            serde_json::json!("no-data")
        );
    }
}
