use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::coordination::KillswitchPhase;
use crate::domain::{ConnectionState, DashboardSnapshot, KillswitchActivation, SystemHealth};

// ============================================================================
// Dashboard Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: SystemHealth,
    pub generation: u64,
    pub assembled_at: DateTime<Utc>,
    pub fallback_mode: bool,
    pub connection_status: ConnectionState,
    pub healthy_endpoints: usize,
    pub total_endpoints: usize,
    pub agents: usize,
    pub alive_agents: usize,
    pub errors: BTreeMap<String, String>,
    pub uptime_secs: i64,
}

impl HealthResponse {
    pub fn from_snapshot(snapshot: &DashboardSnapshot, uptime_secs: i64) -> Self {
        Self {
            status: snapshot.health,
            generation: snapshot.generation,
            assembled_at: snapshot.assembled_at,
            fallback_mode: snapshot.fallback_mode,
            connection_status: snapshot.connection_status,
            healthy_endpoints: snapshot.healthy_endpoints(),
            total_endpoints: snapshot.total_endpoints(),
            agents: snapshot.liveness.total,
            alive_agents: snapshot.liveness.alive,
            errors: snapshot.errors.clone(),
            uptime_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub accepted: bool,
    pub message: String,
}

impl AckResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoRefreshRequest {
    pub enabled: bool,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRefreshResponse {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineRequest {
    pub enabled: bool,
}

// ============================================================================
// Killswitch Types
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KillswitchConfirmRequest {
    /// Falls back to the stored draft when omitted
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KillswitchStatusResponse {
    #[serde(flatten)]
    pub phase: KillswitchPhase,
    pub last_activation: Option<KillswitchActivation>,
    pub activations: usize,
}
