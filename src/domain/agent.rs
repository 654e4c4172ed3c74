use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Group used for agents that declare none
pub const UNKNOWN_GROUP: &str = "unknown";

/// Status an agent declares for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Paused,
    Inactive,
    Error,
    Unknown,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Error => "error",
            AgentStatus::Unknown => "unknown",
        }
    }
}

impl From<&str> for AgentStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "running" => AgentStatus::Active,
            "paused" => AgentStatus::Paused,
            "inactive" | "stopped" => AgentStatus::Inactive,
            "error" | "failed" => AgentStatus::Error,
            _ => AgentStatus::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for AgentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(AgentStatus::from).unwrap_or(AgentStatus::Unknown))
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Unknown
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent as reported by the orchestrator or the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "agent_group")]
    pub group: Option<String>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default, alias = "last_beat")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl AgentRecord {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Group name, or the explicit unknown bucket
    pub fn group_or_unknown(&self) -> &str {
        match self.group.as_deref().map(str::trim) {
            Some(g) if !g.is_empty() => g,
            _ => UNKNOWN_GROUP,
        }
    }
}

/// One agent with its derived liveness at assessment time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentLiveness {
    #[serde(flatten)]
    pub record: AgentRecord,
    pub is_alive: bool,
    pub seconds_since_heartbeat: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupRollup {
    pub total: usize,
    /// Agents in the group classified alive
    pub active: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub active: usize,
    pub paused: usize,
    pub inactive: usize,
    pub error: usize,
    pub unknown: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: AgentStatus) {
        match status {
            AgentStatus::Active => self.active += 1,
            AgentStatus::Paused => self.paused += 1,
            AgentStatus::Inactive => self.inactive += 1,
            AgentStatus::Error => self.error += 1,
            AgentStatus::Unknown => self.unknown += 1,
        }
    }
}

/// Liveness classification of an agent set at one instant
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LivenessReport {
    pub assessed_at: Option<DateTime<Utc>>,
    pub threshold_secs: i64,
    pub agents: Vec<AgentLiveness>,
    pub groups: BTreeMap<String, GroupRollup>,
    pub by_status: StatusCounts,
    pub total: usize,
    pub alive: usize,
}
