//! Agent liveness classification from heartbeat records.
//!
//! Pure functions only: liveness is derived at read time and never stored.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::{AgentLiveness, AgentRecord, GroupRollup, LivenessReport, StatusCounts};

/// Heartbeat silence tolerated before an agent is considered dead
pub const DEFAULT_LIVENESS_THRESHOLD_SECS: i64 = 30;

/// Effective threshold: missing, zero or negative values fall back to the default
pub fn effective_threshold(threshold_secs: Option<i64>) -> i64 {
    match threshold_secs {
        Some(secs) if secs > 0 => secs,
        _ => DEFAULT_LIVENESS_THRESHOLD_SECS,
    }
}

/// Alive iff the last heartbeat is strictly younger than the threshold.
/// An agent that never sent one is never alive.
pub fn is_alive(last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>, threshold_secs: i64) -> bool {
    match last_heartbeat {
        Some(beat) => (now - beat).num_milliseconds() < threshold_secs.saturating_mul(1000),
        None => false,
    }
}

/// Classify every agent and roll them up by group and declared status.
pub fn assess(agents: &[AgentRecord], now: DateTime<Utc>, threshold_secs: Option<i64>) -> LivenessReport {
    let threshold = effective_threshold(threshold_secs);

    let mut groups: BTreeMap<String, GroupRollup> = BTreeMap::new();
    let mut by_status = StatusCounts::default();
    let mut classified = Vec::with_capacity(agents.len());
    let mut alive = 0;

    for record in agents {
        let agent_alive = is_alive(record.last_heartbeat, now, threshold);
        let rollup = groups.entry(record.group_or_unknown().to_string()).or_default();
        rollup.total += 1;
        if agent_alive {
            rollup.active += 1;
            alive += 1;
        }
        by_status.record(record.status);

        classified.push(AgentLiveness {
            record: record.clone(),
            is_alive: agent_alive,
            seconds_since_heartbeat: record.last_heartbeat.map(|beat| (now - beat).num_seconds()),
        });
    }

    LivenessReport {
        assessed_at: Some(now),
        threshold_secs: threshold,
        agents: classified,
        groups,
        by_status,
        total: agents.len(),
        alive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentStatus, UNKNOWN_GROUP};
    use chrono::Duration;

    fn agent(id: &str, group: Option<&str>, status: AgentStatus, beat: Option<DateTime<Utc>>) -> AgentRecord {
        AgentRecord {
            id: id.to_string(),
            name: None,
            group: group.map(str::to_string),
            status,
            last_heartbeat: beat,
            last_error: None,
        }
    }

    #[test]
    fn test_heartbeat_boundaries() {
        let now = Utc::now();
        assert!(!is_alive(Some(now - Duration::seconds(45)), now, 30));
        assert!(is_alive(Some(now - Duration::seconds(15)), now, 30));
        // Exactly at the threshold the agent is no longer alive
        assert!(!is_alive(Some(now - Duration::seconds(30)), now, 30));
        assert!(is_alive(Some(now - Duration::milliseconds(29_999)), now, 30));
    }

    #[test]
    fn test_never_beat_is_dead_regardless_of_status() {
        let now = Utc::now();
        let report = assess(&[agent("a", Some("signals"), AgentStatus::Active, None)], now, Some(30));
        assert!(!report.agents[0].is_alive);
        assert_eq!(report.agents[0].seconds_since_heartbeat, None);
        assert_eq!(report.alive, 0);
        assert_eq!(report.by_status.active, 1);
    }

    #[test]
    fn test_invalid_threshold_falls_back() {
        assert_eq!(effective_threshold(None), DEFAULT_LIVENESS_THRESHOLD_SECS);
        assert_eq!(effective_threshold(Some(-5)), DEFAULT_LIVENESS_THRESHOLD_SECS);
        assert_eq!(effective_threshold(Some(0)), DEFAULT_LIVENESS_THRESHOLD_SECS);
        assert_eq!(effective_threshold(Some(1)), 1);
        assert_eq!(effective_threshold(Some(120)), 120);

        let now = Utc::now();
        let agents = [
            agent("fresh", None, AgentStatus::Active, Some(now - Duration::seconds(10))),
            agent("stale", None, AgentStatus::Active, Some(now - Duration::seconds(60))),
        ];
        let report = assess(&agents, now, Some(-1));
        assert_eq!(report.threshold_secs, 30);
        assert!(report.agents[0].is_alive);
        assert!(!report.agents[1].is_alive);

        // Zero would mark every agent dead
        let report = assess(&agents, now, Some(0));
        assert_eq!(report.threshold_secs, 30);
        assert_eq!(report.alive, 1);
    }

    #[test]
    fn test_group_rollups_keep_unknown_bucket() {
        let now = Utc::now();
        let recent = Some(now - Duration::seconds(5));
        let old = Some(now - Duration::seconds(600));
        let agents = [
            agent("a1", Some("ingestion"), AgentStatus::Active, recent),
            agent("a2", Some("ingestion"), AgentStatus::Paused, old),
            agent("a3", Some("execution"), AgentStatus::Error, recent),
            agent("a4", None, AgentStatus::Inactive, recent),
            agent("a5", Some(""), AgentStatus::Unknown, None),
        ];
        let report = assess(&agents, now, None);

        assert_eq!(report.total, 5);
        assert_eq!(report.alive, 3);
        assert_eq!(report.groups["ingestion"], GroupRollup { total: 2, active: 1 });
        assert_eq!(report.groups["execution"], GroupRollup { total: 1, active: 1 });
        assert_eq!(report.groups[UNKNOWN_GROUP], GroupRollup { total: 2, active: 1 });
        assert_eq!(
            report.by_status,
            StatusCounts { active: 1, paused: 1, inactive: 1, error: 1, unknown: 1 }
        );
        // Input order is preserved
        let ids: Vec<_> = report.agents.iter().map(|a| a.record.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3", "a4", "a5"]);
    }

    #[test]
    fn test_empty_input() {
        let report = assess(&[], Utc::now(), Some(30));
        assert_eq!(report.total, 0);
        assert!(report.groups.is_empty());
    }
}
