use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::{
    lenient_payload, AgentRecord, AgentStatus, EventKind, InboundEvent, KillswitchState, RegimeSnapshot,
};
use crate::error::{Result, SentinelError};
use crate::gateway::FallbackStore;

/// Event type carrying regime state in the record store
pub const REGIME_EVENT_TYPE: &str = "quant.regime.state";

/// `orchestrator_state` key holding the killswitch status
pub const KILLSWITCH_STATE_KEY: &str = "killswitch_status";

/// PostgreSQL record store used while the orchestrator API is down
#[derive(Clone)]
pub struct PostgresFallbackStore {
    pool: PgPool,
}

impl PostgresFallbackStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Reuse an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn agent_from_row(row: &PgRow) -> AgentRecord {
        AgentRecord {
            id: row.get("id"),
            name: row.get("name"),
            group: row.get("agent_group"),
            status: row
                .get::<Option<String>, _>("status")
                .map(|s| AgentStatus::from(s.as_str()))
                .unwrap_or_default(),
            last_heartbeat: row.get("last_beat"),
            last_error: row.get("last_error"),
        }
    }

    fn event_from_row(row: &PgRow) -> InboundEvent {
        let id: i64 = row.get("id");
        let kind: String = row.get("type");
        InboundEvent {
            id: Some(id.to_string()),
            kind: EventKind::parse(&kind),
            source: row
                .get::<Option<String>, _>("source")
                .unwrap_or_else(|| "store".to_string()),
            timestamp: row.get("ts"),
            payload: row
                .get::<Option<String>, _>("payload")
                .map(|raw| lenient_payload(&raw))
                .unwrap_or_else(|| Value::Object(Default::default())),
        }
    }
}

#[async_trait]
impl FallbackStore for PostgresFallbackStore {
    #[instrument(skip(self))]
    async fn load_agents(&self) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, agent_group, status, last_beat, last_error
            FROM agents
            ORDER BY last_beat DESC NULLS LAST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!("Loaded {} agents from record store", rows.len());
        Ok(rows.iter().map(Self::agent_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn load_recent_events(&self, limit: usize) -> Result<Vec<InboundEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, type, source, payload, ts
            FROM events
            ORDER BY ts DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::event_from_row).collect())
    }

    #[instrument(skip(self))]
    async fn load_regime(&self) -> Result<Option<RegimeSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT source, payload, ts
            FROM events
            WHERE type = $1
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(REGIME_EVENT_TYPE)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| {
            let payload = r
                .get::<Option<String>, _>("payload")
                .map(|raw| lenient_payload(&raw))
                .unwrap_or(Value::Null);
            let mut regime = RegimeSnapshot::from_payload(&payload)?;
            let ts: DateTime<Utc> = r.get("ts");
            regime.last_update = Some(ts);
            regime.source = r.get("source");
            Some(regime)
        }))
    }

    #[instrument(skip(self))]
    async fn load_killswitch_state(&self) -> Result<Option<KillswitchState>> {
        let row = sqlx::query("SELECT value FROM orchestrator_state WHERE key = $1")
            .bind(KILLSWITCH_STATE_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let value: Value = r.get("value");
                let state = serde_json::from_value(value)
                    .map_err(|e| SentinelError::MalformedResponse(format!("killswitch_status: {}", e)))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn record_killswitch(&self, state: &KillswitchState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orchestrator_state (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(KILLSWITCH_STATE_KEY)
        .bind(serde_json::to_value(state)?)
        .execute(&self.pool)
        .await?;

        info!("Killswitch state recorded in record store");
        Ok(())
    }
}
