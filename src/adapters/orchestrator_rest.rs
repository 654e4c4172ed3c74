//! Orchestrator REST client: the primary data path and the killswitch call.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::ApiConfig;
use crate::domain::{ActivationPath, AgentRecord, InboundEvent, KillswitchResponse, RegimeSnapshot};
use crate::error::{Result, SentinelError};
use crate::gateway::{DashboardData, DashboardSource, KillswitchGateway};

pub struct OrchestratorClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl OrchestratorClient {
    pub fn new(base_url: &str, timeout: Duration, retry_attempts: u32, retry_delay: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("sentinel-orchestrator/0.1")
            .build()
            .map_err(|e| SentinelError::Internal(format!("failed to build orchestrator HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            retry_attempts: retry_attempts.max(1),
            retry_delay,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.timeout(),
            config.retry_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health/agents`
    #[instrument(skip(self))]
    pub async fn agents(&self) -> Result<Vec<AgentRecord>> {
        let body = self.get_json("/health/agents", &[]).await?;
        let items = Self::pick_array(&body, &["agents", "data"])
            .ok_or_else(|| SentinelError::MalformedResponse("agents response has no agent list".to_string()))?;

        Ok(items
            .iter()
            .filter_map(|item| match serde_json::from_value::<AgentRecord>(item.clone()) {
                Ok(agent) => Some(agent),
                Err(e) => {
                    warn!("Skipping malformed agent record: {}", e);
                    None
                }
            })
            .collect())
    }

    /// `GET /bus/events?since=0&limit=N[&type=T]`, newest first
    #[instrument(skip(self))]
    pub async fn events(&self, limit: usize, event_type: Option<&str>) -> Result<Vec<InboundEvent>> {
        let mut query = vec![("since", "0".to_string()), ("limit", limit.to_string())];
        if let Some(kind) = event_type {
            query.push(("type", kind.to_string()));
        }

        let body = self.get_json("/bus/events", &query).await?;
        let items = Self::pick_array(&body, &["events", "data"])
            .ok_or_else(|| SentinelError::MalformedResponse("events response has no event list".to_string()))?;

        let mut events: Vec<InboundEvent> = items.iter().filter_map(InboundEvent::from_record).collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }

    /// `GET /regime/state`. `None` when the orchestrator has no regime yet.
    #[instrument(skip(self))]
    pub async fn regime(&self) -> Result<Option<RegimeSnapshot>> {
        let body = self.get_json("/regime/state", &[]).await?;
        if body.get("status").and_then(Value::as_str) == Some("no_data") {
            return Ok(None);
        }
        Ok(RegimeSnapshot::from_payload(&body))
    }

    /// `POST /risk/killswitch {reason}`. One attempt only.
    #[instrument(skip(self))]
    pub async fn activate_killswitch(&self, reason: &str) -> Result<KillswitchResponse> {
        let url = format!("{}/risk/killswitch", self.base_url);
        let request = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .json(&json!({ "reason": reason }));

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| SentinelError::timeout("POST /risk/killswitch", self.timeout.as_millis() as u64))??;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SentinelError::HttpStatus {
                status: status.as_u16(),
                detail: Self::status_detail(status, &text),
            });
        }

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        match body.get("success").and_then(Value::as_bool) {
            Some(false) => Ok(KillswitchResponse::failed(
                Self::pick_str(&body, &["error", "message"]).unwrap_or("orchestrator rejected killswitch"),
            )),
            _ => Ok(KillswitchResponse::ok(ActivationPath::Api)),
        }
    }

    /// GET with per-attempt timeout and linear backoff between attempts
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            match self.get_once(path, query).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!(
                        "GET {} failed (attempt {}/{}): {}",
                        path, attempt, self.retry_attempts, e
                    );
                    last_error = Some(e);
                    if attempt < self.retry_attempts {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SentinelError::Internal(format!("GET {} was never attempted", path))))
    }

    async fn get_once(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http
            .get(&url)
            .query(query)
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-cache");

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| SentinelError::timeout(format!("GET {}", path), self.timeout.as_millis() as u64))??;

        let status = response.status();
        let remaining = self.timeout;
        let text = tokio::time::timeout(remaining, response.text())
            .await
            .map_err(|_| SentinelError::timeout(format!("GET {} body", path), remaining.as_millis() as u64))??;

        if !status.is_success() {
            return Err(SentinelError::HttpStatus {
                status: status.as_u16(),
                detail: Self::status_detail(status, &text),
            });
        }

        debug!("GET {} -> {} ({} bytes)", path, status, text.len());
        serde_json::from_str(&text)
            .map_err(|e| SentinelError::MalformedResponse(format!("GET {}: {}", path, e)))
    }

    fn status_detail(status: reqwest::StatusCode, body: &str) -> String {
        let reason = status.canonical_reason().unwrap_or("Unknown");
        let body = body.trim();
        if body.is_empty() {
            reason.to_string()
        } else {
            format!("{} ({})", reason, body.chars().take(200).collect::<String>())
        }
    }

    fn pick_array<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a [Value]> {
        if let Some(items) = root.as_array() {
            return Some(items.as_slice());
        }
        keys.iter()
            .find_map(|key| root.get(*key).and_then(|v| v.as_array()).map(Vec::as_slice))
    }

    fn pick_str<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a str> {
        keys.iter().find_map(|key| root.get(*key).and_then(Value::as_str))
    }
}

#[async_trait]
impl DashboardSource for OrchestratorClient {
    async fn load(&self, event_limit: usize) -> Result<DashboardData> {
        let (agents, events, regime) =
            tokio::try_join!(self.agents(), self.events(event_limit, None), self.regime())?;
        Ok(DashboardData {
            agents,
            events,
            regime,
            killswitch: None,
        })
    }
}

#[async_trait]
impl KillswitchGateway for OrchestratorClient {
    async fn activate(&self, reason: &str) -> Result<KillswitchResponse> {
        self.activate_killswitch(reason).await
    }
}
