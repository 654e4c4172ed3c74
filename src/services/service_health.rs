use chrono::Utc;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::ServiceHealth;
use crate::error::{Result, SentinelError};

/// `GET /health` against the secondary service
pub struct ServiceHealthChecker {
    http: Client,
    url: String,
    timeout: Duration,
}

impl ServiceHealthChecker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("sentinel-verifier/0.1")
            .build()
            .map_err(|e| SentinelError::Internal(format!("failed to build health HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: format!("{}/health", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Non-2xx or non-JSON responses count as down; the raw status text is kept.
    pub async fn check(&self) -> ServiceHealth {
        let request = self.http.get(&self.url).header(ACCEPT, "application/json");

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Err(_) => {
                return self.down(None, "timeout", format!("no response within {}ms", self.timeout.as_millis()));
            }
            Ok(Err(e)) => {
                warn!("Service health check {} unreachable: {}", self.url, e);
                return self.down(None, "unreachable", e.to_string());
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let status_text = format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return self.down(Some(status.as_u16()), &status_text, e.to_string()),
        };

        if !status.is_success() {
            return self.down(Some(status.as_u16()), &status_text, "service returned a non-2xx status");
        }

        match serde_json::from_str::<Value>(&body) {
            Ok(payload) => {
                debug!("Service health {} up ({})", self.url, status_text);
                ServiceHealth {
                    url: self.url.clone(),
                    up: true,
                    http_status: Some(status.as_u16()),
                    status_text,
                    payload: Some(payload),
                    detail: None,
                    checked_at: Utc::now(),
                }
            }
            Err(e) => self.down(
                Some(status.as_u16()),
                &status_text,
                format!("service returned non-JSON health body: {}", e),
            ),
        }
    }

    fn down(&self, http_status: Option<u16>, status_text: &str, detail: impl Into<String>) -> ServiceHealth {
        ServiceHealth {
            url: self.url.clone(),
            up: false,
            http_status,
            status_text: status_text.to_string(),
            payload: None,
            detail: Some(detail.into()),
            checked_at: Utc::now(),
        }
    }
}
