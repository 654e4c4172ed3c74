//! Concurrent, independent health probes against the trading API endpoints.
//!
//! Every probe is bounded by a hard timeout and always yields a result; one
//! slow or failing endpoint never blocks or aborts its siblings.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, ORIGIN};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::service_health::ServiceHealthChecker;
use crate::config::ProbeConfig;
use crate::domain::{EndpointProbeResult, EndpointSpec, ProbeStatus, VerificationReport};
use crate::error::{Result, SentinelError};
use crate::gateway::HealthProbe;

/// Longest body preview kept when a 2xx response is not JSON
const MAX_RAW_PREVIEW: usize = 512;

pub struct EndpointHealthVerifier {
    http: Client,
    base_url: String,
    origin: String,
    timeout: Duration,
    endpoints: Vec<EndpointSpec>,
    /// Name of the probe whose success means the origin resolved
    primary: String,
    service: Option<ServiceHealthChecker>,
}

impl EndpointHealthVerifier {
    pub fn new(base_url: &str, origin: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("sentinel-verifier/0.1")
            .build()
            .map_err(|e| SentinelError::Internal(format!("failed to build probe HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            origin: origin.to_string(),
            timeout,
            endpoints: EndpointSpec::default_set(),
            primary: "status".to_string(),
            service: None,
        })
    }

    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        let verifier = Self::new(&config.base_url, &config.origin, config.timeout())?;
        Ok(match &config.service_health_url {
            Some(url) => {
                let checker = ServiceHealthChecker::new(url, config.timeout())?;
                verifier.with_service_health(checker)
            }
            None => verifier,
        })
    }

    /// Replace the endpoint set; the first entry becomes the primary probe.
    pub fn with_endpoints(mut self, endpoints: Vec<EndpointSpec>) -> Self {
        if let Some(first) = endpoints.first() {
            self.primary = first.name.clone();
        }
        self.endpoints = endpoints;
        self
    }

    pub fn with_service_health(mut self, checker: ServiceHealthChecker) -> Self {
        self.service = Some(checker);
        self
    }

    pub fn endpoints(&self) -> &[EndpointSpec] {
        &self.endpoints
    }

    fn host(&self) -> Option<String> {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Probe every endpoint concurrently and derive the cross-cutting checks.
    ///
    /// Always re-probes; nothing is cached between calls.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn verify(&self) -> VerificationReport {
        let started_at = Utc::now();
        let started = Instant::now();

        let service_check = async {
            match &self.service {
                Some(checker) => Some(checker.check().await),
                None => None,
            }
        };
        let (results, service) = tokio::join!(self.probe_all(), service_check);

        let mut report =
            VerificationReport::from_results(results, &self.primary, self.host(), started_at);
        report.service = service;

        info!(
            "Endpoint verification: {}/{} OK in {}ms (cors={:?}, tls={:?}, origin={:?})",
            report.healthy_endpoints(),
            report.total_endpoints(),
            started.elapsed().as_millis(),
            report.cors.status,
            report.transport_security.status,
            report.origin_resolution.status,
        );
        report
    }

    /// Fan out one task per endpoint and collect every outcome (settle-all).
    async fn probe_all(&self) -> Vec<EndpointProbeResult> {
        let mut tasks = JoinSet::new();
        for (idx, spec) in self.endpoints.iter().enumerate() {
            let http = self.http.clone();
            let url = format!("{}{}", self.base_url, spec.path);
            let spec = spec.clone();
            let origin = self.origin.clone();
            let timeout = self.timeout;
            tasks.spawn(async move { (idx, probe_endpoint(http, url, spec, origin, timeout).await) });
        }

        let mut slots: Vec<Option<EndpointProbeResult>> = vec![None; self.endpoints.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => warn!("Probe task did not complete: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(self.endpoints.iter())
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    EndpointProbeResult::failed(
                        spec,
                        ProbeStatus::NetworkError,
                        "probe task aborted before completing",
                        0,
                    )
                })
            })
            .collect()
    }
}

#[async_trait]
impl HealthProbe for EndpointHealthVerifier {
    async fn verify(&self) -> VerificationReport {
        EndpointHealthVerifier::verify(self).await
    }
}

/// Classify a request that never produced a response
fn classify_transport(err: &reqwest::Error) -> ProbeStatus {
    if err.is_timeout() {
        return ProbeStatus::Timeout;
    }
    let text = format!("{} {:?}", err, err).to_ascii_lowercase();
    if text.contains("cors") {
        ProbeStatus::CorsError
    } else {
        ProbeStatus::NetworkError
    }
}

async fn probe_endpoint(
    http: Client,
    url: String,
    spec: EndpointSpec,
    origin: String,
    timeout: Duration,
) -> EndpointProbeResult {
    let started = Instant::now();
    let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;

    let request = http
        .get(&url)
        .header(ACCEPT, "application/json")
        .header(CACHE_CONTROL, "no-cache")
        .header(ORIGIN, origin.as_str());

    let response = match tokio::time::timeout(timeout, request.send()).await {
        Err(_) => {
            debug!("Probe {} timed out", url);
            return EndpointProbeResult::failed(
                &spec,
                ProbeStatus::Timeout,
                format!("no response within {}ms", timeout.as_millis()),
                elapsed_ms(started),
            );
        }
        Ok(Err(e)) => {
            debug!("Probe {} failed: {}", url, e);
            return EndpointProbeResult::failed(
                &spec,
                classify_transport(&e),
                e.to_string(),
                elapsed_ms(started),
            );
        }
        Ok(Ok(response)) => response,
    };

    let http_status = response.status();
    let secure = response.url().scheme() == "https";
    let cors_concern = !http_status.is_success()
        || !response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN);

    let remaining = timeout.saturating_sub(started.elapsed());
    let body = match tokio::time::timeout(remaining, response.bytes()).await {
        Err(_) => {
            return EndpointProbeResult::failed(
                &spec,
                ProbeStatus::Timeout,
                format!("response body not received within {}ms", timeout.as_millis()),
                elapsed_ms(started),
            );
        }
        Ok(Err(e)) => {
            return EndpointProbeResult::failed(
                &spec,
                classify_transport(&e),
                e.to_string(),
                elapsed_ms(started),
            );
        }
        Ok(Ok(body)) => body,
    };

    let parsed = serde_json::from_slice::<Value>(&body);
    let (status, payload, detail) = if !http_status.is_success() {
        (
            ProbeStatus::Error,
            parsed.ok(),
            Some(format!(
                "HTTP {}: {}",
                http_status.as_u16(),
                http_status.canonical_reason().unwrap_or("Unknown")
            )),
        )
    } else {
        match parsed {
            Ok(json) => match &spec.expected {
                Some(shape) if !shape.matches(&json) => (
                    ProbeStatus::Warn,
                    Some(json),
                    Some(format!("expected {}", shape.describe())),
                ),
                _ => (ProbeStatus::Ok, Some(json), None),
            },
            Err(e) => {
                let text = String::from_utf8_lossy(&body);
                let preview: String = text.chars().take(MAX_RAW_PREVIEW).collect();
                (
                    ProbeStatus::Ok,
                    Some(Value::String(preview)),
                    Some(format!("response body is not valid JSON: {}", e)),
                )
            }
        }
    };

    debug!("Probe {} -> {} ({} bytes)", url, status, body.len());

    EndpointProbeResult {
        endpoint: spec.path.clone(),
        name: spec.name.clone(),
        status,
        http_status: Some(http_status.as_u16()),
        payload,
        secure,
        size_bytes: body.len(),
        duration_ms: elapsed_ms(started),
        cors_concern,
        detail,
        completed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let verifier =
            EndpointHealthVerifier::new("https://api.example.com/", "http://localhost", Duration::from_secs(1))
                .unwrap();
        assert_eq!(verifier.base_url, "https://api.example.com");
        assert_eq!(verifier.host().as_deref(), Some("api.example.com"));
        assert_eq!(verifier.endpoints().len(), 5);
        assert_eq!(verifier.primary, "status");
    }

    #[test]
    fn test_custom_endpoints_set_primary() {
        let verifier = EndpointHealthVerifier::new("http://localhost:1", "http://localhost", Duration::from_secs(1))
            .unwrap()
            .with_endpoints(vec![EndpointSpec::new("ping", "/ping")]);
        assert_eq!(verifier.primary, "ping");
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_all_settle() {
        // Port 9 (discard) on localhost is closed in test environments
        let verifier = EndpointHealthVerifier::new("http://127.0.0.1:9", "http://localhost", Duration::from_secs(2))
            .unwrap();
        let report = verifier.verify().await;

        assert_eq!(report.total_endpoints(), 5);
        assert_eq!(report.healthy_endpoints(), 0);
        for result in &report.results {
            assert!(result.status.is_transport_failure(), "{:?}", result.status);
            assert!(!result.secure);
            assert!(result.detail.is_some());
        }
        assert_eq!(report.results[2].endpoint, "/scores?window=252");
    }
}
