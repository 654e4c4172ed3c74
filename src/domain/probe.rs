//! Endpoint probe results and the cross-cutting checks derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a single probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeStatus {
    Ok,
    Warn,
    Error,
    Timeout,
    CorsError,
    NetworkError,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Ok => "OK",
            ProbeStatus::Warn => "WARN",
            ProbeStatus::Error => "ERROR",
            ProbeStatus::Timeout => "TIMEOUT",
            ProbeStatus::CorsError => "CORS_ERROR",
            ProbeStatus::NetworkError => "NETWORK_ERROR",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeStatus::Ok)
    }

    /// Failure that never produced an HTTP response
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ProbeStatus::Timeout | ProbeStatus::CorsError | ProbeStatus::NetworkError
        )
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional hint about what a healthy response body looks like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedShape {
    Object,
    Array,
    /// Object carrying the named top-level field
    Field(String),
}

impl ExpectedShape {
    pub fn matches(&self, body: &Value) -> bool {
        match self {
            ExpectedShape::Object => body.is_object(),
            ExpectedShape::Array => body.is_array(),
            ExpectedShape::Field(name) => body.get(name).is_some(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ExpectedShape::Object => "a JSON object".to_string(),
            ExpectedShape::Array => "a JSON array".to_string(),
            ExpectedShape::Field(name) => format!("an object with field '{}'", name),
        }
    }
}

/// One endpoint in the fixed verification set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Short name used in reports (e.g. "status")
    pub name: String,
    /// Path including any query string (e.g. "/scores?window=252")
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<ExpectedShape>,
}

impl EndpointSpec {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            expected: None,
        }
    }

    pub fn expecting(mut self, shape: ExpectedShape) -> Self {
        self.expected = Some(shape);
        self
    }

    /// Path without its query string, as shown in CORS reports
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// The trading API endpoint set, primary status probe first
    pub fn default_set() -> Vec<EndpointSpec> {
        vec![
            EndpointSpec::new("status", "/status"),
            EndpointSpec::new("registry", "/registry"),
            EndpointSpec::new("scores", "/scores?window=252"),
            EndpointSpec::new("select", "/select"),
            EndpointSpec::new("allocate", "/allocate"),
        ]
    }
}

/// Outcome of one probe attempt. Built once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointProbeResult {
    pub endpoint: String,
    pub name: String,
    pub status: ProbeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Final URL scheme after redirects was https
    pub secure: bool,
    pub size_bytes: usize,
    pub duration_ms: u64,
    /// The response lacked CORS headers, or the request failed outright. A
    /// browser cannot tell a CORS rejection from any other failure, so
    /// every failure counts.
    pub cors_concern: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl EndpointProbeResult {
    /// Result for a probe that never produced a response. Always a CORS concern.
    pub fn failed(
        spec: &EndpointSpec,
        status: ProbeStatus,
        detail: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            endpoint: spec.path.clone(),
            name: spec.name.clone(),
            status,
            http_status: None,
            payload: None,
            secure: false,
            size_bytes: 0,
            duration_ms,
            cors_concern: true,
            detail: Some(detail.into()),
            completed_at: Utc::now(),
        }
    }
}

/// Status of a derived check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsCheck {
    pub status: CheckStatus,
    /// One line per offending endpoint
    pub offending: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSecurityCheck {
    pub status: CheckStatus,
    pub insecure: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginResolutionCheck {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Result of the secondary service `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub url: String,
    pub up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Raw status line text, kept for diagnostics
    pub status_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Everything one verification pass produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub results: Vec<EndpointProbeResult>,
    pub cors: CorsCheck,
    pub transport_security: TransportSecurityCheck,
    pub origin_resolution: OriginResolutionCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceHealth>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Derive the cross-cutting checks from a settled result set.
    ///
    /// `primary` names the probe whose success means the API origin resolved.
    pub fn from_results(
        results: Vec<EndpointProbeResult>,
        primary: &str,
        host: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let offending: Vec<String> = results
            .iter()
            .filter(|r| r.cors_concern)
            .map(|r| {
                let route = r.endpoint.split('?').next().unwrap_or(&r.endpoint);
                format!("{}: CORS issue detected", route)
            })
            .collect();
        let cors = CorsCheck {
            status: if offending.is_empty() {
                CheckStatus::Ok
            } else {
                CheckStatus::Warn
            },
            offending,
        };

        let insecure: Vec<String> = results
            .iter()
            .filter(|r| !r.secure)
            .map(|r| r.endpoint.clone())
            .collect();
        let transport_security = TransportSecurityCheck {
            status: if insecure.is_empty() && !results.is_empty() {
                CheckStatus::Ok
            } else {
                CheckStatus::Error
            },
            insecure,
        };

        let primary_ok = results
            .iter()
            .any(|r| r.name == primary && r.status.is_ok());
        let origin_resolution = OriginResolutionCheck {
            status: if primary_ok {
                CheckStatus::Ok
            } else {
                CheckStatus::Error
            },
            host,
        };

        Self {
            results,
            cors,
            transport_security,
            origin_resolution,
            service: None,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn healthy_endpoints(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_ok()).count()
    }

    pub fn total_endpoints(&self) -> usize {
        self.results.len()
    }

    pub fn result(&self, name: &str) -> Option<&EndpointProbeResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: ProbeStatus, secure: bool, cors_concern: bool) -> EndpointProbeResult {
        EndpointProbeResult {
            endpoint: format!("/{}", name),
            name: name.to_string(),
            status,
            http_status: None,
            payload: None,
            secure,
            size_bytes: 0,
            duration_ms: 1,
            cors_concern,
            detail: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ProbeStatus::CorsError).unwrap(),
            "\"CORS_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&ProbeStatus::NetworkError).unwrap(),
            "\"NETWORK_ERROR\""
        );
        assert_eq!(ProbeStatus::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn test_healthy_count_ignores_failure_kind() {
        let kinds = [
            ProbeStatus::Warn,
            ProbeStatus::Error,
            ProbeStatus::Timeout,
            ProbeStatus::CorsError,
            ProbeStatus::NetworkError,
        ];
        for k in 0..=5usize {
            for failure in kinds {
                let results = (0..5)
                    .map(|i| {
                        let status = if i < k { ProbeStatus::Ok } else { failure };
                        result(&format!("e{}", i), status, true, false)
                    })
                    .collect();
                let report = VerificationReport::from_results(results, "e0", None, Utc::now());
                assert_eq!(report.healthy_endpoints(), k);
                assert_eq!(report.total_endpoints(), 5);
            }
        }
    }

    #[test]
    fn test_cross_cutting_checks() {
        let results = vec![
            result("status", ProbeStatus::Ok, true, false),
            result("registry", ProbeStatus::Ok, false, true),
            result("scores", ProbeStatus::Timeout, false, false),
        ];
        let report = VerificationReport::from_results(
            results,
            "status",
            Some("api.example.com".to_string()),
            Utc::now(),
        );
        assert_eq!(report.cors.status, CheckStatus::Warn);
        assert_eq!(report.cors.offending, vec!["/registry: CORS issue detected"]);
        assert_eq!(report.transport_security.status, CheckStatus::Error);
        assert_eq!(report.transport_security.insecure.len(), 2);
        assert_eq!(report.origin_resolution.status, CheckStatus::Ok);
    }

    #[test]
    fn test_failed_checks_are_cors_concerns() {
        let spec = EndpointSpec::new("scores", "/scores");
        let results = [ProbeStatus::Timeout, ProbeStatus::NetworkError, ProbeStatus::CorsError]
            .into_iter()
            .map(|status| EndpointProbeResult::failed(&spec, status, "no response", 5))
            .collect::<Vec<_>>();
        assert!(results.iter().all(|r| r.cors_concern));

        let report = VerificationReport::from_results(results, "scores", None, Utc::now());
        assert_eq!(report.cors.status, CheckStatus::Warn);
        assert_eq!(report.cors.offending.len(), 3);
        assert!(report
            .cors
            .offending
            .iter()
            .all(|entry| entry == "/scores: CORS issue detected"));
    }

    #[test]
    fn test_origin_resolution_follows_primary_probe() {
        let results = vec![
            result("status", ProbeStatus::Error, true, false),
            result("registry", ProbeStatus::Ok, true, false),
        ];
        let report = VerificationReport::from_results(results, "status", None, Utc::now());
        assert_eq!(report.origin_resolution.status, CheckStatus::Error);
        assert_eq!(report.cors.status, CheckStatus::Ok);
        assert_eq!(report.transport_security.status, CheckStatus::Ok);
    }

    #[test]
    fn test_expected_shape() {
        let body = serde_json::json!({"status": "ok"});
        assert!(ExpectedShape::Object.matches(&body));
        assert!(!ExpectedShape::Array.matches(&body));
        assert!(ExpectedShape::Field("status".to_string()).matches(&body));
        assert!(!ExpectedShape::Field("weights".to_string()).matches(&body));
    }

    #[test]
    fn test_default_set_routes() {
        let set = EndpointSpec::default_set();
        assert_eq!(set.len(), 5);
        assert_eq!(set[0].name, "status");
        assert_eq!(set[2].path, "/scores?window=252");
        assert_eq!(set[2].route(), "/scores");
    }
}
