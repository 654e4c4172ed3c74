use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Market regime as last published by the orchestrator. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: String,
    #[serde(default)]
    pub trend: Option<String>,
    #[serde(default)]
    pub volatility: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Per-symbol detail, passed through as published
    #[serde(default)]
    pub symbols: Value,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<String>,
}

impl RegimeSnapshot {
    /// Read a regime payload, accepting both `{"regime": {...}}` envelopes
    /// and bare objects. Returns `None` when no regime label is present.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let body = match payload.get("regime") {
            Some(inner) if inner.is_object() => inner,
            _ => payload,
        };

        let regime = body
            .get("regime")
            .or_else(|| body.get("label"))
            .or_else(|| body.get("state"))
            .and_then(Value::as_str)?
            .to_string();

        let last_update = body
            .get("last_update")
            .or_else(|| body.get("timestamp"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Some(Self {
            regime,
            trend: body.get("trend").and_then(Value::as_str).map(str::to_string),
            volatility: body.get("volatility").and_then(Value::as_f64),
            confidence: body.get("confidence").and_then(Value::as_f64),
            symbols: body
                .get("symbols")
                .or_else(|| body.get("per_symbol"))
                .cloned()
                .unwrap_or(Value::Null),
            last_update,
            source: body.get("source").and_then(Value::as_str).map(str::to_string),
        })
    }
}
